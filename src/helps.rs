use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::Regex;
use serde::Deserialize;

use crate::error::RenderError;
use crate::fetch::ResourceArchive;
use crate::formats::CatalogEntry;
use crate::markdown::{linkify_bare_urls, markdown_to_html_fragment, split_title};
use crate::rc_link::{Article, ArticleSource, RcLink, RcResource};

static TA_SIBLING_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="\.\./([^/".]+)/*(?:01\.md)?""#).expect("ta sibling link regex")
});
static TA_MANUAL_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="\.\./\.\./([^/".]+)/([^/".]+)/*(?:01\.md)?""#)
        .expect("ta manual link regex")
});
static TW_SIBLING_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="\./([^/".]+)\.md""#).expect("tw sibling link regex"));
static TW_CATEGORY_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="\.\./([^/".]+)/*([^/"]+)\.md""#).expect("tw category link regex")
});
static EXTERNAL_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(href="http[^"]+")"#).expect("external href regex"));

/// Translation Words categories in display order.
pub const TW_CATEGORIES: [(&str, &str); 3] =
    [("kt", "Key Terms"), ("names", "Names"), ("other", "Other")];

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TocSection {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub sections: Vec<TocSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TocFile {
    #[serde(default)]
    sections: Vec<TocSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpArticle {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub body: String,
}

/// One TA manual or one TW category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpManual {
    pub id: String,
    pub title: String,
    pub sort: u32,
    pub articles: BTreeMap<String, HelpArticle>,
    /// Empty when the manual has no `toc.yaml`.
    pub toc: Vec<TocSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpManuals {
    pub resource: RcResource,
    pub manuals: Vec<HelpManual>,
}

impl HelpManuals {
    pub fn manual(&self, id: &str) -> Option<&HelpManual> {
        self.manuals.iter().find(|manual| manual.id == id)
    }

    pub fn article_count(&self) -> usize {
        self.manuals.iter().map(|m| m.articles.len()).sum()
    }

    /// Translation Academy: one manual per ingredient, `<manual>/<article>/{title,sub-title,01}.md`.
    pub fn load_ta(entry: &CatalogEntry, archive: &ResourceArchive) -> anyhow::Result<Self> {
        if entry.ingredients.is_empty() {
            return Err(RenderError::NoIngredients {
                resource: entry.full_name(),
            }
            .into());
        }
        let mut ingredients = entry.ingredients.clone();
        ingredients.sort_by_key(|ingredient| ingredient.sort);

        let mut manuals = Vec::new();
        for (index, ingredient) in ingredients.iter().enumerate() {
            let root = ingredient_root(&ingredient.path);
            let prefix = format!("{root}/");
            if archive.paths_under(&prefix).next().is_none() {
                tracing::warn!(manual = %ingredient.identifier, "manual listed in manifest is missing");
                continue;
            }
            let manual_id = ingredient.identifier.clone();
            let toc = match archive.read_to_string(&format!("{prefix}toc.yaml")) {
                Some(yaml) => {
                    serde_yaml::from_str::<TocFile>(&yaml)
                        .with_context(|| format!("parse {prefix}toc.yaml"))?
                        .sections
                }
                None => Vec::new(),
            };

            let mut articles: BTreeMap<String, HelpArticle> = BTreeMap::new();
            for path in archive.paths_under(&prefix) {
                let rest = &path[prefix.len()..];
                let Some((article_id, file)) = rest.split_once('/') else {
                    continue;
                };
                if !matches!(file, "title.md" | "sub-title.md" | "01.md") {
                    continue;
                }
                let Some(text) = archive.read_to_string(path) else {
                    continue;
                };
                let article = articles
                    .entry(article_id.to_owned())
                    .or_insert_with(|| HelpArticle {
                        id: article_id.to_owned(),
                        title: String::new(),
                        subtitle: None,
                        body: String::new(),
                    });
                match file {
                    "title.md" => article.title = text.trim().to_owned(),
                    "sub-title.md" => article.subtitle = Some(text.trim().to_owned()),
                    _ => article.body = ta_body(&text, &manual_id),
                }
            }
            for article in articles.values_mut() {
                if article.title.is_empty() {
                    article.title = article.id.clone();
                }
            }

            manuals.push(HelpManual {
                id: manual_id,
                title: if ingredient.title.is_empty() {
                    ingredient.identifier.clone()
                } else {
                    ingredient.title.clone()
                },
                sort: if ingredient.sort == 0 {
                    index as u32
                } else {
                    ingredient.sort
                },
                articles,
                toc,
            });
        }
        tracing::debug!(manuals = manuals.len(), "loaded translation academy");
        Ok(Self {
            resource: RcResource::Ta,
            manuals,
        })
    }

    /// Translation Words: `<bible>/<category>/<article>.md`, title from the first heading.
    pub fn load_tw(entry: &CatalogEntry, archive: &ResourceArchive) -> anyhow::Result<Self> {
        let bible_root = entry
            .ingredient("bible")
            .map(|ingredient| ingredient_root(&ingredient.path))
            .unwrap_or_else(|| "bible".to_owned());

        let mut manuals = Vec::new();
        for (sort, (category, title)) in TW_CATEGORIES.iter().enumerate() {
            let prefix = format!("{bible_root}/{category}/");
            let mut articles = BTreeMap::new();
            for path in archive.paths_under(&prefix) {
                let Some(file) = path[prefix.len()..].strip_suffix(".md") else {
                    continue;
                };
                if file.contains('/') {
                    continue;
                }
                let Some(text) = archive.read_to_string(path) else {
                    continue;
                };
                let (heading, markdown) = split_title(&text);
                articles.insert(
                    file.to_owned(),
                    HelpArticle {
                        id: file.to_owned(),
                        title: heading.unwrap_or_else(|| file.to_owned()),
                        subtitle: None,
                        body: tw_body(&markdown, category),
                    },
                );
            }
            if articles.is_empty() {
                continue;
            }
            manuals.push(HelpManual {
                id: (*category).to_owned(),
                title: (*title).to_owned(),
                sort: sort as u32,
                articles,
                toc: Vec::new(),
            });
        }
        if manuals.is_empty() {
            anyhow::bail!("no translation words articles under {bible_root}/");
        }
        tracing::debug!(categories = manuals.len(), "loaded translation words");
        Ok(Self {
            resource: RcResource::Tw,
            manuals,
        })
    }
}

impl ArticleSource for HelpManuals {
    fn article(&self, link: &RcLink) -> Option<Article> {
        if link.resource != self.resource {
            return None;
        }
        let (group, article_id) = link.article_key();
        let article = self.manual(&group)?.articles.get(&article_id)?;
        Some(Article {
            title: article.title.clone(),
            body: article.body.clone(),
        })
    }
}

fn ingredient_root(path: &str) -> String {
    path.trim_start_matches("./")
        .trim_matches('/')
        .to_owned()
}

fn ta_body(markdown: &str, manual_id: &str) -> String {
    let html = markdown_to_html_fragment(markdown);
    let html = TA_SIBLING_LINK_RE.replace_all(&html, format!(r##"href="#{manual_id}--$1""##));
    let html = TA_MANUAL_LINK_RE.replace_all(&html, r##"href="#$1--$2""##);
    external_links(&html)
}

fn tw_body(markdown: &str, category: &str) -> String {
    let html = markdown_to_html_fragment(markdown);
    let html = TW_SIBLING_LINK_RE.replace_all(&html, format!(r##"href="#{category}--$1""##));
    let html = TW_CATEGORY_LINK_RE.replace_all(&html, r##"href="#$1--$2""##);
    external_links(&html)
}

fn external_links(html: &str) -> String {
    let html = linkify_bare_urls(html);
    EXTERNAL_HREF_RE
        .replace_all(&html, r#"$1 target="_blank""#)
        .into_owned()
}
