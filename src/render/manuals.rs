use std::sync::LazyLock;

use regex::Regex;

use crate::formats::{CatalogEntry, HtmlSections, SectionCss};
use crate::helps::{HelpManual, HelpManuals, TocSection};
use crate::markdown::encode_html;
use crate::render::{RenderContext, Rendered, finish_sections};

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("slug regex"));
static MANUAL_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"href="#([\w-]+--[\w-]+)""##).expect("manual anchor regex")
});

const MAX_HEADING_DEPTH: usize = 6;

pub const TA_WEB_CSS: &str = r#"
section > section:nth-child(1),
section > article:nth-child(1) {
  break-before: avoid;
}

article + section, section + article {
  break-after: page;
}

h5, h6 {
  font-size: 1em;
}

a.header-link {
  font-weight: inherit !important;
  font-size: inherit !important;
  color: #000000;
  text-decoration: none;
}

.article-body h1, .article-body h2, .article-body h3, .article-body h4 {
  font-size: 1em;
}

hr.divider {
  width: 100%;
}

hr.article-divider {
  width: 50%;
}

.manual > h1 {
  text-align: center;
}
"#;

pub const TW_WEB_CSS: &str = r#"
.section > .section:nth-child(1),
.section > .article:nth-child(1) {
  break-before: avoid;
}

a.header-link {
  font-weight: inherit !important;
  font-size: inherit !important;
  color: #000000;
  text-decoration: none;
}

.article-body h1, .article-body h2, .article-body h3, .article-body h4 {
  font-size: 1em;
}

hr.article-divider {
  width: 50%;
}
"#;

pub const PRINT_CSS: &str = r#"
#pagedjs-print .section-header a {
  border-bottom: none;
}

#pagedjs-print .article-header a {
  border-bottom: none;
}

#pagedjs-print hr.article-divider {
  display: none;
}

#pagedjs-print a,
#pagedjs-print a:hover,
#pagedjs-print a:visited {
  color: inherit;
}
"#;

/// A node of the flattened manual tree: an article (has a body), a grouping
/// section (has children) or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualSection {
    pub link: String,
    pub title: String,
    pub toc_title: String,
    pub body: String,
    pub sections: Vec<ManualSection>,
}

/// Top-level section per manual: `toc.yaml` order when present, articles by title otherwise.
pub fn ta_sections(manuals: &HelpManuals) -> Vec<ManualSection> {
    let mut ordered: Vec<&HelpManual> = manuals.manuals.iter().collect();
    ordered.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
    ordered
        .into_iter()
        .map(|manual| {
            let sections = if manual.toc.is_empty() {
                articles_by_title(manual)
            } else {
                toc_sections(manual, &manual.toc)
            };
            ManualSection {
                link: format!("{0}--{0}", manual.id),
                title: manual.title.clone(),
                toc_title: manual.title.clone(),
                body: String::new(),
                sections,
            }
        })
        .collect()
}

/// One section per category, articles by title.
pub fn tw_sections(manuals: &HelpManuals) -> Vec<ManualSection> {
    manuals
        .manuals
        .iter()
        .map(|category| ManualSection {
            link: category.id.clone(),
            title: category.title.clone(),
            toc_title: category.title.clone(),
            body: String::new(),
            sections: articles_by_title(category),
        })
        .collect()
}

fn articles_by_title(manual: &HelpManual) -> Vec<ManualSection> {
    let mut articles: Vec<_> = manual.articles.values().collect();
    articles.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
    articles
        .into_iter()
        .map(|article| ManualSection {
            link: format!("{}--{}", manual.id, article.id),
            title: article.title.clone(),
            toc_title: article.title.clone(),
            body: article.body.clone(),
            sections: Vec::new(),
        })
        .collect()
}

fn toc_sections(manual: &HelpManual, toc: &[TocSection]) -> Vec<ManualSection> {
    toc.iter()
        .map(|entry| {
            let (id, title, body) = match &entry.link {
                Some(link) => match manual.articles.get(link) {
                    Some(article) => (link.clone(), article.title.clone(), article.body.clone()),
                    None => {
                        tracing::warn!(manual = %manual.id, article = %link, "toc entry has no article");
                        (link.clone(), entry.title.clone(), String::new())
                    }
                },
                None => (slug_link(&entry.title), entry.title.clone(), String::new()),
            };
            ManualSection {
                link: format!("{}--{id}", manual.id),
                title,
                toc_title: entry.title.clone(),
                body,
                sections: toc_sections(manual, &entry.sections),
            }
        })
        .collect()
}

fn slug_link(title: &str) -> String {
    format!("section-{}", SLUG_RE.replace_all(title, "-").to_lowercase())
}

/// Markup differences between the two manual layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualStyle {
    /// `<section>`/`<article>` elements, articles anchored at `ta-<link>`.
    Academy,
    /// `div.section`/`div.article` elements anchored at `nav-<link>`.
    Words,
}

impl ManualStyle {
    fn anchor(self, link: &str) -> String {
        match self {
            Self::Academy => format!("ta-{link}"),
            Self::Words => format!("nav-{link}"),
        }
    }

    fn nav_anchor(self, link: &str) -> String {
        match self {
            Self::Academy => format!(r#" data-nav-anchor="{link}""#),
            Self::Words => String::new(),
        }
    }
}

/// Renders the manual tree recursively, headings deepening with nesting up to `<h6>`.
pub fn manual_html(
    style: ManualStyle,
    manual_title: &str,
    section: &ManualSection,
    index: usize,
    total: usize,
    depth: usize,
    subtitles: &[String],
) -> String {
    let depth = depth.min(MAX_HEADING_DEPTH);
    let title = if section.title.is_empty() {
        "NO TITLE FOUND!"
    } else {
        section.title.as_str()
    };
    let toc_title = if section.toc_title.is_empty() {
        title
    } else {
        section.toc_title.as_str()
    };
    let mut my_subtitles = subtitles.to_vec();
    if my_subtitles.last().map(String::as_str) != Some(toc_title) {
        my_subtitles.push(toc_title.to_owned());
    }
    let header_title = my_subtitles.join(" :: ");
    let link = &section.link;
    let anchor = style.anchor(link);
    let nav_anchor = style.nav_anchor(link);
    let encoded_toc_title = encode_html(toc_title);

    let mut html = String::new();
    if !section.body.is_empty() {
        let position = if index == 0 {
            "first-article"
        } else if index + 1 == total {
            "last-article"
        } else {
            ""
        };
        let header = if title != manual_title {
            format!(
                r##"
  <h{depth} class="header article-header">
    <a href="#{anchor}"{nav_anchor} class="header-link">{title}</a>
  </h{depth}>
"##
            )
        } else {
            String::new()
        };
        let open = match style {
            ManualStyle::Academy => format!(
                r#"<article id="{anchor}" data-nav-id="{link}" class="{position}" data-toc-title="{encoded_toc_title}">"#
            ),
            ManualStyle::Words => format!(
                r#"<div class="article {position}" id="{anchor}" data-toc-title="{encoded_toc_title}">"#
            ),
        };
        let close = match style {
            ManualStyle::Academy => "</article>",
            ManualStyle::Words => "</div>",
        };
        html.push_str(&format!(
            r#"
{open}
  {header}
  <span class="header-title">{header_title}</span>
  <div class="article-body">
    {}
  </div>
{close}
"#,
            local_anchors(style, &section.body)
        ));
        if index + 1 < total {
            html.push_str("\n<hr class=\"article-divider divider\"></hr>\n");
        }
    }

    if !section.sections.is_empty() {
        let children: String = section
            .sections
            .iter()
            .enumerate()
            .map(|(child_index, child)| {
                manual_html(
                    style,
                    manual_title,
                    child,
                    child_index,
                    section.sections.len(),
                    depth + 1,
                    &my_subtitles,
                )
            })
            .collect();
        let position = if index == 0 {
            "first-section "
        } else if index + 1 == total {
            "last-section "
        } else {
            ""
        };
        let kind = if depth == 1 { "manual" } else { "subsection" };
        let open = match style {
            ManualStyle::Academy => format!(
                r#"<section id="{link}" class="{position}{kind}" data-toc-title="{encoded_toc_title}">"#
            ),
            ManualStyle::Words => format!(
                r#"<div class="section {position}{kind}" id="{anchor}" data-toc-title="{encoded_toc_title}">"#
            ),
        };
        let close = match style {
            ManualStyle::Academy => "</section>",
            ManualStyle::Words => "</div>",
        };
        html.push_str(&format!(
            r##"
{open}
  <h{depth} class="header section-header">
    <a href="#{anchor}"{nav_anchor} class="header-link">{title}</a>
  </h{depth}>
  <span class="header-title">{header_title}</span>
  {children}
{close}
"##
        ));
    }
    html
}

/// `#manual--article` links inside bodies point at the rendered article anchors.
fn local_anchors(style: ManualStyle, body: &str) -> String {
    MANUAL_ANCHOR_RE
        .replace_all(body, |caps: &regex::Captures| {
            format!(r##"href="#{}""##, style.anchor(&caps[1]))
        })
        .into_owned()
}

pub async fn render_ta(ctx: &RenderContext, entry: &CatalogEntry) -> anyhow::Result<Rendered> {
    let archive = ctx.fetcher.fetch_zip(entry).await?;
    let manuals = HelpManuals::load_ta(entry, &archive)?;
    let sections = ta_sections(&manuals);
    let body: String = sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            manual_html(
                ManualStyle::Academy,
                &section.title,
                section,
                index,
                sections.len(),
                1,
                &[],
            )
        })
        .collect();
    tracing::info!(
        resource = %entry.full_name(),
        manuals = manuals.manuals.len(),
        articles = manuals.article_count(),
        "rendered translation academy"
    );

    let sections = HtmlSections {
        body,
        css: SectionCss {
            web: TA_WEB_CSS.to_owned(),
            print: PRINT_CSS.to_owned(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, vec![entry.clone()]).await
}

pub async fn render_tw(ctx: &RenderContext, entry: &CatalogEntry) -> anyhow::Result<Rendered> {
    let archive = ctx.fetcher.fetch_zip(entry).await?;
    let manuals = HelpManuals::load_tw(entry, &archive)?;
    let sections = tw_sections(&manuals);
    let inner: String = sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            manual_html(
                ManualStyle::Words,
                &section.title,
                section,
                index,
                sections.len(),
                1,
                &[],
            )
        })
        .collect();
    if inner.trim().is_empty() {
        anyhow::bail!("no articles found to generate a translation words manual");
    }
    let body = format!(
        r##"
<div class="section tw-manual">
  <h1 class="header tw-section-header" id="nav-tw"><a class="header-link" href="#nav-tw">{}</a></h1>
  {inner}
</div>
"##,
        entry.title
    );
    tracing::info!(
        resource = %entry.full_name(),
        articles = manuals.article_count(),
        "rendered translation words"
    );

    let sections = HtmlSections {
        body,
        css: SectionCss {
            web: TW_WEB_CSS.to_owned(),
            print: PRINT_CSS.to_owned(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, vec![entry.clone()]).await
}
