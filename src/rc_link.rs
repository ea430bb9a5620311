use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::markdown::encode_html;

static RC_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"rc://[^/\s"<>\]\[()]+/[^/\s"<>\]\[()]+/[^/\s"<>\]\[()]+/[^\s"<>\]\[()]+"#)
        .expect("rc link regex")
});

// One pass: `href="rc://…"`, then `[[rc://…]]`, then a bare token.
static REWRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="(rc://[^"]+)"|\[\[(rc://[^\]]+)\]\]|(rc://[^\s"<>\]\[()]+)"#)
        .expect("rc rewrite regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RcResource {
    Ta,
    Tw,
}

impl RcResource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ta => "ta",
            Self::Tw => "tw",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ta" => Some(Self::Ta),
            "tw" => Some(Self::Tw),
            _ => None,
        }
    }
}

/// `rc://<lang>/<resource>/<type>/<path>` pointing at a TA or TW article.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RcLink {
    pub language: String,
    pub resource: RcResource,
    pub kind: String,
    /// Slash-separated, without a trailing `.md` or `/`.
    pub path: String,
}

impl RcLink {
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.trim().strip_prefix("rc://")?;
        let mut parts = rest.splitn(4, '/');
        let language = parts.next()?.to_owned();
        let resource = RcResource::parse(parts.next()?)?;
        let kind = parts.next()?.to_owned();
        let path = parts
            .next()?
            .trim_end_matches(['.', ',', ';', ':'])
            .trim_end_matches(".md")
            .trim_end_matches('/')
            .to_owned();
        if language.is_empty() || kind.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            language,
            resource,
            kind,
            path,
        })
    }

    /// Language-independent form used as the link table key.
    pub fn canonical(&self) -> String {
        format!("rc://*/{}/{}/{}", self.resource.as_str(), self.kind, self.path)
    }

    pub fn anchor(&self) -> String {
        format!(
            "appendex--{}--{}",
            self.resource.as_str(),
            self.path.replace('/', "--")
        )
    }

    /// `(manual, article)` for TA, `(category, article)` for TW.
    pub fn article_key(&self) -> (String, String) {
        let mut parts: Vec<&str> = self.path.split('/').collect();
        if self.resource == RcResource::Tw && parts.len() > 2 && parts[0] == "bible" {
            parts.remove(0);
        }
        match parts.split_first() {
            Some((first, rest)) if !rest.is_empty() => ((*first).to_owned(), rest.join("/")),
            _ => (String::new(), self.path.clone()),
        }
    }

    fn not_found_title(&self) -> String {
        let (group, article) = self.article_key();
        format!(
            "{} ARTICLE FOR {group} :: {article} NOT FOUND!",
            self.resource.as_str().to_uppercase()
        )
    }
}

/// Every TA/TW link in `html`, in document order (duplicates included).
pub fn find_rc_links(html: &str) -> Vec<RcLink> {
    RC_LINK_RE
        .find_iter(html)
        .filter_map(|m| RcLink::parse(m.as_str()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub body: String,
}

/// Looks up TA or TW articles by link.
pub trait ArticleSource: Send + Sync {
    fn article(&self, link: &RcLink) -> Option<Article>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcLinkRecord {
    pub rc_link: String,
    pub resource: RcResource,
    pub anchor: String,
    pub title: String,
    pub body: String,
    pub back_refs: Vec<String>,
    /// 0 for links found in the main body.
    pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    pub ta: BTreeMap<String, RcLinkRecord>,
    pub tw: BTreeMap<String, RcLinkRecord>,
}

impl LinkTable {
    pub fn get(&self, link: &RcLink) -> Option<&RcLinkRecord> {
        self.records(link.resource).get(&link.canonical())
    }

    pub fn records(&self, resource: RcResource) -> &BTreeMap<String, RcLinkRecord> {
        match resource {
            RcResource::Ta => &self.ta,
            RcResource::Tw => &self.tw,
        }
    }

    fn records_mut(&mut self, resource: RcResource) -> &mut BTreeMap<String, RcLinkRecord> {
        match resource {
            RcResource::Ta => &mut self.ta,
            RcResource::Tw => &mut self.tw,
        }
    }

    pub fn len(&self) -> usize {
        self.ta.len() + self.tw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records sorted by case-insensitive title, anchor breaking ties.
    pub fn sorted(&self, resource: RcResource) -> Vec<&RcLinkRecord> {
        let mut records: Vec<_> = self.records(resource).values().collect();
        records.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.anchor.cmp(&b.anchor))
        });
        records
    }
}

/// Header fields of one appendix block.
#[derive(Debug, Clone, Copy)]
pub struct AppendixHeader<'a> {
    pub resource_title: &'a str,
    pub book_title: &'a str,
    pub version: &'a str,
}

pub fn back_ref_link(anchor: &str, text: &str) -> String {
    format!(r##"<a href="#{anchor}">{}</a>"##, encode_html(text))
}

pub struct RcLinkResolver<'a> {
    ta: Option<&'a dyn ArticleSource>,
    tw: Option<&'a dyn ArticleSource>,
    table: LinkTable,
    scanned: HashSet<String>,
    anchors: HashSet<String>,
}

impl<'a> RcLinkResolver<'a> {
    pub fn new(ta: Option<&'a dyn ArticleSource>, tw: Option<&'a dyn ArticleSource>) -> Self {
        Self {
            ta,
            tw,
            table: LinkTable::default(),
            scanned: HashSet::new(),
            anchors: HashSet::new(),
        }
    }

    pub fn table(&self) -> &LinkTable {
        &self.table
    }

    pub fn into_table(self) -> LinkTable {
        self.table
    }

    /// Records every link in `html`, crediting `back_ref` to each. Returns the number of links seen.
    pub fn register(&mut self, html: &str, back_ref: &str) -> usize {
        let links = find_rc_links(html);
        for link in &links {
            self.add(link, back_ref, 0);
        }
        links.len()
    }

    /// Resolves links found inside appendix articles, breadth first, up to `max_depth` levels.
    pub fn resolve_nested(&mut self, max_depth: u32) -> usize {
        let mut queue: VecDeque<(RcResource, String)> = [RcResource::Ta, RcResource::Tw]
            .into_iter()
            .flat_map(|resource| {
                self.table
                    .records(resource)
                    .keys()
                    .map(move |key| (resource, key.clone()))
            })
            .collect();
        let mut added = 0;

        while let Some((resource, key)) = queue.pop_front() {
            if self.scanned.contains(&key) {
                continue;
            }
            let Some(record) = self.table.records(resource).get(&key) else {
                continue;
            };
            if record.depth >= max_depth {
                continue;
            }
            let depth = record.depth + 1;
            let back_ref = back_ref_link(&record.anchor, &record.title);
            let links = find_rc_links(&record.body);
            self.scanned.insert(key);
            for link in links {
                if self.add(&link, &back_ref, depth) {
                    added += 1;
                    queue.push_back((link.resource, link.canonical()));
                }
            }
        }
        tracing::debug!(added, max_depth, "resolved nested rc links");
        added
    }

    /// Returns true when the link was not in the table yet.
    fn add(&mut self, link: &RcLink, back_ref: &str, depth: u32) -> bool {
        let key = link.canonical();
        if let Some(record) = self.table.records_mut(link.resource).get_mut(&key) {
            if !back_ref.is_empty() && !record.back_refs.iter().any(|r| r == back_ref) {
                record.back_refs.push(back_ref.to_owned());
            }
            return false;
        }

        let source = match link.resource {
            RcResource::Ta => self.ta,
            RcResource::Tw => self.tw,
        };
        let (title, body) = match source.and_then(|source| source.article(link)) {
            Some(article) => (article.title, article.body),
            None => {
                tracing::warn!(rc_link = %key, "article not found");
                (link.not_found_title(), String::new())
            }
        };
        let anchor = self.unique_anchor(link.anchor());
        let record = RcLinkRecord {
            rc_link: key.clone(),
            resource: link.resource,
            anchor,
            title,
            body,
            back_refs: if back_ref.is_empty() {
                Vec::new()
            } else {
                vec![back_ref.to_owned()]
            },
            depth,
        };
        self.table.records_mut(link.resource).insert(key, record);
        true
    }

    /// Distinct links whose paths flatten to the same anchor get `--2`, `--3`, ... in first-seen order.
    fn unique_anchor(&mut self, base: String) -> String {
        let mut anchor = base.clone();
        let mut n = 1;
        while self.anchors.contains(&anchor) {
            n += 1;
            anchor = format!("{base}--{n}");
        }
        self.anchors.insert(anchor.clone());
        anchor
    }

    /// Empty when nothing of `resource` was referenced.
    pub fn render_appendix(&self, resource: RcResource, header: AppendixHeader<'_>) -> String {
        let records = self.table.sorted(resource);
        if records.is_empty() {
            return String::new();
        }
        let res = resource.as_str();
        let logo = format!("u{res}");
        let resource_title = encode_html(header.resource_title);
        let book_title = encode_html(header.book_title);
        let version = encode_html(header.version);

        let mut html = format!(
            r#"
<div class="appendex {res} section" id="appendex-{res}" data-toc-title="Appendix: {resource_title}">
  <div class="article title-page">
    <span class="header-title"></span>
    <img class="title-logo" src="https://cdn.door43.org/assets/uw-icons/logo-{logo}-256.png" alt="{logo}">
    <h1 class="header cover-header section-header">{resource_title} - {book_title}</h1>
    <h3 class="cover-version">{version}</h3>
  </div>
"#
        );
        for record in records {
            let RcLinkRecord {
                anchor,
                title,
                body,
                back_refs,
                ..
            } = record;
            let title = encode_html(title);
            html.push_str(&format!(
                r##"
  <div class="article" id="{anchor}" data-toc-title="{title}">
    <h2 class="header article-header">
      <a href="#{anchor}" class="header-link">{title}</a>
    </h2>
    <span class="header-title">{resource_title} :: {title}</span>
    <div class="article-body">
      {body}
    </div>
    <div class="back-refs">
      <h3>{book_title} References:</h3>
      {}
    </div>
  </div>
"##,
                back_refs.join("; ")
            ));
        }
        html.push_str("</div>\n");
        html
    }

    /// Points every known link at its appendix anchor. Unknown links are left as they are.
    pub fn rewrite_links(&self, html: &str) -> String {
        rewrite_links(&self.table, html)
    }
}

pub fn rewrite_links(table: &LinkTable, html: &str) -> String {
    let mut rewritten = 0usize;
    let out = REWRITE_RE.replace_all(html, |caps: &Captures| {
        let whole = &caps[0];
        if let Some(raw) = caps.get(1) {
            return match RcLink::parse(raw.as_str()).and_then(|l| table.get(&l).cloned()) {
                Some(record) => {
                    rewritten += 1;
                    format!(r##"href="#{}""##, record.anchor)
                }
                None => whole.to_owned(),
            };
        }
        let Some(raw) = caps.get(2).or_else(|| caps.get(3)) else {
            return whole.to_owned();
        };
        let Some(record) = RcLink::parse(raw.as_str()).and_then(|l| table.get(&l)) else {
            return whole.to_owned();
        };
        rewritten += 1;
        // `<a href="#…">rc://…</a>` already links; only its text changes.
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        if html[..start].ends_with('>') && html[end..].starts_with("</a>") {
            return encode_html(&record.title);
        }
        let trailing = &raw.as_str()[raw.as_str().trim_end_matches(['.', ',', ';', ':']).len()..];
        format!(
            r##"<a href="#{}">{}</a>{trailing}"##,
            record.anchor,
            encode_html(&record.title)
        )
    });
    tracing::debug!(rewritten, "rewrote rc links");
    out.into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct MapSource(HashMap<String, Article>);

    impl MapSource {
        fn with(mut self, path: &str, title: &str, body: &str) -> Self {
            self.0.insert(
                path.to_owned(),
                Article {
                    title: title.to_owned(),
                    body: body.to_owned(),
                },
            );
            self
        }
    }

    impl ArticleSource for MapSource {
        fn article(&self, link: &RcLink) -> Option<Article> {
            self.0.get(&link.path).cloned()
        }
    }

    fn ta() -> MapSource {
        MapSource::default()
            .with("translate/figs-metaphor", "Metaphor", "<p>A metaphor.</p>")
            .with(
                "translate/figs-simile",
                "Simile",
                r#"<p>Compare <a href="rc://*/tw/dict/bible/kt/grace">grace</a>.</p>"#,
            )
            .with(
                "translate/figs-a",
                "A",
                r#"<p>See <a href="rc://*/ta/man/translate/figs-b">b</a>.</p>"#,
            )
            .with(
                "translate/figs-b",
                "B",
                r#"<p>See <a href="rc://*/ta/man/translate/figs-a">a</a>.</p>"#,
            )
    }

    fn tw() -> MapSource {
        MapSource::default().with("bible/kt/grace", "grace, gracious", "<p>Favor.</p>")
    }

    #[test]
    fn parses_link_parts_and_anchor() {
        let link = RcLink::parse("rc://en/tw/dict/bible/kt/grace.md").unwrap();
        assert_eq!(link.resource, RcResource::Tw);
        assert_eq!(link.path, "bible/kt/grace");
        assert_eq!(link.canonical(), "rc://*/tw/dict/bible/kt/grace");
        assert_eq!(link.anchor(), "appendex--tw--bible--kt--grace");
        assert_eq!(link.article_key(), ("kt".to_owned(), "grace".to_owned()));
        assert!(RcLink::parse("rc://en/ult/book/tit/01/01").is_none());
    }

    #[test]
    fn same_article_shares_anchor_and_collects_back_refs() {
        let ta = ta();
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        let note = r#"<a href="rc://*/ta/man/translate/figs-metaphor">x</a>"#;
        resolver.register(note, r##"<a href="#nav-tit-1-1-abcd">1:1</a>"##);
        resolver.register(
            "[[rc://en/ta/man/translate/figs-metaphor]]",
            r##"<a href="#nav-tit-1-2-efgh">1:2</a>"##,
        );
        resolver.register(note, r##"<a href="#nav-tit-1-1-abcd">1:1</a>"##);

        let records = resolver.table().sorted(RcResource::Ta);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].anchor, "appendex--ta--translate--figs-metaphor");
        assert_eq!(records[0].back_refs.len(), 2);
        assert!(records[0].back_refs[0].contains("1:1"));
    }

    #[test]
    fn missing_article_gets_placeholder() {
        let ta = ta();
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        resolver.register("rc://*/ta/man/translate/figs-nothing", "");
        resolver.register("rc://*/tw/dict/bible/names/paul", "");
        let table = resolver.table();
        let missing = &table.ta["rc://*/ta/man/translate/figs-nothing"];
        assert_eq!(
            missing.title,
            "TA ARTICLE FOR translate :: figs-nothing NOT FOUND!"
        );
        assert!(missing.body.is_empty());
        assert_eq!(
            table.tw["rc://*/tw/dict/bible/names/paul"].title,
            "TW ARTICLE FOR names :: paul NOT FOUND!"
        );
    }

    #[test]
    fn links_inside_articles_are_resolved_recursively() {
        let (ta, tw) = (ta(), tw());
        let mut resolver = RcLinkResolver::new(Some(&ta), Some(&tw));
        resolver.register(
            r#"<a href="rc://*/ta/man/translate/figs-simile">s</a>"#,
            "1:1",
        );
        assert_eq!(resolver.resolve_nested(3), 1);

        let grace = &resolver.table().tw["rc://*/tw/dict/bible/kt/grace"];
        assert_eq!(grace.depth, 1);
        assert_eq!(
            grace.back_refs,
            vec![r##"<a href="#appendex--ta--translate--figs-simile">Simile</a>"##.to_owned()]
        );

        let appendix = resolver.render_appendix(
            RcResource::Ta,
            AppendixHeader {
                resource_title: "Translation Academy",
                book_title: "Titus",
                version: "v80",
            },
        );
        let body = resolver.rewrite_links(&appendix);
        assert!(body.contains(r##"<a href="#appendex--tw--bible--kt--grace">grace</a>"##));
    }

    #[test]
    fn cycles_and_depth_bound_terminate() {
        let ta = ta();
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        resolver.register("rc://*/ta/man/translate/figs-a", "x");
        assert_eq!(resolver.resolve_nested(10), 1);
        assert_eq!(resolver.resolve_nested(10), 0);
        assert_eq!(resolver.table().ta.len(), 2);
        let a = &resolver.table().ta["rc://*/ta/man/translate/figs-a"];
        assert_eq!(a.back_refs.len(), 2);

        let mut shallow = RcLinkResolver::new(Some(&ta), None);
        shallow.register("rc://*/ta/man/translate/figs-a", "x");
        assert_eq!(shallow.resolve_nested(0), 0);
        assert_eq!(shallow.table().ta.len(), 1);
    }

    #[test]
    fn appendix_sorts_titles_case_insensitively() {
        let ta = MapSource::default()
            .with("translate/b", "beta", "")
            .with("translate/a", "Alpha", "")
            .with("translate/c", "Gamma", "");
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        resolver.register(
            "rc://*/ta/man/translate/c rc://*/ta/man/translate/b rc://*/ta/man/translate/a",
            "r",
        );
        let html = resolver.render_appendix(
            RcResource::Ta,
            AppendixHeader {
                resource_title: "Translation Academy",
                book_title: "Titus",
                version: "v80",
            },
        );
        assert!(html.contains(r#"<div class="appendex ta section" id="appendex-ta""#));
        assert!(html.contains("logo-uta-256.png"));
        let alpha = html.find(">Alpha<").unwrap();
        let beta = html.find(">beta<").unwrap();
        let gamma = html.find(">Gamma<").unwrap();
        assert!(alpha < beta && beta < gamma);
        assert!(resolver.render_appendix(
            RcResource::Tw,
            AppendixHeader {
                resource_title: "Translation Words",
                book_title: "Titus",
                version: "v80",
            },
        )
        .is_empty());
    }

    #[test]
    fn rewrite_handles_each_link_form_once() {
        let (ta, tw) = (ta(), tw());
        let mut resolver = RcLinkResolver::new(Some(&ta), Some(&tw));
        let html = concat!(
            r#"<a href="rc://en/ta/man/translate/figs-metaphor">here</a> "#,
            "[[rc://*/ta/man/translate/figs-metaphor]] ",
            "see rc://*/tw/dict/bible/kt/grace. ",
            "and rc://*/ta/man/checking/unknown",
        );
        resolver.register(&html.replace("unknown", "nothing-here"), "r");
        let out = resolver.rewrite_links(html);
        assert!(out.contains(r##"<a href="#appendex--ta--translate--figs-metaphor">here</a>"##));
        assert!(out.contains(
            r##"<a href="#appendex--ta--translate--figs-metaphor">Metaphor</a> "##
        ));
        assert!(out.contains(
            r##"see <a href="#appendex--tw--bible--kt--grace">grace, gracious</a>. "##
        ));
        assert!(out.ends_with("rc://*/ta/man/checking/unknown"));
        assert_eq!(resolver.rewrite_links(&out), out);
    }

    #[test]
    fn autolinked_text_is_replaced_without_nesting_anchors() {
        let tw = tw();
        let mut resolver = RcLinkResolver::new(None, Some(&tw));
        let html = r#"<a href="rc://*/tw/dict/bible/kt/grace">rc://*/tw/dict/bible/kt/grace</a>"#;
        resolver.register(html, "r");
        assert_eq!(
            resolver.rewrite_links(html),
            r##"<a href="#appendex--tw--bible--kt--grace">grace, gracious</a>"##
        );
    }

    #[test]
    fn distinct_links_flattening_to_one_path_get_distinct_anchors() {
        let ta = MapSource::default().with("translate/figs-x", "X", "");
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        let html = concat!(
            "rc://*/ta/man/translate/figs-x ",
            "rc://*/ta/vol2/translate/figs-x ",
            "rc://*/ta/man/translate--figs-x",
        );
        resolver.register(html, "r");
        resolver.register("rc://en/ta/man/translate/figs-x", "s");

        let table = resolver.table();
        assert_eq!(table.ta.len(), 3);
        assert_eq!(
            table.ta["rc://*/ta/man/translate/figs-x"].anchor,
            "appendex--ta--translate--figs-x"
        );
        assert_eq!(
            table.ta["rc://*/ta/vol2/translate/figs-x"].anchor,
            "appendex--ta--translate--figs-x--2"
        );
        assert_eq!(
            table.ta["rc://*/ta/man/translate--figs-x"].anchor,
            "appendex--ta--translate--figs-x--3"
        );

        let appendix = resolver.render_appendix(
            RcResource::Ta,
            AppendixHeader {
                resource_title: "Translation Academy",
                book_title: "Titus",
                version: "v80",
            },
        );
        for anchor in [
            r#"id="appendex--ta--translate--figs-x""#,
            r#"id="appendex--ta--translate--figs-x--2""#,
            r#"id="appendex--ta--translate--figs-x--3""#,
        ] {
            assert_eq!(appendix.matches(anchor).count(), 1, "{anchor}");
        }
        let rewritten = resolver.rewrite_links(html);
        assert!(rewritten.contains(r##"href="#appendex--ta--translate--figs-x--2""##));
    }

    #[test]
    fn appendix_escapes_titles() {
        let ta = MapSource::default().with("translate/figs-and", "Merism & <Pairs>", "");
        let mut resolver = RcLinkResolver::new(Some(&ta), None);
        resolver.register("rc://*/ta/man/translate/figs-and", "r");
        let html = resolver.render_appendix(
            RcResource::Ta,
            AppendixHeader {
                resource_title: "Academy & Co",
                book_title: "Titus",
                version: "v80",
            },
        );
        assert!(html.contains(r#"class="header-link">Merism &amp; &lt;Pairs></a>"#));
        assert!(html.contains("Academy &amp; Co :: Merism &amp; &lt;Pairs>"));
        assert!(html.contains("<h1 class=\"header cover-header section-header\">Academy &amp; Co - Titus</h1>"));
        assert!(!html.contains("<Pairs>"));
    }
}
