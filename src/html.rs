use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use crate::formats::CatalogEntry;
use crate::markdown::{encode_html, markdown_to_html_fragment};

static FOOTNOTE_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<span([^>]+style="[^">]+#CCC[^">]+")"#).expect("footnote span regex")
});

const LOGO_BASE_URL: &str = "https://cdn.door43.org/assets/uw-icons";

/// Nested table of contents from elements carrying both `id` and `data-toc-title`.
pub fn generate_toc(body: &str) -> String {
    let fragment = Html::parse_fragment(body);
    format!(
        r#"
  <h1 class="toc-header">Table of Contents</h1>
  <div id="toc-contents">
    <ul class="toc-section top-toc-section">
      {}
    </ul>
  </div>
"#,
        toc_entries(fragment.root_element())
    )
}

fn toc_entries(parent: ElementRef<'_>) -> String {
    let mut html = String::new();
    for element in parent.children().filter_map(ElementRef::wrap) {
        let title = element.value().attr("data-toc-title");
        if let Some(title) = title
            && let Some(id) = element.value().id()
        {
            let (id, title) = (encode_html(id), encode_html(title));
            html.push_str(&format!(
                r##"
<li class="toc-entry">
  <a class="toc-element" href="#{id}"><span class="toc-element-title">{title}</span></a>
</li>
"##
            ));
        }
        let children = toc_entries(element);
        if children.is_empty() {
            continue;
        }
        if title.is_some() {
            html.push_str(&format!(
                r#"
<ul class="toc-section">
  {children}
</ul>
"#
            ));
        } else {
            html.push_str(&children);
        }
    }
    html
}

/// Spans styled with the `#CCC` footnote color get `class="footnote"`.
pub fn reclass_footnotes(html: &str) -> String {
    FOOTNOTE_SPAN_RE
        .replace_all(html, r#"<span$1 class="footnote""#)
        .into_owned()
}

fn logo_file(abbreviation: &str) -> String {
    let logo = match abbreviation {
        "ta" => "uta",
        "tn" => "utn",
        "tq" => "utq",
        "tw" => "utw",
        "ult" | "glt" => "ult",
        "ust" | "gst" => "ust",
        "obs" | "obs-sn" | "obs-sq" | "obs-tn" | "obs-tq" => "obs",
        _ => return "uW-app-256.png".to_owned(),
    };
    format!("logo-{logo}-256.png")
}

/// Cover page: logo, title and version, followed by the renderer's own cover fragment.
pub fn generate_cover(entry: &CatalogEntry, extra: &str) -> String {
    let logo = logo_file(&entry.abbreviation);
    format!(
        r#"
  <span class="header-title"></span>
  <img class="title-logo" src="{LOGO_BASE_URL}/{logo}" alt="{logo}">
  <h1 class="cover-header section-header">{}</h1>
  <h3 class="cover-version">{}</h3>
  {extra}
"#,
        entry.title, entry.branch_or_tag_name
    )
}

/// One block per resource used, then the main resource's license.
pub fn generate_copyright(entries: &[&CatalogEntry], license_md: Option<&str>) -> String {
    let mut html = String::from("<h1>Copyrights and Licensing</h1>");
    let mut seen: Vec<String> = Vec::new();
    for entry in entries {
        let name = entry.full_name();
        if seen.contains(&name) {
            continue;
        }
        seen.push(name);
        html.push_str(&format!(
            r#"
    <div style="padding-bottom: 10px">
      <div style="font-weight: bold">{}</div>
      <div><span style="font-weight: bold">Date:</span> {}</div>
      <div><span style="font-weight: bold">Version:</span> {}</div>
      <div><span style="font-weight: bold">Published by:</span> {}</div>
    </div>
"#,
            entry.title,
            release_date(entry.released.as_deref()),
            entry.branch_or_tag_name,
            encode_html(&entry.repo.owner)
        ));
    }
    if let Some(license) = license_md {
        html.push_str(r#"<div class="license">"#);
        html.push_str(&markdown_to_html_fragment(license));
        html.push_str("</div>");
    }
    html
}

fn release_date(released: Option<&str>) -> String {
    let Some(released) = released else {
        return "unknown".to_owned();
    };
    match chrono::DateTime::parse_from_rfc3339(released) {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => released.split('T').next().unwrap_or(released).to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(abbreviation: &str) -> anyhow::Result<CatalogEntry> {
        Ok(serde_yaml::from_str(&format!(
            "owner: unfoldingWord\nrepo: {{ name: en_{abbreviation}, owner: unfoldingWord }}\nsubject: Aligned Bible\ntitle: Literal Text\nabbreviation: {abbreviation}\nlanguage: en\nbranch_or_tag_name: v86\nreleased: \"2025-03-04T10:00:00+00:00\"\n"
        ))?)
    }

    #[test]
    fn toc_nests_titled_elements_in_document_order() {
        let body = r#"
<div class="section" id="nav-tit" data-toc-title="Titus">
  <div class="section" id="nav-tit-1" data-toc-title="Titus 1">
    <div class="article" id="nav-tit-1-1"></div>
  </div>
  <div><span id="nav-tit-2" data-toc-title="Titus 2"></span></div>
</div>
<div class="appendex" id="appendex-ta" data-toc-title="Appendix: TA"></div>
"#;
        let toc = generate_toc(body);
        assert!(toc.contains(r#"<ul class="toc-section top-toc-section">"#));
        let titus = toc.find(r##"href="#nav-tit""##).unwrap();
        let one = toc.find(r##"href="#nav-tit-1""##).unwrap();
        let two = toc.find(r##"href="#nav-tit-2""##).unwrap();
        let appendix = toc.find(r##"href="#appendex-ta""##).unwrap();
        assert!(titus < one && one < two && two < appendix);
        assert!(!toc.contains("nav-tit-1-1"));
        assert_eq!(toc.matches(r#"<ul class="toc-section">"#).count(), 1);
    }

    #[test]
    fn footnote_spans_are_reclassed() {
        let html = r#"<span style="color: #CCC; font-size: 0.8em">note</span><span style="color: red">x</span>"#;
        let out = reclass_footnotes(html);
        assert!(out.starts_with(r#"<span style="color: #CCC; font-size: 0.8em" class="footnote">"#));
        assert_eq!(out.matches("footnote").count(), 1);
    }

    #[test]
    fn footnote_color_matches_any_case() {
        let out = reclass_footnotes(r#"<span style="color: #ccc; font-size: 0.8em">note</span>"#);
        assert_eq!(
            out,
            r#"<span style="color: #ccc; font-size: 0.8em" class="footnote">note</span>"#
        );
    }

    #[test]
    fn toc_titles_are_escaped() {
        let toc = generate_toc(r#"<div id="nav-a" data-toc-title="Sin &amp; &lt;Grace&gt;"></div>"#);
        assert!(toc.contains(r#"<span class="toc-element-title">Sin &amp; &lt;Grace></span>"#));
    }

    #[test]
    fn cover_uses_logo_for_abbreviation() -> anyhow::Result<()> {
        let cover = generate_cover(&entry("ult")?, "<h3>Titus</h3>");
        assert!(cover.contains("logo-ult-256.png"));
        assert!(cover.contains(r#"<h3 class="cover-version">v86</h3>"#));
        assert!(generate_cover(&entry("xyz")?, "").contains("uW-app-256.png"));
        Ok(())
    }

    #[test]
    fn copyright_lists_each_entry_once_with_license() -> anyhow::Result<()> {
        let ult = entry("ult")?;
        let html = generate_copyright(&[&ult, &ult], Some("# License\n\nCC BY-SA 4.0"));
        assert_eq!(html.matches("Literal Text").count(), 1);
        assert!(html.contains("2025-03-04"));
        assert!(html.contains(r#"<div class="license"><h1>License</h1>"#));
        Ok(())
    }
}
