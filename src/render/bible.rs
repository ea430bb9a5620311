use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::books;
use crate::fetch::ResourceArchive;
use crate::formats::{CatalogEntry, HtmlSections, MetadataType, SectionCss};
use crate::html::reclass_footnotes;
use crate::render::usfm_html::UsfmRenderFlags;
use crate::render::{RenderContext, Rendered, finish_sections};
use crate::usfm::UsfmDocument;

static VERSE_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span id="chapter-(\d+)-verse-([\d-]+)"([^>]*)>([\d-]*)</span>"#)
        .expect("verse span regex")
});
static CHAPTER_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span id="chapter-(\d+)"([^>]+)>(\d+)</span>"#).expect("chapter span regex")
});

pub const WEB_CSS: &str = r#"
h1 {
  column-span: all;
}

.new-page {
  break-after: page;
  column-span: all;
}

.header-link {
  text-decoration: none;
  color: inherit;
}
"#;

pub const PRINT_CSS: &str = r#"
span.footnote {
  float: footnote;
  font-size: 8pt;
  color: black !important;
}

.verse-label {
  font-weight: bold;
  font-size: 0.7em;
  vertical-align: super;
}
"#;

/// Navigation anchors for chapter and verse spans, plus footnote classes.
pub fn postprocess(html: &str, book_id: &str, book_title: &str) -> String {
    let html = VERSE_SPAN_RE.replace_all(html, |caps: &Captures| {
        format!(
            r##"<span id="nav-{book_id}-{}-{}"{}><a href="#nav-{book_id}-{}-{}" class="header-link">{}</a></span>"##,
            &caps[1], &caps[2], &caps[3], &caps[1], &caps[2], &caps[4]
        )
    });
    let html = CHAPTER_SPAN_RE.replace_all(&html, |caps: &Captures| {
        format!(
            r##"<span id="nav-{book_id}-{0}" data-toc-title="{book_title} {0}"{1}><a href="#nav-{book_id}-{0}-1" class="header-link">{2}</a></span>"##,
            &caps[1], &caps[2], &caps[3]
        )
    });
    let html = reclass_footnotes(&html);
    format!(
        r#"<div class="section bible-book" id="nav-{book_id}" data-toc-title="{book_title}">{html}</div>"#
    )
}

/// tS repositories keep one text file per chunk under `<chapter>/<verse>.txt`.
pub fn ts_to_usfm(entry: &CatalogEntry, book_id: &str, archive: &ResourceArchive) -> String {
    let book_title = ["front/title.txt", "00/title.txt"]
        .iter()
        .find_map(|path| archive.read_to_string(path))
        .map(|title| title.trim().to_owned())
        .or_else(|| entry.ingredient(book_id).map(|i| i.title.clone()))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| book_id.to_uppercase());

    let mut usfm = format!(
        "\\id {} {}\n\\usfm 3.0\n\\ide UTF-8\n\\h {book_title}\n\\toc1 {book_title}\n\\toc2 {book_title}\n\\toc3 {book_title}\n\\mt {book_title}\n\n",
        book_id.to_uppercase(),
        entry.title
    );

    let mut chunks: Vec<(u32, u32, &str)> = archive
        .paths()
        .filter_map(|path| {
            let (chapter, file) = path.split_once('/')?;
            let verse = file.strip_suffix(".txt")?;
            Some((chapter.parse().ok()?, verse.parse().ok()?, path))
        })
        .filter(|(chapter, verse, _)| *chapter > 0 && *verse > 0)
        .collect();
    chunks.sort();

    for (chapter, verse, path) in chunks {
        let Some(mut text) = archive.read_to_string(path) else {
            continue;
        };
        if verse == 1 && !text.contains(&format!("\\c {chapter}")) {
            text = format!("\\c {chapter}\n{text}");
        }
        usfm.push_str(&format!("\\p\n{text}\n"));
    }
    usfm
}

pub async fn render(ctx: &RenderContext, entry: &CatalogEntry, book_id: &str) -> anyhow::Result<Rendered> {
    let book = books::lookup(book_id)?;
    let usfm = match entry.metadata_type {
        MetadataType::Ts => {
            let archive = ctx.fetcher.fetch_zip(entry).await?;
            ts_to_usfm(entry, book.id, &archive)
        }
        MetadataType::Rc | MetadataType::Sb => ctx
            .fetcher
            .fetch_book_files(std::slice::from_ref(entry), book.id)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default(),
    };

    let document = UsfmDocument::parse(&usfm);
    let book_title = document.book_title().unwrap_or(book.title).to_owned();
    let html = ctx.usfm_renderer.render(&usfm, UsfmRenderFlags::default());
    let body = postprocess(&html, book.id, &book_title);
    tracing::info!(book_id = %book.id, chapters = document.chapters().count(), "rendered bible book");

    let sections = HtmlSections {
        cover: format!(r#"<h3 class="cover-book-title">{book_title}</h3>"#),
        body,
        css: SectionCss {
            web: WEB_CSS.to_owned(),
            print: PRINT_CSS.to_owned(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, vec![entry.clone()]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postprocess_rewrites_spans_to_nav_anchors() {
        let html = concat!(
            r#"<span id="chapter-1" class="chapter-label">1</span>"#,
            r#"<span id="chapter-1-verse-4-5" class="verse-label">4-5</span> text"#,
            r#"<span style="color: #CCC; font-size: 0.8em">note</span>"#,
        );
        let out = postprocess(html, "tit", "Titus");
        assert!(out.starts_with(
            r#"<div class="section bible-book" id="nav-tit" data-toc-title="Titus">"#
        ));
        assert!(out.contains(
            r##"<span id="nav-tit-1" data-toc-title="Titus 1" class="chapter-label"><a href="#nav-tit-1-1" class="header-link">1</a></span>"##
        ));
        assert!(out.contains(
            r##"<span id="nav-tit-1-4-5" class="verse-label"><a href="#nav-tit-1-4-5" class="header-link">4-5</a></span>"##
        ));
        assert!(out.contains(r#"class="footnote""#));
    }

    #[test]
    fn ts_chunks_become_usfm_in_numeric_order() -> anyhow::Result<()> {
        let entry: CatalogEntry = serde_yaml::from_str(
            "owner: x\nrepo: { name: tit_ts, owner: x }\nsubject: Bible\ntitle: Test Bible\nabbreviation: tb\nlanguage: xx\nmetadata_type: ts\n",
        )?;
        let mut archive = ResourceArchive::default();
        archive.insert("front/title.txt", "Tito\n");
        archive.insert("01/01.txt", "\\v 1 One");
        archive.insert("01/10.txt", "\\v 10 Ten");
        archive.insert("01/02.txt", "\\v 2 Two");
        archive.insert("02/01.txt", "\\c 2 \\v 1 Again");

        let usfm = ts_to_usfm(&entry, "tit", &archive);
        assert!(usfm.starts_with("\\id TIT Test Bible\n"));
        assert!(usfm.contains("\\h Tito\n"));
        let two = usfm.find("Two").unwrap();
        let ten = usfm.find("Ten").unwrap();
        assert!(two < ten);
        assert!(usfm.contains("\\c 1\n\\v 1 One"));
        assert_eq!(usfm.matches("\\c 2").count(), 1);

        let doc = UsfmDocument::parse(&usfm);
        assert_eq!(doc.verse_text("1", "10"), Some("Ten"));
        assert_eq!(doc.verse_text("2", "1"), Some("Again"));
        Ok(())
    }
}
