use std::collections::BTreeSet;
use std::slice;

use crate::books::{self, Testament};
use crate::formats::{CatalogEntry, HtmlSections, SectionCss};
use crate::helps::HelpManuals;
use crate::markdown::{NoteContext, convert_note, encode_html};
use crate::quote::{AlignmentText, GlQuoteOptions, add_gl_quotes};
use crate::rc_link::{AppendixHeader, ArticleSource, RcLinkResolver, RcResource, back_ref_link};
use crate::render::{RenderContext, Rendered, entries_by_subject, finish_sections, require_subject};
use crate::tsv::{PivotedTsvIndex, TsvRow, pivot_tsv};
use crate::usfm::expand_verse_list;

pub const REQUIRED_SUBJECTS: [&str; 6] = [
    "Aligned Bible",
    "Translation Academy",
    "Translation Words",
    "TSV Translation Words Links",
    "Hebrew Old Testament",
    "Greek New Testament",
];

pub const WEB_CSS: &str = r#"
.tn-book-section-header {
  break-after: avoid !important;
}

.tn-scripture-block {
  border: 1px solid black;
  padding: 10px;
  margin-bottom: 10px;
}

.tn-scripture-header {
  margin: 0;
}

.tn-scripture-text {
  font-style: italic;
}

.tn-note-label,
.tn-note-quote {
  font-weight: bold;
}

.tn-note-support-reference,
.tn-note-quote {
  margin-bottom: 10px;
}

.article {
  break-after: auto !important;
  orphans: 2;
  widows: 2;
}

a.header-link {
  font-weight: inherit !important;
  font-size: inherit !important;
  color: #000000;
  text-decoration: none;
}

a.header-link:hover::after {
  content: '#' attr(data-descr);
  padding-left: 5px;
  color: blue;
  display: inline-block;
}

.title-page {
  text-align: center;
}

.tn-verse-twl-bible {
  margin-bottom: 0;
}

.tn-verse-twl-list {
  margin: 0;
}

.tn-verse-twl-list-item a {
  text-decoration: none;
}

.tn-note-body h4 {
  margin-left: 10px !important;
  font-size: 1.2em !important;
}

.tn-note-body h5 {
  margin-left: 30px !important;
  font-size: 1.1em !important;
}

.tn-note-body h6 {
  margin-left: 50px !important;
  font-size: 1em !important;
}
"#;

pub const PRINT_CSS: &str = r#"
html {
  font-size: 10pt !important;
}

.article {
  break-before: auto !important;
  break-after: auto !important;
}
"#;

/// A target Bible: its catalog entry and parsed, aligned text.
#[derive(Debug, Clone)]
pub struct TargetBible {
    pub entry: CatalogEntry,
    pub text: AlignmentText,
}

/// Everything the notes body is built from, already fetched and quote-annotated.
pub struct NotesDocument<'a> {
    pub entry: &'a CatalogEntry,
    pub book_id: &'a str,
    pub book_title: &'a str,
    pub notes: &'a PivotedTsvIndex,
    pub word_links: &'a PivotedTsvIndex,
    pub targets: &'a [TargetBible],
    pub tw_title: Option<&'a str>,
}

impl NotesDocument<'_> {
    /// Main body; every `rc://` link is registered with `resolver` along the way.
    pub fn build_body(&self, resolver: &mut RcLinkResolver<'_>) -> String {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        let tn_title = &entry.title;
        let mut html = format!(
            r##"
<div class="section tn-book-section" id="nav-{book_id}" data-toc-title="{tn_title} - {book_title}">
  <h1 class="header tn-book-section-header"><a href="#nav-{book_id}" class="header-link">{tn_title} - {book_title}</a></h1>
"##
        );

        let front = self.notes.rows("front", "intro");
        if !front.is_empty() {
            html.push_str(&format!(
                r#"
  <div id="nav-{book_id}-front-intro" class="section tn-front-intro-section" data-toc-title="{book_title} Introduction">
"#
            ));
            for row in front {
                let link = format!("nav-{book_id}-front-intro-{}", row.id());
                let article = format!(
                    r#"
    <div class="article tn-front-intro-note" id="{link}">
      <span class="header-title">{tn_title} :: {book_title} :: Introduction</span>
      <div class="tn-note-body">
{}
      </div>
    </div>
"#,
                    self.note_html(row, "front")
                );
                resolver.register(&article, &back_ref_link(&link, row.reference()));
                html.push_str(&article);
            }
            html.push_str("\n  </div>\n");
        }

        for chapter in book_chapters(self.targets, self.notes) {
            self.push_chapter(&mut html, &chapter, resolver);
        }
        html.push_str("\n</div>\n");
        html
    }

    fn push_chapter(&self, html: &mut String, chapter: &str, resolver: &mut RcLinkResolver<'_>) {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        html.push_str(&format!(
            r##"
  <div id="nav-{book_id}-{chapter}" class="section tn-chapter-section" data-toc-title="{book_title} {chapter}">
    <h2 class="header tn-chapter-header"><a href="#nav-{book_id}-{chapter}" class="header-link">{book_title} {chapter}</a></h2>
"##
        ));

        let intro = self.notes.rows(chapter, "intro");
        if !intro.is_empty() {
            html.push_str(&format!(
                r#"
    <div class="section tn-chapter-intro-section" id="nav-{book_id}-{chapter}-intro">
"#
            ));
            for row in intro {
                let link = format!("nav-{book_id}-{chapter}-intro-{}", row.id());
                let article = format!(
                    r#"
      <div class="article tn-note-body" id="{link}">
        <span class="header-title">{} :: {book_title} {chapter} Introduction</span>
        {}
      </div>
"#,
                    entry.title,
                    self.note_html(row, chapter)
                );
                resolver.register(&article, &back_ref_link(&link, row.reference()));
                html.push_str(&article);
            }
            html.push_str("\n    </div>\n");
        }

        for verse in chapter_verses(self.targets, self.notes, chapter) {
            self.push_verse(html, chapter, &verse, resolver);
        }
        html.push_str("\n  </div>\n");
    }

    fn push_verse(
        &self,
        html: &mut String,
        chapter: &str,
        verse: &str,
        resolver: &mut RcLinkResolver<'_>,
    ) {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        let verse_link = format!("nav-{book_id}-{chapter}-{verse}");
        html.push_str(&format!(
            r##"
    <div id="{verse_link}" class="section tn-chapter-verse-section">
      <h3 class="header tn-verse-header"><a href="#{verse_link}" class="header-link">{book_title} {chapter}:{verse}</a></h3>
      <span class="header-title">{} :: {book_title} {chapter}:{verse}</span>
"##,
            entry.title
        ));

        for target in self.targets {
            let Some(text) = scripture_text(target, chapter, verse) else {
                continue;
            };
            let abbreviation = &target.entry.abbreviation;
            let scripture_link = format!("{verse_link}-{abbreviation}");
            html.push_str(&format!(
                r##"
      <div class="article tn-scripture-block" id="{scripture_link}">
        <h4 class="header tn-scripture-header">
          <a href="#{scripture_link}" class="header-link" data-descr="{abbreviation}">
            {}:
          </a>
        </h4>
        <div class="tn-scripture-text">
          {text}
        </div>
      </div>
"##,
                abbreviation.to_uppercase()
            ));
        }

        let rows = self.notes.rows(chapter, verse);
        if rows.is_empty() {
            html.push_str(
                r#"
      <div class="article tn-verse-no-content">
        (There are no notes for this verse)
      </div>
"#,
            );
        }
        for row in rows {
            let note_link = format!("{verse_link}-{}", row.id());
            let article = self.note_article(row, chapter, verse, &note_link);
            resolver.register(&article, &back_ref_link(&note_link, row.reference()));
            html.push_str(&article);
        }

        let word_links = self.word_links.rows(chapter, verse);
        if !word_links.is_empty() {
            let article = self.word_links_article(word_links, chapter, verse);
            resolver.register(
                &article,
                &back_ref_link(&verse_link, &format!("{chapter}:{verse}")),
            );
            html.push_str(&article);
        }

        html.push_str("\n  <hr style=\"width: 100%\"/>\n</div>\n");
    }

    fn note_article(&self, row: &TsvRow, chapter: &str, verse: &str, note_link: &str) -> String {
        let reference = row.reference();
        let verse_bridge = if reference != format!("{chapter}:{verse}") {
            format!(" ({reference})")
        } else {
            String::new()
        };
        let id = row.id();
        let mut article = format!(
            r#"
          <div class="article tn-note-article" id="{note_link}">
"#
        );

        let quote = row.value("Quote");
        if quote.is_empty() || quote.ends_with(':') {
            article.push_str(&format!(
                r##"
            <h4 class="header tn-note-header">
              <a href="#{note_link}" class="header-link" data-descr="{id}">
              Note:{verse_bridge}
              </a>
            </h4>
"##
            ));
        } else {
            for (index, target) in self.targets.iter().enumerate() {
                let gl_quote = row.value(&format!("GLQuote{index}"));
                let shown = if gl_quote.is_empty() {
                    format!(r#"<span style="color: red">"{quote}" (ORIG QUOTE)</span>"#)
                } else {
                    gl_quote.to_owned()
                };
                article.push_str(&format!(
                    r##"
            <h4 class="header tn-note-header">
              <a href="#{note_link}" class="header-link" data-descr="{id}">
              {shown}{verse_bridge} ({})
              </a>
            </h4>
"##,
                    target.entry.abbreviation.to_uppercase()
                ));
            }
        }

        article.push_str(&format!(
            r#"
          <span class="header-title">{} :: {} {reference}</span>
          <div class="tn-note-body">
            {}
          </div>
"#,
            self.entry.title,
            self.book_title,
            self.note_html(row, chapter)
        ));

        let support_reference = row.value("SupportReference");
        if !support_reference.is_empty() {
            article.push_str(&format!(
                r#"
      <div class="tn-note-support-reference">
        <span class="tn-note-label">Support Reference:&nbsp;</span>
          [[{support_reference}]]
      </div>
"#
            ));
        }
        article.push_str("\n    <hr style=\"width: 75%\"/>\n  </div>\n");
        article
    }

    fn word_links_article(&self, rows: &[TsvRow], chapter: &str, verse: &str) -> String {
        let book_id = self.book_id;
        let mut article = format!(
            r#"
      <div class="article tn-verse-twls" id="twl-{book_id}-{chapter}-{verse}">
        <h4 class="header tn-verse-twl-header">{}</h4>
"#,
            self.tw_title.unwrap_or("Translation Words")
        );
        for (index, target) in self.targets.iter().enumerate() {
            article.push_str(&format!(
                r#"
        <h5 class="tn-verse-twl-bible">{}</h5>
        <ul class="tn-verse-twl-list">
"#,
                target.entry.abbreviation.to_uppercase()
            ));
            for row in rows {
                let gl_quote = row.value(&format!("GLQuote{index}"));
                let shown = if gl_quote.is_empty() {
                    format!("{} (ORIG QUOTE)", row_quote(row))
                } else {
                    gl_quote.to_owned()
                };
                article.push_str(&format!(
                    r#"
            <li class="tn-verse-twl-list-item"><a href="{}">{shown}</a></li>
"#,
                    row.value("TWLink")
                ));
            }
            article.push_str("\n        </ul>\n");
        }
        article.push_str("\n      </div>\n");
        article
    }

    fn note_html(&self, row: &TsvRow, chapter: &str) -> String {
        convert_note(
            row.value("Note"),
            NoteContext {
                prefix: "nav",
                book_id: self.book_id,
                chapter,
            },
        )
    }
}

/// Numeric chapters of the first target Bible plus any the index mentions.
pub(crate) fn book_chapters(targets: &[TargetBible], index: &PivotedTsvIndex) -> Vec<String> {
    let mut chapters: BTreeSet<u32> = targets
        .first()
        .map(|target| {
            target
                .text
                .document
                .chapters()
                .filter_map(|c| c.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    chapters.extend(index.chapters().filter_map(|c| c.parse::<u32>().ok()));
    chapters.into_iter().map(|c| c.to_string()).collect()
}

/// Every verse number in the chapter, bridges expanded.
pub(crate) fn chapter_verses(
    targets: &[TargetBible],
    index: &PivotedTsvIndex,
    chapter: &str,
) -> Vec<String> {
    let mut verses: BTreeSet<u32> = BTreeSet::new();
    if let Some(target) = targets.first() {
        for (key, _) in target.text.document.verses(chapter) {
            verses.extend(expand_verse_list(key).unwrap_or_default());
        }
    }
    verses.extend(
        index
            .verses(chapter)
            .filter_map(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0),
    );
    verses.into_iter().map(|v| v.to_string()).collect()
}

/// Scripture text of `chapter:verse` in `target`, with ` (vvN-M)` when the verse is bridged.
pub(crate) fn scripture_text(target: &TargetBible, chapter: &str, verse: &str) -> Option<String> {
    let document = &target.text.document;
    let key = document.find_verse_key(chapter, verse)?;
    let text = encode_html(document.verse_text(chapter, verse).unwrap_or_default());
    Some(if key != verse {
        format!("{text} (vv{key})")
    } else {
        text
    })
}

/// Word-links files name the quote column `OrigWords`.
fn row_quote(row: &TsvRow) -> &str {
    match row.value("Quote") {
        "" => row.value("OrigWords"),
        quote => quote,
    }
}

fn appendix_header<'e>(entry: &'e CatalogEntry, book_title: &'e str) -> AppendixHeader<'e> {
    AppendixHeader {
        resource_title: &entry.title,
        book_title,
        version: &entry.branch_or_tag_name,
    }
}

/// Resolves nested links, appends the TA and TW appendices, then rewrites every link.
pub fn assemble_with_appendices(
    body: &str,
    mut resolver: RcLinkResolver<'_>,
    max_depth: u32,
    ta: Option<AppendixHeader<'_>>,
    tw: Option<AppendixHeader<'_>>,
) -> String {
    resolver.resolve_nested(max_depth);
    let mut html = body.to_owned();
    if let Some(header) = ta {
        html.push_str(&resolver.render_appendix(RcResource::Ta, header));
    }
    if let Some(header) = tw {
        html.push_str(&resolver.render_appendix(RcResource::Tw, header));
    }
    tracing::debug!(
        ta = resolver.table().ta.len(),
        tw = resolver.table().tw.len(),
        "built appendices"
    );
    resolver.rewrite_links(&html)
}

pub async fn render(
    ctx: &RenderContext,
    entry: &CatalogEntry,
    book_id: &str,
) -> anyhow::Result<Rendered> {
    let book = books::lookup(book_id)?;
    if entry.ingredient(book.id).is_none() {
        return Err(crate::error::RenderError::BookNotInResource {
            book: book.id.to_owned(),
            resource: entry.full_name(),
        }
        .into());
    }
    let fetcher = ctx.fetcher.as_ref();
    let relations = fetcher
        .fetch_relation_entries(entry, &REQUIRED_SUBJECTS)
        .await?;

    let source_subject = match book.testament {
        Testament::Old => "Hebrew Old Testament",
        Testament::New => "Greek New Testament",
    };
    let source_entry = require_subject(&relations, source_subject, Some(book.id))?;
    let target_entries = entries_by_subject(&relations, "Aligned Bible", Some(book.id));
    if target_entries.is_empty() {
        require_subject(&relations, "Aligned Bible", Some(book.id))?;
    }
    let ta_entry = entries_by_subject(&relations, "Translation Academy", None)
        .into_iter()
        .next();
    let tw_entry = entries_by_subject(&relations, "Translation Words", None)
        .into_iter()
        .next();
    let twl_entry = entries_by_subject(&relations, "TSV Translation Words Links", Some(book.id))
        .into_iter()
        .next();

    let (source_files, target_files, tn_files, twl_files, ta_archive, tw_archive) = tokio::try_join!(
        fetcher.fetch_book_files(slice::from_ref(&source_entry), book.id),
        fetcher.fetch_book_files(&target_entries, book.id),
        fetcher.fetch_book_files(slice::from_ref(entry), book.id),
        async {
            match &twl_entry {
                Some(twl) => fetcher.fetch_book_files(slice::from_ref(twl), book.id).await,
                None => Ok(Vec::new()),
            }
        },
        async {
            match &ta_entry {
                Some(ta) => fetcher.fetch_zip(ta).await.map(Some),
                None => Ok(None),
            }
        },
        async {
            match &tw_entry {
                Some(tw) => fetcher.fetch_zip(tw).await.map(Some),
                None => Ok(None),
            }
        },
    )?;
    tracing::info!(
        book_id = %book.id,
        targets = target_entries.len(),
        twl = twl_entry.is_some(),
        "fetched translation notes inputs"
    );

    let mut notes = pivot_tsv(tn_files.first().map(String::as_str).unwrap_or_default());
    let mut word_links = pivot_tsv(twl_files.first().map(String::as_str).unwrap_or_default());
    let source = AlignmentText::parse(source_files.first().map(String::as_str).unwrap_or_default());
    let targets: Vec<TargetBible> = target_entries
        .iter()
        .zip(&target_files)
        .map(|(entry, usfm)| TargetBible {
            entry: entry.clone(),
            text: AlignmentText::parse(usfm),
        })
        .collect();
    let target_texts: Vec<AlignmentText> = targets.iter().map(|t| t.text.clone()).collect();
    let options = GlQuoteOptions {
        delimiter: ctx.config.quote_token_delimiter.clone(),
        chunk_size: ctx.config.quote_chunk_size,
    };
    for index in [&mut notes, &mut word_links] {
        let mut rows = index.flatten();
        for row in &mut rows {
            if row.value("Quote").is_empty() && !row.value("OrigWords").is_empty() {
                let quote = row.value("OrigWords").to_owned();
                row.set("Quote", quote);
            }
        }
        let filled = add_gl_quotes(
            &mut rows,
            &source,
            &target_texts,
            ctx.aligner.as_ref(),
            &ctx.quote_cache,
            &options,
        )
        .await;
        tracing::debug!(rows = rows.len(), filled, "added gl quotes");
        *index = index.rebuild(rows)?;
    }

    let ta = match (&ta_entry, &ta_archive) {
        (Some(entry), Some(archive)) => Some(HelpManuals::load_ta(entry, archive)?),
        _ => None,
    };
    let tw = match (&tw_entry, &tw_archive) {
        (Some(entry), Some(archive)) => Some(HelpManuals::load_tw(entry, archive)?),
        _ => None,
    };

    let book_title = targets
        .first()
        .and_then(|t| t.text.document.book_title())
        .unwrap_or(book.title)
        .to_owned();
    let document = NotesDocument {
        entry,
        book_id: book.id,
        book_title: &book_title,
        notes: &notes,
        word_links: &word_links,
        targets: &targets,
        tw_title: tw_entry.as_ref().map(|e| e.title.as_str()),
    };
    let mut resolver = RcLinkResolver::new(
        ta.as_ref().map(|m| m as &dyn ArticleSource),
        tw.as_ref().map(|m| m as &dyn ArticleSource),
    );
    let body = document.build_body(&mut resolver);
    let html = assemble_with_appendices(
        &body,
        resolver,
        ctx.config.max_rc_depth,
        ta_entry.as_ref().map(|e| appendix_header(e, &book_title)),
        tw_entry.as_ref().map(|e| appendix_header(e, &book_title)),
    );

    let mut built_with = vec![entry.clone(), source_entry];
    built_with.extend(target_entries);
    built_with.extend(ta_entry);
    built_with.extend(tw_entry);
    built_with.extend(twl_entry);

    let sections = HtmlSections {
        cover: format!(r#"<h3 class="cover-book-title">{book_title}</h3>"#),
        body: html,
        css: SectionCss {
            web: WEB_CSS.to_owned(),
            print: PRINT_CSS.to_owned(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, built_with).await
}
