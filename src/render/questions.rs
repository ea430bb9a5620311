use std::slice;

use crate::books;
use crate::error::RenderError;
use crate::formats::{CatalogEntry, HtmlSections, SectionCss};
use crate::markdown::{NoteContext, convert_note};
use crate::quote::AlignmentText;
use crate::render::notes::{TargetBible, book_chapters, chapter_verses, scripture_text};
use crate::render::{RenderContext, Rendered, entries_by_subject, finish_sections, require_subject};
use crate::tsv::{PivotedTsvIndex, TsvRow, pivot_tsv};

pub const WEB_CSS: &str = r#"
.tq-question {
  font-weight: bold;
}

.tq-entry {
  margin-left: 30px;
}

article.tq-scripture,
article.tq-entry,
section.tq-verse {
  break-before: auto !important;
  break-inside: avoid !important;
  break-after: auto !important
}

a.header-link {
  font-weight: inherit !important;
  font-size: inherit !important;
  color: #000000;
  text-decoration: none;
}

.response-show-checkbox {
  display: none;
}

#web-preview .response-show-checkbox ~ div.tq-entry-response {
  display: none;
  clear: both;
  margin-bottom: 20px;
}

#web-preview .response-show-checkbox:checked ~ div.tq-entry-response {
  display: block;
}

.tq-scripture-block {
  border: 1px solid black;
  padding: 10px;
  margin-bottom: 10px;
}

.tq-scripture-header {
  margin: 0;
}

.tq-scripture-text {
  font-style: italic;
}

.tq-chapter-section {
  break-after: page !important;
}
"#;

pub struct QuestionsDocument<'a> {
    pub entry: &'a CatalogEntry,
    pub book_id: &'a str,
    pub book_title: &'a str,
    pub questions: &'a PivotedTsvIndex,
    pub targets: &'a [TargetBible],
}

impl QuestionsDocument<'_> {
    pub fn build_body(&self) -> String {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        let tq_title = &entry.title;
        let mut html = format!(
            r##"
<div class="section tq-book-section" id="nav-{book_id}" data-toc-title="{tq_title} - {book_title}">
  <h1 class="header tq-book-section-header"><a href="#nav-{book_id}" class="header-link">{book_title}</a></h1>
"##
        );

        let front = self.questions.rows("front", "intro");
        if !front.is_empty() {
            html.push_str(&format!(
                r#"
  <div class="section tq-front-intro-section" id="nav-{book_id}-front-intro" data-toc-title="{book_title} Introduction">
"#
            ));
            for row in front {
                html.push_str(&format!(
                    r#"
    <div class="tq-front-intro-note" id="nav-{book_id}-front-intro-{}">
      <span class="header-title">{tq_title} :: {book_title} :: Introduction</span>
      <div class="tq-question-body">
        {}
        {}
      </div>
    </div>
"#,
                    row.id(),
                    self.markdown(row.value("Question"), "front"),
                    self.markdown(row.value("Response"), "front")
                ));
            }
            html.push_str("\n  </div>\n");
        }

        for chapter in book_chapters(self.targets, self.questions) {
            self.push_chapter(&mut html, &chapter);
        }
        html.push_str("\n</div>\n");
        html
    }

    fn push_chapter(&self, html: &mut String, chapter: &str) {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        html.push_str(&format!(
            r##"
  <div id="nav-{book_id}-{chapter}" class="section tq-chapter-section" data-toc-title="{book_title} {chapter}">
    <h2 class="tq-chapter-header"><a href="#nav-{book_id}-{chapter}" class="header-link">{book_title} {chapter}</a></h2>
"##
        ));

        let intro = self.questions.rows(chapter, "intro");
        if !intro.is_empty() {
            html.push_str("\n    <div class=\"section tq-chapter-intro-section\">\n");
            for row in intro {
                html.push_str(&format!(
                    r#"
      <div id="nav-{book_id}-{chapter}-intro-{}">
        <span class="header-title">{} :: {book_title} Introduction</span>
        {}
        {}
      </div>
"#,
                    row.id(),
                    entry.title,
                    self.markdown(row.value("Question"), chapter),
                    self.markdown(row.value("Response"), chapter)
                ));
            }
            html.push_str("\n    </div>\n");
        }

        for verse in chapter_verses(self.targets, self.questions, chapter) {
            self.push_verse(html, chapter, &verse);
        }
        html.push_str("\n  </div>\n");
    }

    fn push_verse(&self, html: &mut String, chapter: &str, verse: &str) {
        let Self {
            entry,
            book_id,
            book_title,
            ..
        } = *self;
        let verse_link = format!("nav-{book_id}-{chapter}-{verse}");
        html.push_str(&format!(
            r##"
    <div id="{verse_link}" class="section tq-chapter-verse-section">
      <h3 class="tq-verse-header"><a href="#{verse_link}" class="header-link">{book_title} {chapter}:{verse}</a></h3>
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
      <div class="tq-scripture-block" id="{scripture_link}">
        <h4 class="tq-scripture-header">
          <a href="#{scripture_link}" class="header-link">{}:</a>
        </h4>
        <div class="tq-scripture-text">
          {text}
        </div>
      </div>
"##,
                abbreviation.to_uppercase()
            ));
        }

        let rows = self.questions.rows(chapter, verse);
        if rows.is_empty() {
            html.push_str(
                r#"
      <div class="tq-verse-no-content">
        (There are no questions for this verse)
      </div>
"#,
            );
        }
        for row in rows {
            html.push_str(&self.question_article(row, chapter, verse, &verse_link));
        }
        html.push_str("\n    </div>\n");
    }

    fn question_article(&self, row: &TsvRow, chapter: &str, verse: &str, verse_link: &str) -> String {
        let question = row.value("Question");
        if question.is_empty() {
            return String::new();
        }
        let id = row.id();
        let question_link = format!("{verse_link}-{id}");
        let reference = row.reference();
        let verse_bridge = if reference != format!("{chapter}:{verse}") {
            format!(" ({reference})")
        } else {
            String::new()
        };
        let mut article = format!(
            r##"
      <div id="{question_link}" class="tq-question-article">
        <div class="tq-entry">
          <h4 class="tq-entry-question">
            <a class="header-link" href="#{question_link}">{question}{verse_bridge}</a>
          </h4>
"##
        );
        let response = row.value("Response");
        if !response.is_empty() {
            article.push_str(&format!(
                r#"
          <input type="checkbox" class="response-show-checkbox" id="checkbox-{id}" style="display:none;">
          <label class="response-show-label" for="checkbox-{id}"></label>
          <div class="tq-entry-response">
            {}
          </div>
"#,
                self.markdown(response, chapter)
            ));
        }
        article.push_str("\n        </div>\n      </div>\n");
        article
    }

    fn markdown(&self, text: &str, chapter: &str) -> String {
        convert_note(
            text,
            NoteContext {
                prefix: "nav",
                book_id: self.book_id,
                chapter,
            },
        )
    }
}

pub async fn render(
    ctx: &RenderContext,
    entry: &CatalogEntry,
    book_id: &str,
) -> anyhow::Result<Rendered> {
    let book = books::lookup(book_id)?;
    if entry.ingredient(book.id).is_none() {
        return Err(RenderError::BookNotInResource {
            book: book.id.to_owned(),
            resource: entry.full_name(),
        }
        .into());
    }
    let fetcher = ctx.fetcher.as_ref();
    let relations = fetcher
        .fetch_relation_entries(entry, &["Aligned Bible"])
        .await?;
    let mut target_entries = entries_by_subject(&relations, "Aligned Bible", Some(book.id));
    if target_entries.is_empty() {
        target_entries.push(require_subject(&relations, "Aligned Bible", Some(book.id))?);
    }

    let (target_files, tq_files) = tokio::try_join!(
        fetcher.fetch_book_files(&target_entries, book.id),
        fetcher.fetch_book_files(slice::from_ref(entry), book.id),
    )?;
    let questions = pivot_tsv(tq_files.first().map(String::as_str).unwrap_or_default());
    let targets: Vec<TargetBible> = target_entries
        .iter()
        .zip(&target_files)
        .map(|(entry, usfm)| TargetBible {
            entry: entry.clone(),
            text: AlignmentText::parse(usfm),
        })
        .collect();
    tracing::info!(
        book_id = %book.id,
        targets = targets.len(),
        questions = questions.row_count(),
        "building translation questions"
    );

    let book_title = entry
        .ingredient(book.id)
        .map(|i| i.title.as_str())
        .filter(|title| !title.is_empty())
        .unwrap_or(book.title)
        .to_owned();
    let body = QuestionsDocument {
        entry,
        book_id: book.id,
        book_title: &book_title,
        questions: &questions,
        targets: &targets,
    }
    .build_body();

    let mut built_with = vec![entry.clone()];
    built_with.extend(target_entries);
    let sections = HtmlSections {
        cover: format!(r#"<h3 class="cover-book-title">{book_title}</h3>"#),
        body,
        css: SectionCss {
            web: WEB_CSS.to_owned(),
            print: String::new(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, built_with).await
}
