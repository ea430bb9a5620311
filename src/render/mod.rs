pub mod bible;
pub mod manuals;
pub mod notes;
pub mod obs;
pub mod questions;
pub mod usfm_html;

use std::sync::Arc;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::fetch::ResourceFetcher;
use crate::formats::{CatalogEntry, HtmlSections};
use crate::html::{generate_copyright, generate_toc};
use crate::quote::{QuoteAligner, QuoteCache, WordAlignmentAligner};
use usfm_html::{BasicUsfmHtmlRenderer, UsfmHtmlRenderer};

/// Collaborators shared by every renderer. Cloning shares the quote cache.
#[derive(Clone)]
pub struct RenderContext {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub config: RenderConfig,
    pub quote_cache: Arc<QuoteCache>,
    pub aligner: Arc<dyn QuoteAligner>,
    pub usfm_renderer: Arc<dyn UsfmHtmlRenderer>,
}

impl RenderContext {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, config: RenderConfig) -> Self {
        Self {
            fetcher,
            config,
            quote_cache: Arc::new(QuoteCache::default()),
            aligner: Arc::new(WordAlignmentAligner),
            usfm_renderer: Arc::new(BasicUsfmHtmlRenderer),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sections: HtmlSections,
    /// Every catalog entry whose content went into the document.
    pub built_with: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Bible,
    TranslationNotes,
    TranslationQuestions,
    OpenBibleStories,
    TranslationAcademy,
    TranslationWords,
}

impl ResourceKind {
    pub fn from_subject(subject: &str) -> Result<Self, RenderError> {
        match subject {
            "Bible" | "Aligned Bible" | "Hebrew Old Testament" | "Greek New Testament" => {
                Ok(Self::Bible)
            }
            "TSV Translation Notes" => Ok(Self::TranslationNotes),
            "TSV Translation Questions" => Ok(Self::TranslationQuestions),
            "Open Bible Stories" => Ok(Self::OpenBibleStories),
            "Translation Academy" => Ok(Self::TranslationAcademy),
            "Translation Words" => Ok(Self::TranslationWords),
            other => Err(RenderError::UnsupportedSubject(other.to_owned())),
        }
    }

    pub fn needs_book(self) -> bool {
        matches!(
            self,
            Self::Bible | Self::TranslationNotes | Self::TranslationQuestions
        )
    }
}

/// Renders `entry` into a fresh set of HTML sections.
pub async fn render(
    ctx: &RenderContext,
    entry: &CatalogEntry,
    book_id: Option<&str>,
) -> anyhow::Result<Rendered> {
    let kind = ResourceKind::from_subject(&entry.subject)?;
    let book_id = match (kind.needs_book(), book_id) {
        (true, Some(book_id)) => book_id.trim().to_lowercase(),
        (true, None) => anyhow::bail!("{} needs a book id", entry.subject),
        (false, _) => String::new(),
    };
    tracing::info!(resource = %entry.full_name(), ?kind, book_id = %book_id, "rendering");

    match kind {
        ResourceKind::Bible => bible::render(ctx, entry, &book_id).await,
        ResourceKind::TranslationNotes => notes::render(ctx, entry, &book_id).await,
        ResourceKind::TranslationQuestions => questions::render(ctx, entry, &book_id).await,
        ResourceKind::OpenBibleStories => obs::render(ctx, entry).await,
        ResourceKind::TranslationAcademy => manuals::render_ta(ctx, entry).await,
        ResourceKind::TranslationWords => manuals::render_tw(ctx, entry).await,
    }
}

/// Entries with `subject`, optionally only those carrying `book_id`.
pub fn entries_by_subject(
    entries: &[CatalogEntry],
    subject: &str,
    book_id: Option<&str>,
) -> Vec<CatalogEntry> {
    entries
        .iter()
        .filter(|entry| entry.subject == subject)
        .filter(|entry| book_id.is_none_or(|book| entry.ingredient(book).is_some()))
        .cloned()
        .collect()
}

pub fn require_subject(
    entries: &[CatalogEntry],
    subject: &str,
    book_id: Option<&str>,
) -> Result<CatalogEntry, RenderError> {
    entries_by_subject(entries, subject, book_id)
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::MissingRelation {
            subject: subject.to_owned(),
            book: book_id.unwrap_or_default().to_owned(),
        })
}

/// Adds the TOC (unless the renderer built one) and the copyright page.
pub(crate) async fn finish_sections(
    ctx: &RenderContext,
    entry: &CatalogEntry,
    mut sections: HtmlSections,
    built_with: Vec<CatalogEntry>,
) -> anyhow::Result<Rendered> {
    if sections.toc.is_empty() {
        sections.toc = generate_toc(&sections.body);
    }
    let license = match ctx.fetcher.fetch_file(entry, "LICENSE.md").await {
        Ok(license) => license,
        Err(err) => {
            tracing::warn!(resource = %entry.full_name(), ?err, "license unavailable");
            None
        }
    };
    let entries: Vec<&CatalogEntry> = built_with.iter().collect();
    sections.copyright = generate_copyright(&entries, license.as_deref());
    Ok(Rendered {
        sections,
        built_with,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_map_to_renderers() {
        assert_eq!(
            ResourceKind::from_subject("Aligned Bible").ok(),
            Some(ResourceKind::Bible)
        );
        assert!(ResourceKind::TranslationNotes.needs_book());
        assert!(!ResourceKind::OpenBibleStories.needs_book());
        assert!(matches!(
            ResourceKind::from_subject("Greek Lexicon"),
            Err(RenderError::UnsupportedSubject(_))
        ));
    }

    #[test]
    fn missing_relation_names_subject_and_book() {
        let err = require_subject(&[], "Translation Academy", Some("tit")).unwrap_err();
        assert_eq!(
            err.to_string(),
            RenderError::MissingRelation {
                subject: "Translation Academy".to_owned(),
                book: "tit".to_owned(),
            }
            .to_string()
        );
    }
}
