use thiserror::Error;

/// Domain failures that callers may want to tell apart from I/O or parse errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid book id: {0}")]
    InvalidBook(String),

    #[error("book {book} is not part of {resource}")]
    BookNotInResource { book: String, resource: String },

    #[error("file not found in {resource}: {path}")]
    MissingFile { resource: String, path: String },

    #[error("no related resource with subject {subject:?} provides {book}")]
    MissingRelation { subject: String, book: String },

    #[error("{resource} has no ingredients to render")]
    NoIngredients { resource: String },

    #[error("unsupported subject: {0}")]
    UnsupportedSubject(String),
}

/// Why a quote could not be aligned. Batch callers degrade these to an empty quote.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlignError {
    #[error("occurrence is zero or missing")]
    NoOccurrence,

    #[error("invalid occurrence: {0}")]
    InvalidOccurrence(String),

    #[error("reference has no verse: {0}")]
    UnsupportedReference(String),

    #[error("verse not found in {text}: {reference}")]
    VerseNotFound { text: &'static str, reference: String },

    #[error("quote not found in source verse: {0}")]
    QuoteNotFound(String),

    #[error("no target words aligned to quote: {0}")]
    NoAlignment(String),
}
