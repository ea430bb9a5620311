use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sha2::{Digest as _, Sha256};

use crate::error::AlignError;
use crate::tsv::TsvRow;
use crate::usfm::{UsfmDocument, VerseContent, normalize_word};

/// Joins discontiguous runs before the configured delimiter is applied.
/// U+001F never occurs in scripture text, so a literal `&` in a verse survives.
pub const INTERNAL_QUOTE_MARKER: &str = "\u{1f}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    Nth(usize),
    All,
}

impl Occurrence {
    /// `""` and `"0"` mean "do not align".
    pub fn parse(raw: &str) -> Result<Self, AlignError> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Err(AlignError::NoOccurrence);
        }
        match raw.parse::<i64>() {
            Ok(-1) => Ok(Self::All),
            Ok(n) if n > 0 => Ok(Self::Nth(n as usize)),
            _ => Err(AlignError::InvalidOccurrence(raw.to_owned())),
        }
    }
}

/// A parsed USFM book plus a content digest used in memo keys.
#[derive(Debug, Clone)]
pub struct AlignmentText {
    pub document: UsfmDocument,
    pub digest: String,
}

impl AlignmentText {
    pub fn parse(usfm: &str) -> Self {
        Self {
            document: UsfmDocument::parse(usfm),
            digest: hex::encode(Sha256::digest(usfm.as_bytes())),
        }
    }
}

pub trait QuoteAligner: Send + Sync {
    /// Target-language rendering of `quote`, runs joined by [`INTERNAL_QUOTE_MARKER`].
    fn align(
        &self,
        quote: &str,
        reference: &str,
        occurrence: Occurrence,
        source: &UsfmDocument,
        target: &UsfmDocument,
    ) -> Result<String, AlignError>;
}

/// Aligns through the `zaln` milestones carried by the target text.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordAlignmentAligner;

impl QuoteAligner for WordAlignmentAligner {
    fn align(
        &self,
        quote: &str,
        reference: &str,
        occurrence: Occurrence,
        source: &UsfmDocument,
        target: &UsfmDocument,
    ) -> Result<String, AlignError> {
        align_quote(quote, reference, occurrence, source, target)
    }
}

struct SourceWord {
    verse: usize,
    normalized: String,
}

pub fn align_quote(
    quote: &str,
    reference: &str,
    occurrence: Occurrence,
    source: &UsfmDocument,
    target: &UsfmDocument,
) -> Result<String, AlignError> {
    let (chapter, verses) = reference
        .trim()
        .split_once(':')
        .ok_or_else(|| AlignError::UnsupportedReference(reference.to_owned()))?;
    if crate::usfm::expand_verse_list(verses).is_none() {
        return Err(AlignError::UnsupportedReference(reference.to_owned()));
    }

    let source_span =
        source
            .verse_span(chapter, verses)
            .ok_or_else(|| AlignError::VerseNotFound {
                text: "source",
                reference: reference.to_owned(),
            })?;
    let target_span =
        target
            .verse_span(chapter, verses)
            .ok_or_else(|| AlignError::VerseNotFound {
                text: "target",
                reference: reference.to_owned(),
            })?;
    let same_shape = source_span.len() == target_span.len();

    let source_words: Vec<SourceWord> = source_span
        .iter()
        .copied()
        .enumerate()
        .flat_map(|(verse, content)| {
            content.words.iter().filter_map(move |word| {
                let normalized = normalize_word(&word.text);
                (!normalized.is_empty()).then_some(SourceWord { verse, normalized })
            })
        })
        .collect();

    let parts = quote_parts(quote);
    if parts.is_empty() {
        return Err(AlignError::QuoteNotFound(quote.to_owned()));
    }

    let matches = find_matches(&source_words, &parts);
    let selected: Vec<usize> = match occurrence {
        Occurrence::Nth(n) => matches
            .get(n - 1)
            .cloned()
            .ok_or_else(|| AlignError::QuoteNotFound(quote.to_owned()))?,
        Occurrence::All => {
            let mut all: Vec<usize> = matches.into_iter().flatten().collect();
            all.sort_unstable();
            all.dedup();
            all
        }
    };
    if selected.is_empty() {
        return Err(AlignError::QuoteNotFound(quote.to_owned()));
    }

    // (verse, word, occurrence within that verse)
    let mut wanted: HashSet<(usize, String, u32)> = HashSet::new();
    for &index in &selected {
        let word = &source_words[index];
        let occurrence = source_words[..=index]
            .iter()
            .filter(|w| w.verse == word.verse && w.normalized == word.normalized)
            .count() as u32;
        let verse = if same_shape { word.verse } else { 0 };
        wanted.insert((verse, word.normalized.clone(), occurrence));
    }

    let runs = aligned_runs(&target_span, &wanted, same_shape);
    if runs.is_empty() {
        return Err(AlignError::NoAlignment(quote.to_owned()));
    }
    Ok(runs.join(INTERNAL_QUOTE_MARKER))
}

fn quote_parts(quote: &str) -> Vec<Vec<String>> {
    quote
        .split(['&', '…'])
        .map(|part| {
            part.split(|c: char| c.is_whitespace() || c == '\u{05BE}')
                .map(normalize_word)
                .filter(|token| !token.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|tokens| !tokens.is_empty())
        .collect()
}

fn matches_at(words: &[SourceWord], start: usize, part: &[String]) -> bool {
    start + part.len() <= words.len()
        && part
            .iter()
            .enumerate()
            .all(|(offset, token)| words[start + offset].normalized == *token)
}

/// Every match of the quote parts, ordered by start position. Later parts
/// bind to their earliest position after the previous part.
fn find_matches(words: &[SourceWord], parts: &[Vec<String>]) -> Vec<Vec<usize>> {
    let mut matches = Vec::new();
    for start in 0..words.len() {
        if !matches_at(words, start, &parts[0]) {
            continue;
        }
        let mut indices: Vec<usize> = (start..start + parts[0].len()).collect();
        let mut cursor = start + parts[0].len();
        let mut complete = true;
        for part in &parts[1..] {
            match (cursor..words.len()).find(|&at| matches_at(words, at, part)) {
                Some(at) => {
                    indices.extend(at..at + part.len());
                    cursor = at + part.len();
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            matches.push(indices);
        }
    }
    matches
}

fn aligned_runs(
    target_span: &[&VerseContent],
    wanted: &HashSet<(usize, String, u32)>,
    same_shape: bool,
) -> Vec<String> {
    let mut runs = Vec::new();
    for (verse_index, verse) in target_span.iter().enumerate() {
        let key_verse = if same_shape { verse_index } else { 0 };
        let mut run: Option<(usize, usize)> = None;
        for word in &verse.words {
            let hit = word.alignments.iter().any(|alignment| {
                wanted.contains(&(
                    key_verse,
                    normalize_word(&alignment.content),
                    alignment.occurrence,
                ))
            });
            match (hit, run) {
                (true, Some((start, _))) => run = Some((start, word.end)),
                (true, None) => run = Some((word.start, word.end)),
                (false, Some((start, end))) => {
                    runs.push(verse.text[start..end].to_owned());
                    run = None;
                }
                (false, None) => {}
            }
        }
        if let Some((start, end)) = run {
            runs.push(verse.text[start..end].to_owned());
        }
    }
    runs
}

/// Replaces the internal run marker with the configured delimiter.
pub fn apply_delimiter(quote: &str, delimiter: &str) -> String {
    quote.replace(INTERNAL_QUOTE_MARKER, delimiter)
}

/// Re-balances `{…}` spans when an aligned quote starts or ends inside one.
pub fn insert_unmatched_curly_braces(quote: &str, scripture: &str, delimiter: &str) -> String {
    let parts: Vec<&str> = if delimiter.is_empty() {
        vec![quote]
    } else {
        quote.split(delimiter).collect()
    };
    parts
        .into_iter()
        .map(|part| {
            let mut part = part.to_owned();
            let close_before_open = match (part.find('}'), part.find('{')) {
                (Some(close), Some(open)) => close < open,
                (Some(_), None) => true,
                _ => false,
            };
            if close_before_open {
                let candidate = format!("{{{part}");
                part = if scripture.contains(&candidate) {
                    candidate
                } else {
                    format!("{{{delimiter}{part}")
                };
            }
            let open_after_close = match (part.rfind('{'), part.rfind('}')) {
                (Some(open), Some(close)) => open > close,
                (Some(_), None) => true,
                _ => false,
            };
            if open_after_close {
                let candidate = format!("{part}}}");
                part = if scripture.contains(&candidate) {
                    candidate
                } else {
                    format!("{part}{delimiter}}}")
                };
            }
            part
        })
        .collect::<Vec<_>>()
        .join(delimiter)
}

/// Memoized GL quotes. Additive and shareable between render passes.
#[derive(Debug, Default)]
pub struct QuoteCache {
    entries: Mutex<HashMap<String, String>>,
}

impl QuoteCache {
    pub fn key(
        quote: &str,
        reference: &str,
        occurrence: &str,
        delimiter: &str,
        source: &AlignmentText,
        target: &AlignmentText,
    ) -> String {
        let params = serde_json::json!({
            "delimiter": delimiter,
            "occurrence": occurrence,
            "quote": quote,
            "ref": reference,
            "source": source.digest,
            "target": target.digest,
        });
        hex::encode(Sha256::digest(params.to_string().as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn insert(&self, key: String, quote: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, quote);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlQuoteOptions {
    pub delimiter: String,
    pub chunk_size: usize,
}

/// Fills `GLQuote{n}` on every row for each target text. Alignment failures
/// leave an empty quote. Returns how many cells got a non-empty quote.
pub async fn add_gl_quotes(
    rows: &mut [TsvRow],
    source: &AlignmentText,
    targets: &[AlignmentText],
    aligner: &dyn QuoteAligner,
    cache: &QuoteCache,
    options: &GlQuoteOptions,
) -> usize {
    let mut filled = 0usize;
    let chunk_size = options.chunk_size.max(1);
    let mut chunks = rows.chunks_mut(chunk_size).peekable();

    while let Some(chunk) = chunks.next() {
        for row in chunk.iter_mut() {
            for (index, target) in targets.iter().enumerate() {
                let quote = gl_quote_for_row(row, source, target, aligner, cache, options);
                if !quote.is_empty() {
                    filled += 1;
                }
                row.set(&format!("GLQuote{index}"), quote);
            }
        }
        if chunks.peek().is_some() {
            tokio::task::yield_now().await;
        }
    }
    filled
}

fn gl_quote_for_row(
    row: &TsvRow,
    source: &AlignmentText,
    target: &AlignmentText,
    aligner: &dyn QuoteAligner,
    cache: &QuoteCache,
    options: &GlQuoteOptions,
) -> String {
    let quote = row.value("Quote").trim();
    let reference = row.reference().trim();
    let raw_occurrence = row.value("Occurrence");
    if quote.is_empty() || reference.is_empty() {
        return String::new();
    }
    let occurrence = match Occurrence::parse(raw_occurrence) {
        Ok(occurrence) => occurrence,
        Err(_) => return String::new(),
    };

    let key = QuoteCache::key(
        quote,
        reference,
        raw_occurrence.trim(),
        &options.delimiter,
        source,
        target,
    );
    if let Some(hit) = cache.get(&key) {
        return hit;
    }

    let result = match aligner.align(
        quote,
        reference,
        occurrence,
        &source.document,
        &target.document,
    ) {
        Ok(aligned) => {
            let delimited = apply_delimiter(&aligned, &options.delimiter);
            let (chapter, verse) = crate::tsv::reference_key(reference);
            let scripture = target
                .document
                .verse_text(&chapter, &verse)
                .unwrap_or_default();
            insert_unmatched_curly_braces(&delimited, scripture, &options.delimiter)
        }
        Err(err) => {
            tracing::debug!(id = row.id(), reference, %err, "quote alignment failed");
            String::new()
        }
    };
    cache.insert(key, result.clone());
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const SOURCE: &str = "\\id TIT\n\\c 1\n\\v 1 \\w Παῦλος|lemma=\"Παῦλος\"\\w* \\w δοῦλος|lemma=\"δοῦλος\"\\w* \\w Θεοῦ|lemma=\"θεός\"\\w*, \\w ἀπόστολος|lemma=\"ἀπόστολος\"\\w* \\w δὲ|lemma=\"δέ\"\\w* \\w Ἰησοῦ|lemma=\"Ἰησοῦς\"\\w* \\w Χριστοῦ|lemma=\"Χριστός\"\\w*\n\\v 2 \\w Θεοῦ|lemma=\"θεός\"\\w* \\w καὶ|lemma=\"καί\"\\w* \\w Θεοῦ|lemma=\"θεός\"\\w*\n";

    fn zaln(content: &str, occurrence: u32, words: &[&str]) -> String {
        let inner = words
            .iter()
            .map(|w| format!("\\w {w}|x-occurrence=\"1\" x-occurrences=\"1\"\\w*"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "\\zaln-s |x-occurrence=\"{occurrence}\" x-occurrences=\"1\" x-content=\"{content}\"\\*{inner}\\zaln-e\\*"
        )
    }

    fn target() -> String {
        format!(
            "\\id TIT\n\\c 1\n\\v 1 {}, {} {}, {} {} {} {}\n\\v 2 {} {} {}\n",
            zaln("Παῦλος", 1, &["Paul"]),
            zaln("δοῦλος", 1, &["a", "servant"]),
            zaln("Θεοῦ", 1, &["of", "God"]),
            zaln("δὲ", 1, &["and"]),
            zaln("ἀπόστολος", 1, &["an", "apostle"]),
            zaln("Ἰησοῦ", 1, &["of", "Jesus"]),
            zaln("Χριστοῦ", 1, &["Christ"]),
            zaln("Θεοῦ", 1, &["God"]),
            zaln("καὶ", 1, &["and"]),
            zaln("Θεοῦ", 2, &["God"]),
        )
    }

    fn texts() -> (AlignmentText, AlignmentText) {
        (AlignmentText::parse(SOURCE), AlignmentText::parse(&target()))
    }

    #[test]
    fn contiguous_quote_maps_to_target_substring() -> anyhow::Result<()> {
        let (source, target) = texts();
        let quote = align_quote(
            "δοῦλος Θεοῦ",
            "1:1",
            Occurrence::Nth(1),
            &source.document,
            &target.document,
        )?;
        assert_eq!(quote, "a servant of God");
        Ok(())
    }

    #[test]
    fn discontiguous_quote_uses_marker_then_delimiter() -> anyhow::Result<()> {
        let (source, target) = texts();
        let quote = align_quote(
            "Παῦλος & ἀπόστολος",
            "1:1",
            Occurrence::Nth(1),
            &source.document,
            &target.document,
        )?;
        assert_eq!(quote, format!("Paul{INTERNAL_QUOTE_MARKER}an apostle"));
        assert_eq!(apply_delimiter(&quote, " … "), "Paul … an apostle");
        Ok(())
    }

    #[test]
    fn second_occurrence_selects_second_aligned_word() -> anyhow::Result<()> {
        let (source, target) = texts();
        let quote = align_quote(
            "Θεοῦ",
            "1:2",
            Occurrence::Nth(2),
            &source.document,
            &target.document,
        )?;
        assert_eq!(quote, "God");
        let all = align_quote(
            "Θεοῦ",
            "1:2",
            Occurrence::All,
            &source.document,
            &target.document,
        )?;
        assert_eq!(apply_delimiter(&all, " & "), "God & God");
        Ok(())
    }

    #[test]
    fn missing_quote_and_verse_are_typed_errors() {
        let (source, target) = texts();
        let missing = align_quote(
            "λόγος",
            "1:1",
            Occurrence::Nth(1),
            &source.document,
            &target.document,
        );
        assert!(matches!(missing, Err(AlignError::QuoteNotFound(_))));
        let no_verse = align_quote(
            "Θεοῦ",
            "1:9",
            Occurrence::Nth(1),
            &source.document,
            &target.document,
        );
        assert!(matches!(no_verse, Err(AlignError::VerseNotFound { .. })));
        assert_eq!(Occurrence::parse("0"), Err(AlignError::NoOccurrence));
        assert_eq!(Occurrence::parse(""), Err(AlignError::NoOccurrence));
        assert_eq!(Occurrence::parse("-1"), Ok(Occurrence::All));
    }

    #[test]
    fn literal_ampersand_in_target_text_is_kept() {
        let aligned = format!("sin & death{INTERNAL_QUOTE_MARKER}grace");
        assert_eq!(apply_delimiter(&aligned, " … "), "sin & death … grace");
    }

    #[test]
    fn verse_range_wider_than_a_chapter_is_unsupported() {
        let (source, target) = texts();
        let result = align_quote(
            "Θεοῦ",
            "1:1-4000000000",
            Occurrence::Nth(1),
            &source.document,
            &target.document,
        );
        assert!(matches!(result, Err(AlignError::UnsupportedReference(_))));
    }

    #[test]
    fn unmatched_braces_are_rebalanced() {
        let scripture = "Paul, {a servant} of God";
        assert_eq!(
            insert_unmatched_curly_braces("a servant} of God", scripture, " … "),
            "{a servant} of God"
        );
        assert_eq!(
            insert_unmatched_curly_braces("Paul, {a", scripture, " … "),
            "Paul, {a … }"
        );
        assert_eq!(
            insert_unmatched_curly_braces("Paul", scripture, " … "),
            "Paul"
        );
        assert_eq!(
            insert_unmatched_curly_braces("a servant} of", scripture, ""),
            "{a servant} of"
        );
    }

    struct CountingAligner {
        calls: AtomicUsize,
    }

    impl QuoteAligner for CountingAligner {
        fn align(
            &self,
            _quote: &str,
            _reference: &str,
            _occurrence: Occurrence,
            _source: &UsfmDocument,
            _target: &UsfmDocument,
        ) -> Result<String, AlignError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("aligned".to_owned())
        }
    }

    fn options() -> GlQuoteOptions {
        GlQuoteOptions {
            delimiter: " … ".to_owned(),
            chunk_size: 1,
        }
    }

    #[tokio::test]
    async fn zero_occurrence_yields_empty_quote_without_aligning() {
        let (source, target) = texts();
        let aligner = CountingAligner {
            calls: AtomicUsize::new(0),
        };
        let cache = QuoteCache::default();
        let mut rows = vec![
            TsvRow::from([("ID", "a1"), ("Reference", "1:1"), ("Quote", "Θεοῦ"), ("Occurrence", "0")]),
            TsvRow::from([("ID", "a2"), ("Reference", "1:1"), ("Quote", "Θεοῦ"), ("Occurrence", "")]),
        ];
        let filled = add_gl_quotes(&mut rows, &source, &[target], &aligner, &cache, &options()).await;
        assert_eq!(filled, 0);
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rows[0].value("GLQuote0"), "");
        assert_eq!(rows[1].get("GLQuote0"), Some(""));
    }

    #[tokio::test]
    async fn identical_rows_hit_the_cache() {
        let (source, target) = texts();
        let aligner = CountingAligner {
            calls: AtomicUsize::new(0),
        };
        let cache = QuoteCache::default();
        let row = TsvRow::from([("ID", "b1"), ("Reference", "1:1"), ("Quote", "Θεοῦ"), ("Occurrence", "1")]);
        let mut rows = vec![row.clone(), row.clone(), row];
        let filled = add_gl_quotes(&mut rows, &source, &[target], &aligner, &cache, &options()).await;
        assert_eq!(filled, 3);
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_alignment_degrades_to_empty_quote() {
        let (source, target) = texts();
        let cache = QuoteCache::default();
        let mut rows = vec![
            TsvRow::from([("ID", "c1"), ("Reference", "1:1"), ("Quote", "λόγος"), ("Occurrence", "1")]),
            TsvRow::from([("ID", "c2"), ("Reference", "1:1"), ("Quote", "Ἰησοῦ Χριστοῦ"), ("Occurrence", "1")]),
        ];
        let targets = [target.clone(), target];
        let filled =
            add_gl_quotes(&mut rows, &source, &targets, &WordAlignmentAligner, &cache, &options()).await;
        assert_eq!(filled, 2);
        assert_eq!(rows[0].value("GLQuote0"), "");
        assert_eq!(rows[1].value("GLQuote0"), "of Jesus Christ");
        assert_eq!(rows[1].value("GLQuote1"), "of Jesus Christ");
    }
}
