use std::sync::LazyLock;

use regex::Regex;

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w-]+)\s*=\s*"([^"]*)""#).expect("attribute regex"));

/// Markers whose content runs to the end of the line.
const LINE_MARKERS: &[&str] = &[
    "id", "ide", "usfm", "h", "toc1", "toc2", "toc3", "mt", "mt1", "mt2", "mt3", "s", "s1", "s2",
    "s3", "s4", "s5", "ms", "ms1", "ms2", "mr", "r", "d", "rem", "cl", "sts", "sr",
];

/// Character-level notes that are not part of the running verse text.
const NOTE_MARKERS: &[&str] = &["f", "fe", "x"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Marker(String),
    EndMarker(String),
    Line { marker: String, content: String },
    Word { text: String, attrs: Vec<(String, String)> },
    Milestone { name: String, attrs: Vec<(String, String)> },
    MilestoneEnd(String),
    Text(String),
}

pub fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some(after) = rest.strip_prefix('\\') else {
            let end = rest.find('\\').unwrap_or(rest.len());
            tokens.push(Token::Text(rest[..end].to_owned()));
            rest = &rest[end..];
            continue;
        };

        let after_plus = after.strip_prefix('+').unwrap_or(after);
        let name_len = after_plus
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(after_plus.len());
        if name_len == 0 {
            tokens.push(Token::Text("\\".to_owned()));
            rest = after;
            continue;
        }
        let name = &after_plus[..name_len];
        let tail = &after_plus[name_len..];

        if let Some(tail) = tail.strip_prefix('*') {
            tokens.push(Token::EndMarker(name.to_owned()));
            rest = tail;
            continue;
        }

        if let Some(base) = name.strip_suffix("-e") {
            tokens.push(Token::MilestoneEnd(base.to_owned()));
            rest = tail.strip_prefix("\\*").unwrap_or(tail);
            continue;
        }

        if name.ends_with("-s") || name == "ts" {
            let base = name.strip_suffix("-s").unwrap_or(name);
            match tail.find("\\*") {
                Some(end) => {
                    tokens.push(Token::Milestone {
                        name: base.to_owned(),
                        attrs: parse_attrs(&tail[..end]),
                    });
                    rest = &tail[end + 2..];
                }
                None => {
                    tokens.push(Token::Milestone {
                        name: base.to_owned(),
                        attrs: Vec::new(),
                    });
                    rest = tail;
                }
            }
            continue;
        }

        if name == "w" {
            let body = tail.strip_prefix(' ').unwrap_or(tail);
            let (content, next) = match body.find("\\w*").or_else(|| body.find("\\+w*")) {
                Some(end) => {
                    let marker_len = if body[end..].starts_with("\\+w*") { 4 } else { 3 };
                    (&body[..end], &body[end + marker_len..])
                }
                None => (body, ""),
            };
            let (word, attrs) = match content.split_once('|') {
                Some((word, attrs)) => (word, parse_attrs(attrs)),
                None => (content, Vec::new()),
            };
            tokens.push(Token::Word {
                text: word.trim().to_owned(),
                attrs,
            });
            rest = next;
            continue;
        }

        if LINE_MARKERS.contains(&name) {
            let body = tail.strip_prefix(' ').unwrap_or(tail);
            let end = body.find(['\n', '\\']).unwrap_or(body.len());
            tokens.push(Token::Line {
                marker: name.to_owned(),
                content: body[..end].trim().to_owned(),
            });
            rest = &body[end..];
            continue;
        }

        tokens.push(Token::Marker(name.to_owned()));
        rest = tail.strip_prefix(' ').unwrap_or(tail);
    }

    tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub content: String,
    pub occurrence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseWord {
    pub text: String,
    /// Enclosing `zaln` milestones, outermost first.
    pub alignments: Vec<Alignment>,
    /// Byte range in the verse text.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerseContent {
    pub text: String,
    pub words: Vec<VerseWord>,
}

impl VerseContent {
    fn push_text(&mut self, raw: &str) {
        let mut word_start: Option<usize> = None;
        for ch in raw.chars() {
            if ch.is_whitespace() {
                self.close_plain_word(&mut word_start);
                if !self.text.is_empty() && !self.text.ends_with(' ') {
                    self.text.push(' ');
                }
                continue;
            }
            if is_punctuation(ch) {
                self.close_plain_word(&mut word_start);
                self.text.push(ch);
                continue;
            }
            if word_start.is_none() {
                word_start = Some(self.text.len());
            }
            self.text.push(ch);
        }
        self.close_plain_word(&mut word_start);
    }

    fn close_plain_word(&mut self, word_start: &mut Option<usize>) {
        if let Some(start) = word_start.take() {
            let end = self.text.len();
            self.words.push(VerseWord {
                text: self.text[start..end].to_owned(),
                alignments: Vec::new(),
                start,
                end,
            });
        }
    }

    fn push_word(&mut self, text: &str, alignments: &[Alignment]) {
        if text.is_empty() {
            return;
        }
        let start = self.text.len();
        self.text.push_str(text);
        self.words.push(VerseWord {
            text: text.to_owned(),
            alignments: alignments.to_vec(),
            start,
            end: self.text.len(),
        });
    }

    fn space(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with(' ') {
            self.text.push(' ');
        }
    }

    fn finish(&mut self) {
        let trimmed = self.text.trim_end().len();
        self.text.truncate(trimmed);
    }
}

pub fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation()
        || matches!(
            ch,
            '\u{2000}'..='\u{206F}'
                | '\u{00A1}'
                | '\u{00AB}'
                | '\u{00B7}'
                | '\u{00BB}'
                | '\u{00BF}'
                | '\u{037E}'
                | '\u{0387}'
                | '\u{05BE}'
                | '\u{05C0}'
                | '\u{05C3}'
                | '\u{05C6}'
                | '\u{3000}'..='\u{303F}'
        )
}

/// Lowercased word with punctuation removed, used for quote matching.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| !is_punctuation(*c) && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

type Verses = Vec<(String, VerseContent)>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsfmDocument {
    headers: Vec<(String, String)>,
    chapters: Vec<(String, Verses)>,
}

impl UsfmDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = UsfmDocument::default();
        let mut pending: Option<&'static str> = None;
        let mut note_depth = 0usize;
        let mut alignments: Vec<Alignment> = Vec::new();
        let mut current: Option<(String, String, VerseContent)> = None;
        let mut chapter: Option<String> = None;

        for token in tokenize(text) {
            match token {
                Token::Line { marker, content } => {
                    if chapter.is_none() {
                        doc.headers.push((marker, content));
                    }
                }
                Token::Marker(name) if NOTE_MARKERS.contains(&name.as_str()) => {
                    note_depth += 1;
                }
                Token::EndMarker(name) if NOTE_MARKERS.contains(&name.as_str()) => {
                    note_depth = note_depth.saturating_sub(1);
                }
                _ if note_depth > 0 => {}
                Token::Marker(name) if name == "c" => {
                    doc.close_verse(current.take());
                    pending = Some("c");
                }
                Token::Marker(name) if name == "v" => {
                    doc.close_verse(current.take());
                    pending = Some("v");
                }
                Token::Marker(_) => {
                    if let Some((_, _, verse)) = current.as_mut() {
                        verse.space();
                    }
                }
                Token::Text(text) => {
                    let text = match pending.take() {
                        Some(kind) => {
                            let trimmed = text.trim_start();
                            let number_len =
                                trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
                            let number = trimmed[..number_len].to_owned();
                            let remainder = trimmed[number_len..].to_owned();
                            if kind == "c" {
                                doc.chapters.push((number.clone(), Vec::new()));
                                chapter = Some(number);
                                continue;
                            }
                            if let Some(chapter) = chapter.clone() {
                                current = Some((chapter, number, VerseContent::default()));
                            }
                            remainder
                        }
                        None => text,
                    };
                    if let Some((_, _, verse)) = current.as_mut() {
                        verse.push_text(&text);
                    }
                }
                Token::Word { text, .. } => {
                    if let Some((_, _, verse)) = current.as_mut() {
                        verse.push_word(&text, &alignments);
                    }
                }
                Token::Milestone { name, attrs } if name == "zaln" => {
                    let content = attr(&attrs, "x-content").unwrap_or_default().to_owned();
                    let occurrence = attr(&attrs, "x-occurrence")
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(1);
                    alignments.push(Alignment {
                        content,
                        occurrence,
                    });
                }
                Token::MilestoneEnd(name) if name == "zaln" => {
                    alignments.pop();
                }
                Token::Milestone { .. } | Token::MilestoneEnd(_) | Token::EndMarker(_) => {}
            }
        }
        doc.close_verse(current.take());
        doc
    }

    fn close_verse(&mut self, verse: Option<(String, String, VerseContent)>) {
        let Some((chapter, number, mut content)) = verse else {
            return;
        };
        content.finish();
        if let Some((_, verses)) = self.chapters.iter_mut().find(|(c, _)| *c == chapter) {
            verses.push((number, content));
        }
    }

    pub fn header(&self, marker: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(m, _)| m == marker)
            .map(|(_, content)| content.as_str())
            .filter(|content| !content.is_empty())
    }

    pub fn book_id(&self) -> Option<String> {
        self.header("id")
            .and_then(|id| id.split_whitespace().next())
            .map(str::to_ascii_lowercase)
    }

    pub fn book_title(&self) -> Option<&str> {
        ["h", "toc1", "toc2", "toc3", "mt", "mt1"]
            .iter()
            .find_map(|marker| self.header(marker))
    }

    pub fn chapters(&self) -> impl Iterator<Item = &str> {
        self.chapters.iter().map(|(c, _)| c.as_str())
    }

    pub fn verses(&self, chapter: &str) -> impl Iterator<Item = (&str, &VerseContent)> {
        self.chapters
            .iter()
            .filter(move |(c, _)| c == chapter)
            .flat_map(|(_, verses)| verses.iter().map(|(v, content)| (v.as_str(), content)))
    }

    /// Key of the verse containing `verse`, which may be a bridge like `4-6`.
    pub fn find_verse_key(&self, chapter: &str, verse: &str) -> Option<&str> {
        let wanted: u32 = verse.trim().parse().ok()?;
        self.verses(chapter)
            .map(|(key, _)| key)
            .find(|key| verse_range(key).is_some_and(|(lo, hi)| lo <= wanted && wanted <= hi))
    }

    pub fn verse(&self, chapter: &str, verse: &str) -> Option<&VerseContent> {
        let key = self.find_verse_key(chapter, verse)?;
        self.verses(chapter)
            .find(|(k, _)| *k == key)
            .map(|(_, content)| content)
    }

    pub fn verse_text(&self, chapter: &str, verse: &str) -> Option<&str> {
        self.verse(chapter, verse).map(|content| content.text.as_str())
    }

    /// Verses named by a reference verse part (`3`, `3-5`, `3,7`), each
    /// stored verse returned once even when a bridge covers several numbers.
    pub fn verse_span(&self, chapter: &str, verses: &str) -> Option<Vec<&VerseContent>> {
        let mut keys: Vec<&str> = Vec::new();
        for number in expand_verse_list(verses)? {
            let key = self.find_verse_key(chapter, &number.to_string())?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        let span = keys
            .into_iter()
            .filter_map(|key| {
                self.verses(chapter)
                    .find(|(k, _)| *k == key)
                    .map(|(_, c)| c)
            })
            .collect::<Vec<_>>();
        (!span.is_empty()).then_some(span)
    }
}

fn verse_range(key: &str) -> Option<(u32, u32)> {
    match key.split_once(['-', '–']) {
        Some((lo, hi)) => Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?)),
        None => {
            let value = key.trim().parse().ok()?;
            Some((value, value))
        }
    }
}

/// No chapter has more verses than Psalm 119's 176.
const MAX_VERSES_PER_CHAPTER: u32 = 200;

/// `3-5,7` -> `[3, 4, 5, 7]`. Ranges wider than any chapter are rejected.
pub fn expand_verse_list(verses: &str) -> Option<Vec<u32>> {
    let mut out = Vec::new();
    for part in verses.split(',') {
        let (lo, hi) = verse_range(part)?;
        if hi < lo || hi - lo >= MAX_VERSES_PER_CHAPTER {
            return None;
        }
        out.extend(lo..=hi);
        if out.len() > MAX_VERSES_PER_CHAPTER as usize {
            return None;
        }
    }
    (!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIGNED: &str = r#"\id TIT EN_ULT
\h Titus
\c 1
\p
\v 1 \zaln-s |x-strong="G39720" x-lemma="Παῦλος" x-occurrence="1" x-occurrences="1" x-content="Παῦλος"\*\w Paul|x-occurrence="1" x-occurrences="1"\w*\zaln-e\*, \zaln-s |x-occurrence="1" x-occurrences="1" x-content="δοῦλος"\*\w a|x-occurrence="1" x-occurrences="1"\w* \w servant|x-occurrence="1" x-occurrences="1"\w*\zaln-e\* \zaln-s |x-occurrence="1" x-occurrences="1" x-content="Θεοῦ"\*\w of|x-occurrence="1" x-occurrences="1"\w* \w God|x-occurrence="1" x-occurrences="1"\w*\zaln-e\*\f + \ft a footnote\f*.
\v 2-3 \w bridged|x-occurrence="1"\w* text
"#;

    #[test]
    fn parses_headers_and_verse_text() {
        let doc = UsfmDocument::parse(ALIGNED);
        assert_eq!(doc.book_id().as_deref(), Some("tit"));
        assert_eq!(doc.book_title(), Some("Titus"));
        assert_eq!(doc.verse_text("1", "1"), Some("Paul, a servant of God."));
    }

    #[test]
    fn words_carry_enclosing_alignments_and_offsets() {
        let doc = UsfmDocument::parse(ALIGNED);
        let verse = doc.verse("1", "1").expect("verse 1");
        let servant = verse
            .words
            .iter()
            .find(|w| w.text == "servant")
            .expect("servant");
        assert_eq!(servant.alignments[0].content, "δοῦλος");
        assert_eq!(&verse.text[servant.start..servant.end], "servant");
        assert!(verse.words.iter().all(|w| w.text != "footnote"));
    }

    #[test]
    fn bridged_verses_are_found_by_any_member() {
        let doc = UsfmDocument::parse(ALIGNED);
        assert_eq!(doc.find_verse_key("1", "3"), Some("2-3"));
        assert_eq!(doc.verse_text("1", "2"), Some("bridged text"));
        let span = doc.verse_span("1", "1-3").expect("span");
        assert_eq!(span.len(), 2);
    }

    #[test]
    fn tokenizer_reads_milestones_and_line_markers() {
        let tokens = tokenize("\\s1 Heading\n\\ts\\*\\k-s | x-tw=\"rc://*/tw/dict/bible/kt/god\"\\*\\k-e\\*");
        assert_eq!(
            tokens[0],
            Token::Line {
                marker: "s1".to_owned(),
                content: "Heading".to_owned()
            }
        );
        assert!(matches!(&tokens[2], Token::Milestone { name, .. } if name == "ts"));
        assert!(matches!(&tokens[3], Token::Milestone { name, attrs } if name == "k" && attrs.len() == 1));
        assert_eq!(tokens[4], Token::MilestoneEnd("k".to_owned()));
    }

    #[test]
    fn normalize_word_strips_punctuation_and_case() {
        assert_eq!(normalize_word("Θεοῦ,"), "θεοῦ");
        assert_eq!(normalize_word("“God’s”"), "gods");
        assert_eq!(expand_verse_list("3-5,7"), Some(vec![3, 4, 5, 7]));
        assert_eq!(expand_verse_list("intro"), None);
    }

    #[test]
    fn verse_lists_wider_than_a_chapter_are_rejected() {
        assert_eq!(expand_verse_list("1-176").map(|v| v.len()), Some(176));
        assert_eq!(expand_verse_list("1-50000000"), None);
        assert_eq!(expand_verse_list("1-4294967295"), None);
        assert_eq!(expand_verse_list("1-150,1-150"), None);
    }
}
