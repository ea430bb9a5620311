use crate::markdown::encode_html;
use crate::usfm::{Token, tokenize};

/// Paragraph markers that start a new block.
const PARAGRAPH_MARKERS: &[&str] = &[
    "p", "m", "pi", "pi1", "pi2", "mi", "nb", "pc", "pm", "pmo", "pr", "cls", "q", "q1", "q2",
    "q3", "q4", "qc", "qr", "qm", "qm1", "qm2", "li", "li1", "li2", "li3", "ip", "im", "ipi",
    "imi", "is", "is1", "is2", "io", "io1", "io2",
];

/// Character markers rendered as styled spans.
const CHARACTER_MARKERS: &[&str] = &[
    "add", "bk", "bd", "bdit", "dc", "em", "it", "k", "nd", "no", "ord", "pn", "png", "qac",
    "qs", "qt", "sc", "sig", "sls", "tl", "wj",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsfmRenderFlags {
    pub show_titles: bool,
    pub show_headings: bool,
    pub show_footnotes: bool,
    pub show_chapter_labels: bool,
    pub show_verse_labels: bool,
}

impl Default for UsfmRenderFlags {
    fn default() -> Self {
        Self {
            show_titles: true,
            show_headings: true,
            show_footnotes: true,
            show_chapter_labels: true,
            show_verse_labels: true,
        }
    }
}

/// Turns USFM into an HTML fragment using `chapter-N` / `chapter-N-verse-V` span ids.
pub trait UsfmHtmlRenderer: Send + Sync {
    fn render(&self, usfm: &str, flags: UsfmRenderFlags) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicUsfmHtmlRenderer;

#[derive(Default)]
struct Writer {
    html: String,
    paragraph_open: bool,
    chapter: Option<String>,
    pending: Option<&'static str>,
    note_depth: usize,
    skip_note_text: bool,
    skip_xref: bool,
    open_spans: usize,
}

impl Writer {
    fn open_paragraph(&mut self, class: &str) {
        self.close_paragraph();
        self.html.push_str(&format!(r#"<p class="{class}">"#));
        self.paragraph_open = true;
    }

    fn close_paragraph(&mut self) {
        for _ in 0..self.open_spans {
            self.html.push_str("</span>");
        }
        self.open_spans = 0;
        if self.paragraph_open {
            self.html.push_str("</p>\n");
            self.paragraph_open = false;
        }
    }

    fn ensure_paragraph(&mut self) {
        if !self.paragraph_open {
            self.open_paragraph("p");
        }
    }

    fn text(&mut self, text: &str) {
        if text.trim().is_empty() && !self.paragraph_open {
            return;
        }
        self.ensure_paragraph();
        self.html.push_str(&encode_html(&text.replace('\n', " ")));
    }
}

impl UsfmHtmlRenderer for BasicUsfmHtmlRenderer {
    fn render(&self, usfm: &str, flags: UsfmRenderFlags) -> String {
        let mut w = Writer::default();

        for token in tokenize(usfm) {
            if w.skip_xref {
                if matches!(&token, Token::EndMarker(name) if name == "x") {
                    w.skip_xref = false;
                }
                continue;
            }
            match token {
                Token::Line { marker, content } => {
                    if content.is_empty() {
                        continue;
                    }
                    let content = encode_html(&content);
                    match marker.as_str() {
                        "mt" | "mt1" | "mt2" | "mt3" if flags.show_titles => {
                            w.close_paragraph();
                            w.html.push_str(&format!(r#"<h1 class="{marker}">{content}</h1>"#));
                            w.html.push('\n');
                        }
                        "ms" | "ms1" | "ms2" if flags.show_headings => {
                            w.close_paragraph();
                            w.html.push_str(&format!(r#"<h2 class="{marker}">{content}</h2>"#));
                            w.html.push('\n');
                        }
                        "s" | "s1" | "s2" | "s3" | "s4" | "s5" if flags.show_headings => {
                            w.close_paragraph();
                            w.html.push_str(&format!(
                                r#"<h3 class="section-heading {marker}">{content}</h3>"#
                            ));
                            w.html.push('\n');
                        }
                        "mr" | "r" | "sr" | "d" if flags.show_headings => {
                            w.close_paragraph();
                            w.html
                                .push_str(&format!(r#"<p class="{marker}">{content}</p>"#));
                            w.html.push('\n');
                        }
                        _ => {}
                    }
                }
                Token::Marker(name) if name == "x" => {
                    w.skip_xref = true;
                }
                Token::Marker(name) if name == "f" || name == "fe" => {
                    w.note_depth += 1;
                    // The caller (`+`, `-`) precedes the first content marker.
                    w.skip_note_text = true;
                    if flags.show_footnotes {
                        w.ensure_paragraph();
                        w.html.push_str(r#"<span style="color: #CCC; font-size: 0.8em">"#);
                    }
                }
                Token::EndMarker(name) if name == "f" || name == "fe" => {
                    w.note_depth = w.note_depth.saturating_sub(1);
                    w.skip_note_text = false;
                    if flags.show_footnotes {
                        w.html.push_str("</span>");
                    }
                }
                Token::Marker(name) if w.note_depth > 0 => {
                    w.skip_note_text = matches!(name.as_str(), "fr" | "fk" | "fl");
                }
                Token::Text(text) | Token::Word { text, .. } if w.note_depth > 0 => {
                    if flags.show_footnotes && !w.skip_note_text {
                        w.html.push_str(&encode_html(&text));
                    }
                }
                _ if w.note_depth > 0 => {}
                Token::Marker(name) if name == "c" => {
                    w.close_paragraph();
                    w.pending = Some("c");
                }
                Token::Marker(name) if name == "v" => {
                    w.pending = Some("v");
                }
                Token::Marker(name) if PARAGRAPH_MARKERS.contains(&name.as_str()) => {
                    w.open_paragraph(&name);
                }
                Token::Marker(name) if name == "b" => {
                    w.close_paragraph();
                    w.html.push_str("<br/>\n");
                }
                Token::Marker(name) if CHARACTER_MARKERS.contains(&name.as_str()) => {
                    w.ensure_paragraph();
                    w.html.push_str(&format!(r#"<span class="{name}">"#));
                    w.open_spans += 1;
                }
                Token::EndMarker(name) if CHARACTER_MARKERS.contains(&name.as_str()) => {
                    if w.open_spans > 0 {
                        w.html.push_str("</span>");
                        w.open_spans -= 1;
                    }
                }
                Token::Text(text) => {
                    let text = match w.pending.take() {
                        Some(kind) => {
                            let trimmed = text.trim_start();
                            let number_len =
                                trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
                            let number = &trimmed[..number_len];
                            if kind == "c" {
                                w.chapter = Some(number.to_owned());
                                if flags.show_chapter_labels {
                                    w.open_paragraph("c");
                                    w.html.push_str(&format!(
                                        r#"<span id="chapter-{number}" class="chapter-label">{number}</span>"#
                                    ));
                                    w.close_paragraph();
                                }
                            } else if let Some(chapter) = &w.chapter {
                                let chapter = chapter.clone();
                                w.ensure_paragraph();
                                let label = if flags.show_verse_labels { number } else { "" };
                                w.html.push_str(&format!(
                                    r#"<span id="chapter-{chapter}-verse-{number}" class="verse-label">{label}</span> "#
                                ));
                            }
                            trimmed[number_len..].trim_start().to_owned()
                        }
                        None => text,
                    };
                    w.text(&text);
                }
                Token::Word { text, .. } => {
                    w.ensure_paragraph();
                    w.html.push_str(&encode_html(&text));
                }
                Token::Marker(_)
                | Token::EndMarker(_)
                | Token::Milestone { .. }
                | Token::MilestoneEnd(_) => {}
            }
        }
        w.close_paragraph();
        format!("<div class=\"bible-text\">\n{}</div>\n", w.html)
    }
}
