use std::sync::LazyLock;

use pulldown_cmark::{Options, Parser};
use regex::{Captures, Regex};

static SAME_CHAPTER_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="\./0*([^/".]+)(?:\.md)?""#).expect("same chapter link regex")
});
static OTHER_CHAPTER_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="\.\./0*([^/".]+)/0*([^/".]+)(?:\.md)?""#).expect("other chapter link regex")
});
static BARE_VERSE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="0*([^#/".:]+)(?:\.md)?""#).expect("bare verse link regex")
});
static ROOTED_VERSE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="/*0*([^#/".:]+)/0*([^/".]+)\.md""#).expect("rooted verse link regex")
});
static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(?:www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b[-a-zA-Z0-9()@:%_+.~#?&/=]*",
    )
    .expect("bare url regex")
});
static EXTERNAL_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(href="http[^"]+")"#).expect("external href regex"));
static SEE_ALSO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(See: \[\[[^\]]+\]\]\)").expect("see also regex"));

pub fn markdown_to_html_fragment(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    // `rc://*/a … rc://*/b` would otherwise open emphasis.
    let md = md.replace("rc://*/", r"rc://\*/");
    let parser = Parser::new_ext(&md, options);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Escapes `&`, `<` and `"` for text placed in element bodies or attributes.
pub fn encode_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Where relative note links should point: `#<prefix>-<book>-<chapter>-<verse>`.
#[derive(Debug, Clone, Copy)]
pub struct NoteContext<'a> {
    pub prefix: &'a str,
    pub book_id: &'a str,
    pub chapter: &'a str,
}

/// Renders a TSV note cell to HTML and rewrites its links to in-document anchors.
pub fn convert_note(note: &str, ctx: NoteContext<'_>) -> String {
    let md = note.replace("\\n", "\n").replace("<br>", "\n");
    let html = markdown_to_html_fragment(&md);
    let NoteContext {
        prefix,
        book_id,
        chapter,
    } = ctx;

    let html = SAME_CHAPTER_LINK_RE.replace_all(&html, |caps: &Captures| {
        nav_href(prefix, book_id, chapter, &caps[1])
    });
    let html = OTHER_CHAPTER_LINK_RE.replace_all(&html, |caps: &Captures| {
        nav_href(prefix, book_id, &caps[1], &caps[2])
    });
    let html = BARE_VERSE_LINK_RE.replace_all(&html, |caps: &Captures| {
        nav_href(prefix, book_id, chapter, &caps[1])
    });
    let html = ROOTED_VERSE_LINK_RE.replace_all(&html, |caps: &Captures| {
        nav_href(prefix, book_id, &caps[1], &caps[2])
    });
    let html = linkify_bare_urls(&html);
    let html = EXTERNAL_HREF_RE.replace_all(&html, r#"$1 target="_blank""#);
    let html = demote_headings(&html, 2);
    SEE_ALSO_RE.replace(&html, "").into_owned()
}

fn nav_href(prefix: &str, book_id: &str, chapter: &str, verse: &str) -> String {
    format!(
        r##"href="#{prefix}-{book_id}-{chapter}-{verse}" data-nav-anchor="{book_id}-{chapter}-{verse}""##
    )
}

/// Wraps URLs that are not already inside an attribute or a link body.
pub fn linkify_bare_urls(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for m in BARE_URL_RE.find_iter(html) {
        let preceded_by = html[..m.start()].chars().next_back();
        if matches!(preceded_by, Some('"' | '>')) {
            continue;
        }
        out.push_str(&html[cursor..m.start()]);
        out.push_str(&format!(r#"<a href="{0}">{0}</a>"#, m.as_str()));
        cursor = m.end();
    }
    out.push_str(&html[cursor..]);
    out
}

/// `<h1>` becomes `<h{1+by}>` and so on, capped at `<h6>`.
pub fn demote_headings(html: &str, by: u8) -> String {
    let mut out = html.to_owned();
    for level in (1..=6u8).rev() {
        let target = (level + by).min(6);
        if target == level {
            continue;
        }
        out = out
            .replace(&format!("<h{level}>"), &format!("<h{target}>"))
            .replace(&format!("</h{level}>"), &format!("</h{target}>"));
    }
    out
}

/// First markdown heading and the markdown that follows it.
pub fn split_title(md: &str) -> (Option<String>, String) {
    let mut lines = md.lines();
    let mut consumed = Vec::new();
    for line in lines.by_ref() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            consumed.push(line);
            continue;
        }
        if let Some(title) = trimmed.strip_prefix('#') {
            let title = title.trim_start_matches('#').trim();
            if !title.is_empty() {
                return (Some(title.to_owned()), lines.collect::<Vec<_>>().join("\n"));
            }
        }
        consumed.push(line);
        break;
    }
    consumed.extend(lines);
    (None, consumed.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NoteContext<'static> {
        NoteContext {
            prefix: "nav",
            book_id: "tit",
            chapter: "1",
        }
    }

    #[test]
    fn relative_links_point_at_note_anchors() {
        let html = convert_note("See [verse 5](./05.md) and [2:3](../02/03.md).", ctx());
        assert!(html.contains(r##"href="#nav-tit-1-5" data-nav-anchor="tit-1-5""##));
        assert!(html.contains(r##"href="#nav-tit-2-3" data-nav-anchor="tit-2-3""##));
    }

    #[test]
    fn escaped_newlines_and_breaks_become_paragraphs() {
        let html = convert_note("one\\n\\ntwo<br><br>three", ctx());
        assert_eq!(html.matches("<p>").count(), 3);
    }

    #[test]
    fn bare_urls_are_linked_and_open_in_new_tab() {
        let html = convert_note("Visit https://door43.org/u today.", ctx());
        assert!(html.contains(
            r#"<a href="https://door43.org/u" target="_blank">https://door43.org/u</a>"#
        ));
        assert_eq!(html.matches("<a ").count(), 1);
    }

    #[test]
    fn headings_are_demoted_and_see_also_removed() {
        let html = convert_note(
            "# Title\n\nBody (See: [[rc://*/ta/man/translate/figs-metaphor]])",
            ctx(),
        );
        assert!(html.contains("<h3>Title</h3>"));
        assert!(!html.contains("See:"));
    }

    #[test]
    fn encode_html_escapes_markup_characters() {
        assert_eq!(encode_html(r#"a & <b> "c""#), "a &amp; &lt;b> &quot;c&quot;");
    }

    #[test]
    fn split_title_takes_first_heading() {
        let (title, body) = split_title("\n# Grace\n\n## Definition:\n\nFavor.");
        assert_eq!(title.as_deref(), Some("Grace"));
        assert!(body.contains("## Definition:"));
        let (none, body) = split_title("Plain text");
        assert_eq!(none, None);
        assert_eq!(body, "Plain text");
    }
}
