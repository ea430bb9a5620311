use std::collections::BTreeMap;

/// One TSV row. Columns keep the order they were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsvRow {
    columns: Vec<(String, String)>,
}

impl TsvRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Column value, or `""` when the column is absent.
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some((_, existing)) = self.columns.iter_mut().find(|(name, _)| name == column) {
            *existing = value;
        } else {
            self.columns.push((column.to_owned(), value));
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        let index = self.columns.iter().position(|(name, _)| name == column)?;
        Some(self.columns.remove(index).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn id(&self) -> &str {
        self.value("ID")
    }

    pub fn reference(&self) -> &str {
        self.value("Reference")
    }
}

impl<const N: usize> From<[(&str, &str); N]> for TsvRow {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut row = TsvRow::new();
        for (name, value) in pairs {
            row.set(name, value);
        }
        row
    }
}

/// `chapter -> verse -> rows`. Keys keep the order they were first seen in,
/// rows keep file order within a verse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotedTsvIndex {
    chapters: Vec<(String, Vec<(String, Vec<TsvRow>)>)>,
}

impl PivotedTsvIndex {
    pub fn push(&mut self, chapter: &str, verse: &str, row: TsvRow) {
        let chapter_pos = match self.chapters.iter().position(|(c, _)| c == chapter) {
            Some(pos) => pos,
            None => {
                self.chapters.push((chapter.to_owned(), Vec::new()));
                self.chapters.len() - 1
            }
        };
        let verses = &mut self.chapters[chapter_pos].1;
        match verses.iter_mut().find(|(v, _)| v == verse) {
            Some((_, rows)) => rows.push(row),
            None => verses.push((verse.to_owned(), vec![row])),
        }
    }

    pub fn rows(&self, chapter: &str, verse: &str) -> &[TsvRow] {
        self.chapters
            .iter()
            .find(|(c, _)| c == chapter)
            .and_then(|(_, verses)| verses.iter().find(|(v, _)| v == verse))
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn chapters(&self) -> impl Iterator<Item = &str> {
        self.chapters.iter().map(|(c, _)| c.as_str())
    }

    pub fn verses(&self, chapter: &str) -> impl Iterator<Item = &str> {
        self.chapters
            .iter()
            .filter(move |(c, _)| c == chapter)
            .flat_map(|(_, verses)| verses.iter().map(|(v, _)| v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|(_, verses)| verses.iter())
            .map(|(_, rows)| rows.len())
            .sum()
    }

    /// Rows in index order.
    pub fn flatten(&self) -> Vec<TsvRow> {
        self.chapters
            .iter()
            .flat_map(|(_, verses)| verses.iter())
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }

    /// Inverse of [`flatten`](Self::flatten): the structure is unchanged,
    /// row values are replaced in order.
    pub fn rebuild(&self, rows: Vec<TsvRow>) -> anyhow::Result<Self> {
        if rows.len() != self.row_count() {
            anyhow::bail!(
                "row count mismatch: index has {}, got {}",
                self.row_count(),
                rows.len()
            );
        }
        let mut rows = rows.into_iter();
        let mut rebuilt = self.clone();
        for (_, verses) in &mut rebuilt.chapters {
            for (_, slot) in verses.iter_mut() {
                for row in slot.iter_mut() {
                    if let Some(next) = rows.next() {
                        *row = next;
                    }
                }
            }
        }
        Ok(rebuilt)
    }

    /// Plain map view, handy for JSON output.
    pub fn to_map(&self) -> BTreeMap<String, BTreeMap<String, Vec<BTreeMap<String, String>>>> {
        let mut map = BTreeMap::new();
        for (chapter, verses) in &self.chapters {
            let chapter_map: &mut BTreeMap<_, _> = map.entry(chapter.clone()).or_default();
            for (verse, rows) in verses {
                let rows = rows
                    .iter()
                    .map(|row| {
                        row.columns()
                            .map(|(k, v)| (k.to_owned(), v.to_owned()))
                            .collect::<BTreeMap<_, _>>()
                    })
                    .collect();
                chapter_map.insert(verse.clone(), rows);
            }
        }
        map
    }
}

const BODY_COLUMNS: &[&str] = &["Note", "Question", "Response", "TWLink"];

/// Parses a header-defined TSV file into rows, normalizing legacy columns.
pub fn parse_rows(text: &str) -> Vec<TsvRow> {
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<&str> = header.split('\t').map(str::trim).collect();
    let has_body_column = headers
        .iter()
        .any(|h| BODY_COLUMNS.contains(h) || *h == "OccurrenceNote");

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split('\t').collect();
        let mut row = TsvRow::new();
        for (index, name) in headers.iter().enumerate() {
            row.set(name, cells.get(index).copied().unwrap_or(""));
        }

        if row.id().trim().is_empty() {
            tracing::debug!(row = line_no + 1, "skipping tsv row without ID");
            continue;
        }
        normalize_row(&mut row);

        if row.reference().trim().is_empty() {
            tracing::debug!(row = line_no + 1, id = row.id(), "skipping tsv row without reference");
            continue;
        }
        if has_body_column && BODY_COLUMNS.iter().all(|c| row.value(c).trim().is_empty()) {
            tracing::debug!(row = line_no + 1, id = row.id(), "skipping tsv row without body");
            continue;
        }
        rows.push(row);
    }
    rows
}

fn normalize_row(row: &mut TsvRow) {
    let chapter = row.remove("Chapter");
    let verse = row.remove("Verse");
    if let Some(chapter) = chapter {
        let verse = verse.unwrap_or_default();
        row.set("Reference", format!("{chapter}:{verse}"));
    }
    if let Some(note) = row.remove("OccurrenceNote") {
        row.set("Note", note);
    }
    if let Some(quote) = row.remove("OrigQuote") {
        row.set("Quote", quote);
    }
    if let Some(support) = row.get("SupportReference").map(str::trim)
        && !support.is_empty()
        && !support.contains('/')
    {
        let link = format!("rc://*/ta/man/translate/{support}");
        row.set("SupportReference", link);
    }
}

/// Splits `"C:V"` into chapter and the verse grouping key (first verse of a
/// bridge or list). A reference without a verse groups under `0`.
pub fn reference_key(reference: &str) -> (String, String) {
    let reference = reference.trim();
    let Some((chapter, verse)) = reference.split_once(':') else {
        return (reference.to_owned(), "0".to_owned());
    };
    (chapter.trim().to_owned(), first_verse(verse))
}

pub fn first_verse(verse: &str) -> String {
    let verse = verse.trim();
    if verse.is_empty() {
        return "0".to_owned();
    }
    verse
        .split(',')
        .next()
        .and_then(|part| part.split(['-', '–']).next())
        .map(str::trim)
        .unwrap_or(verse)
        .to_owned()
}

pub fn pivot_rows(rows: Vec<TsvRow>) -> PivotedTsvIndex {
    let mut index = PivotedTsvIndex::default();
    for row in rows {
        let (chapter, verse) = reference_key(row.reference());
        index.push(&chapter, &verse, row);
    }
    index
}

pub fn pivot_tsv(text: &str) -> PivotedTsvIndex {
    pivot_rows(parse_rows(text))
}

/// Serializes rows back to TSV with the given column order.
pub fn to_tsv(rows: &[TsvRow], columns: &[&str]) -> String {
    let mut out = columns.join("\t");
    out.push('\n');
    for row in rows {
        let line = columns
            .iter()
            .map(|c| row.value(c).replace(['\t', '\n'], " "))
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
