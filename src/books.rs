use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Testament {
    Old,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookData {
    pub id: &'static str,
    pub title: &'static str,
    pub usfm_number: &'static str,
    pub testament: Testament,
}

impl BookData {
    /// Original-language text for the book (`uhb` or `ugnt`).
    pub fn original_language_abbreviation(&self) -> &'static str {
        match self.testament {
            Testament::Old => "uhb",
            Testament::New => "ugnt",
        }
    }

    /// File name stem used by USFM repositories, e.g. `57-TIT`.
    pub fn usfm_file_stem(&self) -> String {
        format!("{}-{}", self.usfm_number, self.id.to_ascii_uppercase())
    }
}

macro_rules! book {
    ($id:literal, $title:literal, $num:literal, $t:ident) => {
        BookData {
            id: $id,
            title: $title,
            usfm_number: $num,
            testament: Testament::$t,
        }
    };
}

pub const BOOKS: &[BookData] = &[
    book!("gen", "Genesis", "01", Old),
    book!("exo", "Exodus", "02", Old),
    book!("lev", "Leviticus", "03", Old),
    book!("num", "Numbers", "04", Old),
    book!("deu", "Deuteronomy", "05", Old),
    book!("jos", "Joshua", "06", Old),
    book!("jdg", "Judges", "07", Old),
    book!("rut", "Ruth", "08", Old),
    book!("1sa", "1 Samuel", "09", Old),
    book!("2sa", "2 Samuel", "10", Old),
    book!("1ki", "1 Kings", "11", Old),
    book!("2ki", "2 Kings", "12", Old),
    book!("1ch", "1 Chronicles", "13", Old),
    book!("2ch", "2 Chronicles", "14", Old),
    book!("ezr", "Ezra", "15", Old),
    book!("neh", "Nehemiah", "16", Old),
    book!("est", "Esther", "17", Old),
    book!("job", "Job", "18", Old),
    book!("psa", "Psalms", "19", Old),
    book!("pro", "Proverbs", "20", Old),
    book!("ecc", "Ecclesiastes", "21", Old),
    book!("sng", "Song of Songs", "22", Old),
    book!("isa", "Isaiah", "23", Old),
    book!("jer", "Jeremiah", "24", Old),
    book!("lam", "Lamentations", "25", Old),
    book!("ezk", "Ezekiel", "26", Old),
    book!("dan", "Daniel", "27", Old),
    book!("hos", "Hosea", "28", Old),
    book!("jol", "Joel", "29", Old),
    book!("amo", "Amos", "30", Old),
    book!("oba", "Obadiah", "31", Old),
    book!("jon", "Jonah", "32", Old),
    book!("mic", "Micah", "33", Old),
    book!("nam", "Nahum", "34", Old),
    book!("hab", "Habakkuk", "35", Old),
    book!("zep", "Zephaniah", "36", Old),
    book!("hag", "Haggai", "37", Old),
    book!("zec", "Zechariah", "38", Old),
    book!("mal", "Malachi", "39", Old),
    book!("mat", "Matthew", "41", New),
    book!("mrk", "Mark", "42", New),
    book!("luk", "Luke", "43", New),
    book!("jhn", "John", "44", New),
    book!("act", "Acts", "45", New),
    book!("rom", "Romans", "46", New),
    book!("1co", "1 Corinthians", "47", New),
    book!("2co", "2 Corinthians", "48", New),
    book!("gal", "Galatians", "49", New),
    book!("eph", "Ephesians", "50", New),
    book!("php", "Philippians", "51", New),
    book!("col", "Colossians", "52", New),
    book!("1th", "1 Thessalonians", "53", New),
    book!("2th", "2 Thessalonians", "54", New),
    book!("1ti", "1 Timothy", "55", New),
    book!("2ti", "2 Timothy", "56", New),
    book!("tit", "Titus", "57", New),
    book!("phm", "Philemon", "58", New),
    book!("heb", "Hebrews", "59", New),
    book!("jas", "James", "60", New),
    book!("1pe", "1 Peter", "61", New),
    book!("2pe", "2 Peter", "62", New),
    book!("1jn", "1 John", "63", New),
    book!("2jn", "2 John", "64", New),
    book!("3jn", "3 John", "65", New),
    book!("jud", "Jude", "66", New),
    book!("rev", "Revelation", "67", New),
];

pub fn lookup(book_id: &str) -> Result<&'static BookData, RenderError> {
    let id = book_id.trim().to_ascii_lowercase();
    BOOKS
        .iter()
        .find(|book| book.id == id)
        .ok_or_else(|| RenderError::InvalidBook(book_id.to_owned()))
}
