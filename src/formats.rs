use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRef {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    pub identifier: String,
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sort: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataType {
    #[default]
    Rc,
    Ts,
    Sb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub owner: String,
    pub repo: RepoRef,
    pub subject: String,
    #[serde(default)]
    pub metadata_type: MetadataType,
    #[serde(default)]
    pub title: String,
    pub abbreviation: String,
    pub language: String,
    #[serde(default = "default_direction")]
    pub language_direction: String,
    #[serde(default = "default_ref")]
    pub branch_or_tag_name: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<String>,
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

fn default_direction() -> String {
    "ltr".to_owned()
}

fn default_ref() -> String {
    "master".to_owned()
}

impl CatalogEntry {
    /// `<language>/<abbreviation>`, the form used in relation lists.
    pub fn relation_key(&self) -> String {
        format!("{}/{}", self.language, self.abbreviation)
    }

    /// `<owner>/<repo>/<ref>` for logs and cache keys.
    pub fn full_name(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repo.name, self.branch_or_tag_name)
    }

    pub fn ingredient(&self, identifier: &str) -> Option<&Ingredient> {
        self.ingredients
            .iter()
            .find(|ingredient| ingredient.identifier.eq_ignore_ascii_case(identifier))
    }

    pub fn is_rtl(&self) -> bool {
        self.language_direction == "rtl"
    }

    /// Version string derived from the tag name (`v12` -> `12`).
    pub fn version(&self) -> &str {
        self.branch_or_tag_name
            .strip_prefix('v')
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or(&self.branch_or_tag_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SectionCss {
    #[serde(default)]
    pub web: String,
    #[serde(default)]
    pub print: String,
}

/// The assembled document. Replaced wholesale on every render pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HtmlSections {
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub toc: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub css: SectionCss,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrintOptions {
    pub page_width: String,
    pub page_height: String,
    #[serde(default = "default_columns")]
    pub columns: u32,
    #[serde(default)]
    pub included_names: Vec<String>,
    #[serde(default)]
    pub hide_cover: bool,
    #[serde(default)]
    pub hide_copyright: bool,
    #[serde(default)]
    pub hide_toc: bool,
}

fn default_columns() -> u32 {
    1
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            page_width: "210mm".to_owned(),
            page_height: "297mm".to_owned(),
            columns: default_columns(),
            included_names: Vec::new(),
            hide_cover: false,
            hide_copyright: false,
            hide_toc: false,
        }
    }
}
