use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::RenderError;
use crate::formats::{Catalog, CatalogEntry};

/// Repository snapshot keyed by `/`-separated path relative to the repo root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceArchive {
    files: BTreeMap<String, Vec<u8>>,
}

impl ResourceArchive {
    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files
            .insert(normalize_path(&path.into()), bytes.into());
    }

    /// Reads a zip; a single top-level directory (`<repo>/...`) is stripped.
    pub fn from_zip_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).context("open zip archive")?;
        let mut files = BTreeMap::new();
        for index in 0..zip.len() {
            let mut file = zip
                .by_index(index)
                .with_context(|| format!("read zip entry #{index}"))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_owned();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {name}"))?;
            files.insert(normalize_path(&name), data);
        }
        Ok(Self {
            files: strip_common_root(files),
        })
    }

    pub async fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut archive = Self::default();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .with_context(|| format!("read dir: {}", current.display()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("list dir: {}", current.display()))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.context("read entry type")?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(dir)
                    .with_context(|| format!("relativize: {}", path.display()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("read: {}", path.display()))?;
                archive.files.insert(rel, data);
            }
        }
        Ok(archive)
    }

    pub fn bytes(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&normalize_path(path)).map(Vec::as_slice)
    }

    pub fn read_to_string(&self, path: &str) -> Option<String> {
        self.bytes(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn paths_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.paths().filter(move |path| path.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches("./")
        .trim_start_matches('/')
        .replace('\\', "/")
}

fn strip_common_root(files: BTreeMap<String, Vec<u8>>) -> BTreeMap<String, Vec<u8>> {
    let mut roots = files.keys().map(|path| path.split_once('/').map(|(root, _)| root));
    let Some(Some(first)) = roots.next() else {
        return files;
    };
    let first = first.to_owned();
    if !roots.all(|root| root == Some(first.as_str())) {
        return files;
    }
    let prefix = format!("{first}/");
    files
        .into_iter()
        .map(|(path, data)| (path[prefix.len()..].to_owned(), data))
        .collect()
}

/// Where resource content comes from. Implementations may hit the network;
/// the renderers only see this trait.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_zip(&self, entry: &CatalogEntry) -> anyhow::Result<Arc<ResourceArchive>>;

    async fn fetch_relation_entries(
        &self,
        entry: &CatalogEntry,
        required_subjects: &[&str],
    ) -> anyhow::Result<Vec<CatalogEntry>>;

    /// OBS image archive for the given resolution, if one is available locally.
    async fn fetch_image_archive(
        &self,
        resolution: &str,
    ) -> anyhow::Result<Option<Arc<ResourceArchive>>>;

    async fn fetch_file(&self, entry: &CatalogEntry, path: &str) -> anyhow::Result<Option<String>> {
        let archive = self.fetch_zip(entry).await?;
        Ok(archive.read_to_string(path))
    }

    /// Book file content for each entry, in entry order.
    async fn fetch_book_files(
        &self,
        entries: &[CatalogEntry],
        book_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let ingredient =
                entry
                    .ingredient(book_id)
                    .ok_or_else(|| RenderError::BookNotInResource {
                        book: book_id.to_owned(),
                        resource: entry.full_name(),
                    })?;
            let content = self
                .fetch_file(entry, &ingredient.path)
                .await?
                .ok_or_else(|| RenderError::MissingFile {
                    resource: entry.full_name(),
                    path: ingredient.path.clone(),
                })?;
            files.push(content);
        }
        Ok(files)
    }
}

/// Original-language texts every helps resource implicitly relates to.
const ORIGINAL_LANGUAGE_RELATIONS: [(&str, &str); 2] = [
    ("Greek New Testament", "el-x-koine/ugnt"),
    ("Hebrew Old Testament", "hbo/uhb"),
];

/// Reads `catalog.yaml` plus one `<repo>/` directory or `<repo>.zip` per repository.
pub struct LocalFsFetcher {
    root: PathBuf,
    catalog: Catalog,
    archives: Mutex<HashMap<String, Arc<ResourceArchive>>>,
}

impl LocalFsFetcher {
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let catalog_path = root.join("catalog.yaml");
        let yaml = tokio::fs::read_to_string(&catalog_path)
            .await
            .with_context(|| format!("read catalog: {}", catalog_path.display()))?;
        let catalog: Catalog = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parse catalog: {}", catalog_path.display()))?;
        tracing::debug!(root = %root.display(), entries = catalog.entries.len(), "opened catalog");
        Ok(Self {
            root,
            catalog,
            archives: Mutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Finds an entry by `owner/repo`, `repo`, or `language/abbreviation`.
    pub fn entry(&self, selector: &str) -> anyhow::Result<CatalogEntry> {
        let selector = selector.trim();
        self.catalog
            .entries
            .iter()
            .find(|entry| {
                format!("{}/{}", entry.owner, entry.repo.name) == selector
                    || entry.repo.name == selector
                    || entry.relation_key() == selector
            })
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("catalog has no entry matching {selector:?}"))
    }

    async fn load_archive(&self, name: &str) -> anyhow::Result<Option<ResourceArchive>> {
        let dir = self.root.join(name);
        if tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return ResourceArchive::from_dir(&dir).await.map(Some);
        }
        let zip_path = self.root.join(format!("{name}.zip"));
        match tokio::fs::read(&zip_path).await {
            Ok(bytes) => ResourceArchive::from_zip_bytes(&bytes)
                .with_context(|| format!("read zip: {}", zip_path.display()))
                .map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", zip_path.display())),
        }
    }
}

#[async_trait]
impl ResourceFetcher for LocalFsFetcher {
    async fn fetch_zip(&self, entry: &CatalogEntry) -> anyhow::Result<Arc<ResourceArchive>> {
        let key = entry.full_name();
        let mut archives = self.archives.lock().await;
        if let Some(archive) = archives.get(&key) {
            return Ok(Arc::clone(archive));
        }
        let archive = self
            .load_archive(&entry.repo.name)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no directory or zip for {} under {}",
                    entry.repo.name,
                    self.root.display()
                )
            })?;
        tracing::debug!(resource = %key, files = archive.len(), "loaded resource archive");
        let archive = Arc::new(archive);
        archives.insert(key, Arc::clone(&archive));
        Ok(archive)
    }

    async fn fetch_relation_entries(
        &self,
        entry: &CatalogEntry,
        required_subjects: &[&str],
    ) -> anyhow::Result<Vec<CatalogEntry>> {
        let mut relations: Vec<&str> = entry
            .relations
            .iter()
            .map(|relation| relation.split('?').next().unwrap_or(relation).trim())
            .collect();
        for (subject, implied) in ORIGINAL_LANGUAGE_RELATIONS {
            if required_subjects.contains(&subject) && !relations.contains(&implied) {
                relations.push(implied);
            }
        }

        let mut related = Vec::new();
        for key in relations {
            for candidate in &self.catalog.entries {
                if candidate.relation_key() == key
                    && required_subjects.contains(&candidate.subject.as_str())
                    && !related.contains(candidate)
                {
                    related.push(candidate.clone());
                }
            }
        }
        Ok(related)
    }

    async fn fetch_image_archive(
        &self,
        resolution: &str,
    ) -> anyhow::Result<Option<Arc<ResourceArchive>>> {
        let name = format!("obs-images-{resolution}");
        Ok(self.load_archive(&name).await?.map(Arc::new))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn zip_bytes(files: &[(&str, &str)]) -> anyhow::Result<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options)?;
            zip.write_all(content.as_bytes())?;
        }
        Ok(zip.finish()?.into_inner())
    }

    #[test]
    fn zip_archive_strips_single_top_level_dir() -> anyhow::Result<()> {
        let bytes = zip_bytes(&[
            ("en_ta/translate/figs-metaphor/title.md", "Metaphor"),
            ("en_ta/translate/toc.yaml", "title: Translate"),
        ])?;
        let archive = ResourceArchive::from_zip_bytes(&bytes)?;
        assert_eq!(
            archive.read_to_string("translate/figs-metaphor/title.md").as_deref(),
            Some("Metaphor")
        );
        assert!(archive.contains("./translate/toc.yaml"));
        Ok(())
    }

    #[test]
    fn mixed_roots_are_kept() -> anyhow::Result<()> {
        let bytes = zip_bytes(&[("a/x.md", "x"), ("b/y.md", "y")])?;
        let archive = ResourceArchive::from_zip_bytes(&bytes)?;
        assert!(archive.contains("a/x.md"));
        assert_eq!(archive.paths_under("b/").count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn local_fetcher_resolves_relations_and_book_files() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        std::fs::write(
            temp.path().join("catalog.yaml"),
            r#"entries:
  - owner: unfoldingWord
    repo: { name: en_tn, owner: unfoldingWord }
    subject: TSV Translation Notes
    abbreviation: tn
    language: en
    relations: [en/ult, en/ta?v=80, hbo/uhb]
    ingredients: [{ identifier: tit, path: ./tn_TIT.tsv }]
  - owner: unfoldingWord
    repo: { name: en_ult, owner: unfoldingWord }
    subject: Aligned Bible
    abbreviation: ult
    language: en
    ingredients: [{ identifier: tit, path: ./57-TIT.usfm }]
  - owner: unfoldingWord
    repo: { name: en_ta, owner: unfoldingWord }
    subject: Translation Academy
    abbreviation: ta
    language: en
"#,
        )?;
        std::fs::create_dir_all(temp.path().join("en_ult"))?;
        std::fs::write(temp.path().join("en_ult/57-TIT.usfm"), "\\id TIT\n")?;

        let fetcher = LocalFsFetcher::open(temp.path()).await?;
        let tn = fetcher.entry("unfoldingWord/en_tn")?;
        let bibles = fetcher
            .fetch_relation_entries(&tn, &["Aligned Bible", "Bible"])
            .await?;
        assert_eq!(bibles.len(), 1);
        assert_eq!(bibles[0].repo.name, "en_ult");

        let ta = fetcher
            .fetch_relation_entries(&tn, &["Translation Academy"])
            .await?;
        assert_eq!(ta[0].abbreviation, "ta");

        let files = fetcher.fetch_book_files(&bibles, "tit").await?;
        assert_eq!(files, vec!["\\id TIT\n".to_owned()]);

        let err = fetcher.fetch_book_files(&bibles, "rut").await.unwrap_err();
        assert!(err.to_string().contains("rut"));
        Ok(())
    }
}
