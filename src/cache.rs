use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::formats::{CatalogEntry, HtmlSections};

pub const PREVIEW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One rendered document as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedBook {
    pub book_id: String,
    pub preview_version: String,
    pub date_iso: String,
    pub date_unix: i64,
    pub commit_sha: String,
    pub html_sections: HtmlSections,
    pub catalog_entry: CatalogEntry,
    #[serde(default)]
    pub built_with: Vec<CatalogEntry>,
}

impl CachedBook {
    pub fn new(
        entry: &CatalogEntry,
        book_id: &str,
        html_sections: HtmlSections,
        built_with: Vec<CatalogEntry>,
    ) -> Self {
        let now = Utc::now();
        Self {
            book_id: book_id.to_owned(),
            preview_version: PREVIEW_VERSION.to_owned(),
            date_iso: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            date_unix: now.timestamp(),
            commit_sha: entry.commit_sha.clone(),
            html_sections,
            catalog_entry: entry.clone(),
            built_with,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
    /// Empty for whole-resource documents (OBS, TA, TW).
    pub book_id: String,
}

impl CacheKey {
    pub fn for_entry(entry: &CatalogEntry, book_id: Option<&str>) -> Self {
        Self {
            owner: entry.owner.clone(),
            repo: entry.repo.name.clone(),
            git_ref: entry.branch_or_tag_name.clone(),
            book_id: book_id.unwrap_or_default().trim().to_lowercase(),
        }
    }

    /// `u/<owner>/<repo>/<ref>/<book>.json.gz`
    pub fn relative_path(&self) -> anyhow::Result<PathBuf> {
        let book = if self.book_id.is_empty() {
            "all"
        } else {
            &self.book_id
        };
        let mut path = PathBuf::from("u");
        for part in [&self.owner, &self.repo, &self.git_ref] {
            path.push(safe_component(part)?);
        }
        path.push(format!("{}.json.gz", safe_component(book)?));
        Ok(path)
    }
}

fn safe_component(part: &str) -> anyhow::Result<&str> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        anyhow::bail!("invalid cache key component: {part:?}");
    }
    Ok(part)
}

#[async_trait]
pub trait HtmlCache: Send + Sync {
    async fn get(&self, key: &CacheKey, verification_key: Option<&str>)
    -> anyhow::Result<Option<CachedBook>>;
    async fn put(
        &self,
        key: &CacheKey,
        verification_key: Option<&str>,
        book: &CachedBook,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsHtmlCache {
    base_dir: PathBuf,
    verification_key: Option<String>,
}

impl LocalFsHtmlCache {
    /// With `verification_key` set, callers must present the same key.
    pub fn new(base_dir: impl Into<PathBuf>, verification_key: Option<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            verification_key,
        }
    }

    fn verify(&self, presented: Option<&str>) -> anyhow::Result<()> {
        match (&self.verification_key, presented) {
            (None, _) => Ok(()),
            (Some(expected), Some(presented)) if expected == presented => Ok(()),
            (Some(_), Some(_)) => anyhow::bail!("cache verification key mismatch"),
            (Some(_), None) => anyhow::bail!("cache verification key required"),
        }
    }

    fn path(&self, key: &CacheKey) -> anyhow::Result<PathBuf> {
        Ok(self.base_dir.join(key.relative_path()?))
    }
}

#[async_trait]
impl HtmlCache for LocalFsHtmlCache {
    async fn get(
        &self,
        key: &CacheKey,
        verification_key: Option<&str>,
    ) -> anyhow::Result<Option<CachedBook>> {
        self.verify(verification_key)?;
        let path = self.path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "cache miss");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read: {}", path.display()));
            }
        };
        let book = decode(&bytes).with_context(|| format!("decode: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "cache hit");
        Ok(Some(book))
    }

    async fn put(
        &self,
        key: &CacheKey,
        verification_key: Option<&str>,
        book: &CachedBook,
    ) -> anyhow::Result<()> {
        self.verify(verification_key)?;
        let path = self.path(key)?;
        let data = encode(book).context("encode cached book")?;
        write_atomic(&path, &data).await?;
        tracing::info!(path = %path.display(), bytes = data.len(), "cached html");
        Ok(())
    }
}

pub fn encode(book: &CachedBook) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(book).context("serialize json")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).context("gzip")?;
    encoder.finish().context("gzip finish")
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<CachedBook> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .context("gunzip")?;
    serde_json::from_slice(&json).context("parse json")
}

async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
