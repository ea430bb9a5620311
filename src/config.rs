use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUOTE_TOKEN_DELIMITER: &str = " … ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Joins discontiguous pieces of an aligned quote.
    pub quote_token_delimiter: String,
    /// How many levels of `rc://` links inside appendix articles get resolved.
    pub max_rc_depth: u32,
    /// Rows aligned between cooperative yields.
    pub quote_chunk_size: usize,
    pub page_correction_factor: f64,
    /// `360px` or `2160px`.
    pub obs_image_resolution: String,
    pub cache: CacheConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            quote_token_delimiter: DEFAULT_QUOTE_TOKEN_DELIMITER.to_owned(),
            max_rc_depth: 3,
            quote_chunk_size: 100,
            page_correction_factor: 1.0,
            obs_image_resolution: "360px".to_owned(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    /// Shared secret a caller must present to read or write cached documents.
    pub verification_key: Option<String>,
}

impl RenderConfig {
    /// Defaults, then the YAML file (if any), then `RCPRINT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                serde_yaml::from_str(&yaml)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
            None => Self::default(),
        };
        config
            .apply_overrides(|name| std::env::var(name).ok())
            .context("apply environment overrides")?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(value) = lookup("RCPRINT_QUOTE_TOKEN_DELIMITER") {
            self.quote_token_delimiter = value;
        }
        if let Some(value) = lookup("RCPRINT_MAX_RC_DEPTH") {
            self.max_rc_depth = value
                .trim()
                .parse()
                .with_context(|| format!("invalid RCPRINT_MAX_RC_DEPTH={value:?}"))?;
        }
        if let Some(value) = lookup("RCPRINT_QUOTE_CHUNK_SIZE") {
            self.quote_chunk_size = value
                .trim()
                .parse()
                .with_context(|| format!("invalid RCPRINT_QUOTE_CHUNK_SIZE={value:?}"))?;
        }
        if let Some(value) = lookup("RCPRINT_PAGE_CORRECTION_FACTOR") {
            self.page_correction_factor = value
                .trim()
                .parse()
                .with_context(|| format!("invalid RCPRINT_PAGE_CORRECTION_FACTOR={value:?}"))?;
        }
        if let Some(value) = lookup("RCPRINT_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("RCPRINT_CACHE_VERIFICATION_KEY") {
            let value = value.trim().to_owned();
            self.cache.verification_key = (!value.is_empty()).then_some(value);
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.quote_token_delimiter.is_empty() {
            anyhow::bail!("quote_token_delimiter must not be empty");
        }
        if self.quote_chunk_size == 0 {
            anyhow::bail!("quote_chunk_size must be at least 1");
        }
        if !(self.page_correction_factor.is_finite() && self.page_correction_factor > 0.0) {
            anyhow::bail!(
                "page_correction_factor must be positive: {}",
                self.page_correction_factor
            );
        }
        if !matches!(self.obs_image_resolution.as_str(), "360px" | "2160px") {
            anyhow::bail!(
                "unsupported obs_image_resolution: {}",
                self.obs_image_resolution
            );
        }
        Ok(())
    }
}
