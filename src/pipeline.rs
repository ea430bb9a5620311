use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, CachedBook, HtmlCache, LocalFsHtmlCache, PREVIEW_VERSION};
use crate::cli::{CacheGetArgs, PivotArgs, PrintArgs, RenderArgs, ResourceArgs, TocArgs};
use crate::config::{CacheConfig, RenderConfig};
use crate::fetch::LocalFsFetcher;
use crate::formats::{CatalogEntry, HtmlSections, PrintOptions};
use crate::layout::{FlowPaginator, TextLayoutMeasurer};
use crate::paginate::{PaginationState, PaginationStatus, PrintController};
use crate::print::{PrintDocument, compose, page_size};
use crate::render::{self, RenderContext, Rendered, ResourceKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    Idle,
    Loading,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderStatus {
    pub generation: u64,
    pub state: RenderState,
    pub percent: u32,
    pub message: String,
}

struct SessionInner {
    status: RenderStatus,
    current: Option<Rendered>,
}

/// Owns the rendered document for one viewer. Every render pass gets a new
/// generation; results of superseded passes are discarded.
pub struct RenderSession {
    ctx: RenderContext,
    cache: Option<Arc<dyn HtmlCache>>,
    verification_key: Option<String>,
    generation: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl RenderSession {
    pub fn new(ctx: RenderContext, cache: Option<Arc<dyn HtmlCache>>) -> Self {
        let verification_key = ctx.config.cache.verification_key.clone();
        Self {
            ctx,
            cache,
            verification_key,
            generation: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                status: RenderStatus {
                    generation: 0,
                    state: RenderState::Idle,
                    percent: 0,
                    message: String::new(),
                },
                current: None,
            }),
        }
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> RenderStatus {
        self.inner().status.clone()
    }

    /// Latest committed document.
    pub fn current(&self) -> Option<Rendered> {
        self.inner().current.clone()
    }

    /// Starts a new generation, superseding any pass in flight.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.inner();
        inner.status = RenderStatus {
            generation,
            state: RenderState::Loading,
            percent: 0,
            message: "starting".to_owned(),
        };
        generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Renders `entry` (from the cache when possible). `Ok(None)` means a newer
    /// pass started meanwhile and this result was dropped.
    pub async fn render(
        &self,
        entry: &CatalogEntry,
        book_id: Option<&str>,
    ) -> anyhow::Result<Option<Rendered>> {
        let generation = self.begin();
        match self.try_render(generation, entry, book_id).await {
            Ok(rendered) => Ok(self.commit(generation, rendered)),
            Err(err) => {
                if self.is_current(generation) {
                    tracing::error!(generation, resource = %entry.full_name(), ?err, "render failed");
                    self.mark_error(generation, format!("{err:#}"));
                }
                Err(err)
            }
        }
    }

    async fn try_render(
        &self,
        generation: u64,
        entry: &CatalogEntry,
        book_id: Option<&str>,
    ) -> anyhow::Result<Rendered> {
        let kind = ResourceKind::from_subject(&entry.subject)?;
        let key = CacheKey::for_entry(entry, book_id.filter(|_| kind.needs_book()));

        if let Some(cache) = &self.cache {
            self.update_progress(generation, 5, "cache lookup");
            match cache.get(&key, self.verification_key.as_deref()).await {
                Ok(Some(cached))
                    if cached.commit_sha == entry.commit_sha
                        && cached.preview_version == PREVIEW_VERSION =>
                {
                    tracing::info!(resource = %entry.full_name(), book_id = %key.book_id, "using cached html");
                    return Ok(Rendered {
                        sections: cached.html_sections,
                        built_with: cached.built_with,
                    });
                }
                Ok(Some(_)) => tracing::debug!(resource = %entry.full_name(), "cached html is outdated"),
                Ok(None) => {}
                Err(err) => tracing::warn!(resource = %entry.full_name(), ?err, "cache lookup failed"),
            }
        }

        self.update_progress(generation, 20, "rendering");
        let rendered = render::render(&self.ctx, entry, book_id).await?;

        if let Some(cache) = &self.cache {
            self.update_progress(generation, 90, "caching");
            let book = CachedBook::new(
                entry,
                &key.book_id,
                rendered.sections.clone(),
                rendered.built_with.clone(),
            );
            if let Err(err) = cache.put(&key, self.verification_key.as_deref(), &book).await {
                tracing::warn!(resource = %entry.full_name(), ?err, "cache write failed");
            }
        }
        Ok(rendered)
    }

    fn commit(&self, generation: u64, rendered: Rendered) -> Option<Rendered> {
        let mut inner = self.inner();
        if !self.is_current(generation) {
            tracing::debug!(generation, "discarding stale render");
            return None;
        }
        inner.current = Some(rendered.clone());
        inner.status = RenderStatus {
            generation,
            state: RenderState::Done,
            percent: 100,
            message: "done".to_owned(),
        };
        Some(rendered)
    }

    fn update_progress(&self, generation: u64, percent: u32, message: &str) {
        let mut inner = self.inner();
        if inner.status.generation != generation {
            return;
        }
        inner.status.percent = percent.min(100);
        inner.status.message = message.to_owned();
        tracing::debug!(generation, percent, message, "render progress");
    }

    fn mark_error(&self, generation: u64, message: String) {
        let mut inner = self.inner();
        if inner.status.generation != generation {
            return;
        }
        inner.status.state = RenderState::Error;
        inner.status.message = message;
    }
}

pub fn configured_cache(config: &CacheConfig) -> Option<Arc<dyn HtmlCache>> {
    let dir = config.dir.as_ref()?;
    Some(Arc::new(LocalFsHtmlCache::new(
        dir.clone(),
        config.verification_key.clone(),
    )))
}

async fn open_session(args: &ResourceArgs) -> anyhow::Result<(RenderSession, CatalogEntry)> {
    let config = RenderConfig::load(args.config.as_deref().map(Path::new)).context("load config")?;
    let fetcher = LocalFsFetcher::open(&args.resources)
        .await
        .context("open resources")?;
    let entry = fetcher.entry(&args.resource)?;
    let cache = if args.no_cache {
        None
    } else {
        configured_cache(&config.cache)
    };
    let ctx = RenderContext::new(Arc::new(fetcher), config);
    Ok((RenderSession::new(ctx, cache), entry))
}

async fn render_once(
    session: &RenderSession,
    entry: &CatalogEntry,
    book: Option<&str>,
) -> anyhow::Result<Rendered> {
    session
        .render(entry, book)
        .await?
        .ok_or_else(|| anyhow::anyhow!("render superseded: {}", entry.full_name()))
}

pub fn pivot(args: PivotArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.tsv)
        .with_context(|| format!("read tsv: {}", args.tsv))?;
    let index = crate::tsv::pivot_tsv(&text);
    tracing::info!(rows = index.row_count(), tsv = %args.tsv, "pivoted tsv");
    let json = serde_json::to_string_pretty(&index.to_map()).context("serialize json")?;
    write_output(args.out.as_deref(), &json)
}

pub fn toc(args: TocArgs) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(&args.html)
        .with_context(|| format!("read html: {}", args.html))?;
    write_output(args.out.as_deref(), &crate::html::generate_toc(&html))
}

pub async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let (session, entry) = open_session(&args.resource).await?;
    let rendered = render_once(&session, &entry, args.resource.book.as_deref()).await?;

    let out = PathBuf::from(&args.out);
    tokio::fs::create_dir_all(&out)
        .await
        .with_context(|| format!("create out dir: {}", out.display()))?;

    let sections_path = out.join("sections.json");
    let json = serde_json::to_vec_pretty(&rendered.sections).context("serialize sections")?;
    tokio::fs::write(&sections_path, json)
        .await
        .with_context(|| format!("write: {}", sections_path.display()))?;

    let index_path = out.join("index.html");
    tokio::fs::write(&index_path, web_page(&entry, &rendered.sections))
        .await
        .with_context(|| format!("write: {}", index_path.display()))?;

    tracing::info!(
        out = %out.display(),
        built_with = rendered.built_with.len(),
        "rendered"
    );
    Ok(())
}

pub async fn print(args: PrintArgs) -> anyhow::Result<()> {
    let options = PrintOptions {
        columns: args.columns,
        included_names: args.included_names.clone(),
        hide_cover: args.hide_cover,
        hide_copyright: args.hide_copyright,
        hide_toc: args.hide_toc,
        ..page_size(&args.page_size)?.print_options()
    };
    let (session, entry) = open_session(&args.resource).await?;
    let rendered = render_once(&session, &entry, args.resource.book.as_deref()).await?;
    let document = compose(&entry, &rendered.sections, &options);

    let correction = session.context().config.page_correction_factor;
    let status = paginate_document(&document, &options, correction).await;
    if status.state != PaginationState::Ready {
        anyhow::bail!("pagination aborted: {}", status.message);
    }

    let out = Path::new(&args.out);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }
    tokio::fs::write(out, print_page(&entry, &document))
        .await
        .with_context(|| format!("write: {}", out.display()))?;

    tracing::info!(
        out = %out.display(),
        pages = status.page_count.unwrap_or_default(),
        estimated = status.estimated_page_count.unwrap_or_default(),
        "print document ready"
    );
    let json = serde_json::to_string_pretty(&status).context("serialize status")?;
    write_output(None, &json)
}

pub async fn paginate_document(
    document: &PrintDocument,
    options: &PrintOptions,
    correction_factor: f64,
) -> PaginationStatus {
    let controller = PrintController::new(
        Arc::new(TextLayoutMeasurer::default()),
        Arc::new(FlowPaginator::default()),
        correction_factor,
    );
    controller.set_options(options.clone());
    controller.set_document(document.clone());
    controller.request_render();
    controller.run().await
}

pub async fn cache_get(args: CacheGetArgs) -> anyhow::Result<()> {
    let config = RenderConfig::load(args.config.as_deref().map(Path::new)).context("load config")?;
    let dir = match (args.dir, config.cache.dir) {
        (Some(dir), _) => PathBuf::from(dir),
        (None, Some(dir)) => dir,
        (None, None) => anyhow::bail!("no cache directory: pass --dir or set cache.dir"),
    };
    let cache = LocalFsHtmlCache::new(dir, config.cache.verification_key);
    let key = CacheKey {
        owner: args.owner,
        repo: args.repo,
        git_ref: args.git_ref,
        book_id: args.book.unwrap_or_default().trim().to_lowercase(),
    };
    let path = key.relative_path()?;
    let book = cache
        .get(&key, args.key.as_deref())
        .await?
        .ok_or_else(|| anyhow::anyhow!("not cached: {}", path.display()))?;
    let json = serde_json::to_string_pretty(&book).context("serialize cached book")?;
    write_output(args.out.as_deref(), &json)
}

fn write_output(out: Option<&str>, content: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create parent dir: {}", parent.display()))?;
            }
            std::fs::write(path, content).with_context(|| format!("write: {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{content}").context("write stdout")
        }
    }
}

fn web_page(entry: &CatalogEntry, sections: &HtmlSections) -> String {
    let direction = if entry.is_rtl() { "rtl" } else { "ltr" };
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\" dir=\"{direction}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}\n</style>\n</head>\n<body>\n<div class=\"cover-page\">{cover}</div>\n<nav class=\"toc-page\">{toc}</nav>\n{body}\n<div class=\"copyright-page\">{copyright}</div>\n</body>\n</html>\n",
        lang = crate::markdown::encode_html(&entry.language),
        title = crate::markdown::encode_html(&entry.title),
        css = sections.css.web,
        cover = crate::html::generate_cover(entry, &sections.cover),
        toc = sections.toc,
        body = sections.body,
        copyright = sections.copyright,
    )
}

fn print_page(entry: &CatalogEntry, document: &PrintDocument) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}\n</style>\n</head>\n<body>{html}</body>\n</html>\n",
        lang = crate::markdown::encode_html(&entry.language),
        title = crate::markdown::encode_html(&entry.title),
        css = document.css,
        html = document.html,
    )
}
