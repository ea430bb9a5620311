use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::formats::PrintOptions;
use crate::layout::{LayoutMeasurer, PageBox, PageFlow, Paginator};
use crate::print::{PrintDocument, content_box_px};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaginationState {
    NotStarted,
    Estimating,
    Rendering,
    Ready,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationStatus {
    pub state: PaginationState,
    pub generation: u64,
    pub estimated_page_count: Option<u32>,
    pub percent_done: u32,
    /// Set once the pass is `Ready`.
    pub page_count: Option<u32>,
    pub message: String,
}

impl PaginationStatus {
    fn reset(generation: u64) -> Self {
        Self {
            state: PaginationState::NotStarted,
            generation,
            estimated_page_count: None,
            percent_done: 0,
            page_count: None,
            message: String::new(),
        }
    }
}

/// `max(1, ceil(height / page_height * correction))`.
pub fn estimate_page_count(height: f64, page_height: f64, correction: f64) -> u32 {
    if !height.is_finite() || !page_height.is_finite() || page_height <= 0.0 {
        return 1;
    }
    let pages = (height / page_height * correction).ceil();
    if pages.is_finite() && pages >= 1.0 {
        pages.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// Progress while rendering; never reports 100 before completion.
pub fn progress_percent(page: u32, estimated: u32) -> u32 {
    let estimated = estimated.max(1);
    let percent = (f64::from(page) / f64::from(estimated) * 100.0).round();
    (percent as u32).min(99)
}

struct Inner {
    status: PaginationStatus,
    document: Option<PrintDocument>,
    options: PrintOptions,
    visible: bool,
    requested: bool,
}

/// Drives estimation then pagination for one print surface. Content, option
/// and CSS changes reset it and bump the generation; a pass whose generation
/// went stale stops at its next page and its result is dropped.
pub struct PrintController {
    measurer: Arc<dyn LayoutMeasurer>,
    paginator: Arc<dyn Paginator>,
    correction_factor: f64,
    inner: Mutex<Inner>,
}

impl PrintController {
    pub fn new(
        measurer: Arc<dyn LayoutMeasurer>,
        paginator: Arc<dyn Paginator>,
        correction_factor: f64,
    ) -> Self {
        Self {
            measurer,
            paginator,
            correction_factor,
            inner: Mutex::new(Inner {
                status: PaginationStatus::reset(0),
                document: None,
                options: PrintOptions::default(),
                visible: false,
                requested: false,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PaginationStatus {
        self.inner().status.clone()
    }

    /// New HTML or CSS. Identical content leaves the state alone.
    pub fn set_document(&self, document: PrintDocument) {
        let mut inner = self.inner();
        if inner.document.as_ref() == Some(&document) {
            return;
        }
        inner.document = Some(document);
        invalidate(&mut inner, "document changed");
    }

    pub fn set_options(&self, options: PrintOptions) {
        let mut inner = self.inner();
        if inner.options == options {
            return;
        }
        inner.options = options;
        invalidate(&mut inner, "print options changed");
    }

    pub fn set_visible(&self, visible: bool) {
        self.inner().visible = visible;
    }

    /// Explicit print request; lets a pass start while the surface is hidden.
    pub fn request_render(&self) {
        self.inner().requested = true;
    }

    pub fn should_start(&self) -> bool {
        let inner = self.inner();
        inner.status.state == PaginationState::NotStarted
            && inner.document.is_some()
            && (inner.visible || inner.requested)
    }

    /// Runs one pass if one may start; otherwise returns the current status.
    pub async fn run(&self) -> PaginationStatus {
        let (generation, document, options) = {
            let mut inner = self.inner();
            let startable = inner.status.state == PaginationState::NotStarted
                && (inner.visible || inner.requested);
            let Some(document) = inner.document.clone().filter(|_| startable) else {
                return inner.status.clone();
            };
            inner.status.state = PaginationState::Estimating;
            inner.requested = false;
            (inner.status.generation, document, inner.options.clone())
        };
        tracing::info!(generation, "pagination started");

        if let Err(err) = self.run_pass(generation, &document, &options).await {
            let mut inner = self.inner();
            if inner.status.generation == generation {
                tracing::error!(generation, ?err, "pagination aborted");
                inner.status.state = PaginationState::Aborted;
                inner.status.message = format!("{err:#}");
            }
        }
        self.status()
    }

    async fn run_pass(
        &self,
        generation: u64,
        document: &PrintDocument,
        options: &PrintOptions,
    ) -> anyhow::Result<()> {
        let (width, height) = content_box_px(options)?;
        let measured = self.measurer.measure_height(document, width)?;
        let estimated = estimate_page_count(measured, height, self.correction_factor);
        {
            let mut inner = self.inner();
            if inner.status.generation != generation {
                tracing::debug!(generation, "estimate dropped for stale pass");
                return Ok(());
            }
            inner.status.state = PaginationState::Rendering;
            inner.status.estimated_page_count = Some(estimated);
            inner.status.percent_done = 0;
        }
        tracing::debug!(generation, measured, estimated, "estimated page count");

        let mut on_page = |page: u32| {
            let mut inner = self.inner();
            if inner.status.generation != generation {
                return PageFlow::Stop;
            }
            let percent = progress_percent(page, estimated);
            if percent > inner.status.percent_done {
                inner.status.percent_done = percent;
            }
            PageFlow::Continue
        };
        let pages = self
            .paginator
            .paginate(document, PageBox { width, height }, &mut on_page)
            .await?;

        let mut inner = self.inner();
        if inner.status.generation != generation {
            tracing::debug!(generation, pages, "result dropped for stale pass");
            return Ok(());
        }
        inner.status.state = PaginationState::Ready;
        inner.status.percent_done = 100;
        inner.status.page_count = Some(pages);
        tracing::info!(generation, pages, estimated, "pagination ready");
        Ok(())
    }
}

fn invalidate(inner: &mut Inner, reason: &str) {
    let generation = inner.status.generation + 1;
    tracing::debug!(generation, reason, "pagination reset");
    inner.status = PaginationStatus::reset(generation);
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::layout::{FlowPaginator, TextLayoutMeasurer};

    struct FixedHeight(f64);

    impl LayoutMeasurer for FixedHeight {
        fn measure_height(&self, _: &PrintDocument, _: f64) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    /// Reports `pages` pages, recording the percent seen after each.
    struct CountingPaginator {
        pages: u32,
        seen: Arc<Mutex<Vec<u32>>>,
        controller_status: Arc<Mutex<Option<Arc<PrintController>>>>,
    }

    #[async_trait]
    impl Paginator for CountingPaginator {
        async fn paginate(
            &self,
            _: &PrintDocument,
            _: PageBox,
            on_page: &mut (dyn FnMut(u32) -> PageFlow + Send),
        ) -> anyhow::Result<u32> {
            for page in 1..=self.pages {
                if on_page(page) == PageFlow::Stop {
                    return Ok(page);
                }
                let controller = self.controller_status.lock().unwrap().clone();
                if let Some(controller) = controller {
                    self.seen.lock().unwrap().push(controller.status().percent_done);
                }
            }
            Ok(self.pages)
        }
    }

    struct FailingPaginator;

    #[async_trait]
    impl Paginator for FailingPaginator {
        async fn paginate(
            &self,
            _: &PrintDocument,
            _: PageBox,
            _: &mut (dyn FnMut(u32) -> PageFlow + Send),
        ) -> anyhow::Result<u32> {
            anyhow::bail!("layout engine crashed")
        }
    }

    fn doc(body: &str) -> PrintDocument {
        PrintDocument {
            html: body.to_owned(),
            css: String::new(),
        }
    }

    #[test]
    fn estimate_is_at_least_one_page() {
        assert_eq!(estimate_page_count(0.0, 1000.0, 1.0), 1);
        assert_eq!(estimate_page_count(2500.0, 1000.0, 1.0), 3);
        assert_eq!(estimate_page_count(2500.0, 1000.0, 1.25), 4);
        assert_eq!(estimate_page_count(10.0, 0.0, 1.0), 1);
    }

    #[test]
    fn progress_caps_at_ninety_nine() {
        assert_eq!(progress_percent(1, 4), 25);
        assert_eq!(progress_percent(4, 4), 99);
        assert_eq!(progress_percent(9, 4), 99);
        assert_eq!(progress_percent(1, 0), 99);
    }

    #[tokio::test]
    async fn percent_never_decreases_and_hits_100_only_when_ready() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::new(Mutex::new(None));
        // Estimated 3 pages, actual 6: progress saturates at 99.
        let controller = Arc::new(PrintController::new(
            Arc::new(FixedHeight(2500.0)),
            Arc::new(CountingPaginator {
                pages: 6,
                seen: seen.clone(),
                controller_status: handle.clone(),
            }),
            1.0,
        ));
        *handle.lock().unwrap() = Some(controller.clone());
        controller.set_options(PrintOptions {
            page_width: "1100px".to_owned(),
            page_height: "1075.59px".to_owned(),
            ..PrintOptions::default()
        });
        controller.set_document(doc("<p>x</p>"));
        controller.request_render();

        let status = controller.run().await;
        assert_eq!(status.state, PaginationState::Ready);
        assert_eq!(status.percent_done, 100);
        assert_eq!(status.page_count, Some(6));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| *p <= 99));
        assert_eq!(seen.last(), Some(&99));
    }

    #[tokio::test]
    async fn hidden_surface_waits_for_visibility_or_request() {
        let controller = PrintController::new(
            Arc::new(TextLayoutMeasurer::default()),
            Arc::new(FlowPaginator::default()),
            1.0,
        );
        controller.set_document(doc("<p>hello</p>"));
        assert!(!controller.should_start());
        assert_eq!(controller.run().await.state, PaginationState::NotStarted);

        controller.set_visible(true);
        assert!(controller.should_start());
        let status = controller.run().await;
        assert_eq!(status.state, PaginationState::Ready);
        assert_eq!(status.page_count, Some(1));
    }

    #[tokio::test]
    async fn option_change_after_ready_resets_to_not_started() {
        let controller = PrintController::new(
            Arc::new(TextLayoutMeasurer::default()),
            Arc::new(FlowPaginator::default()),
            1.0,
        );
        controller.set_document(doc("<section class=\"bible-book\"><p>text</p></section>"));
        controller.set_visible(true);
        let ready = controller.run().await;
        assert_eq!(ready.state, PaginationState::Ready);

        controller.set_options(PrintOptions {
            columns: 2,
            ..PrintOptions::default()
        });
        let reset = controller.status();
        assert_eq!(reset.state, PaginationState::NotStarted);
        assert_eq!(reset.estimated_page_count, None);
        assert_eq!(reset.percent_done, 0);
        assert_eq!(reset.generation, ready.generation + 1);

        controller.set_options(PrintOptions {
            columns: 2,
            ..PrintOptions::default()
        });
        assert_eq!(controller.status().generation, reset.generation);
    }

    #[tokio::test]
    async fn paginator_failure_aborts_with_message() {
        let controller = PrintController::new(
            Arc::new(FixedHeight(10.0)),
            Arc::new(FailingPaginator),
            1.0,
        );
        controller.set_document(doc("<p>x</p>"));
        controller.request_render();
        let status = controller.run().await;
        assert_eq!(status.state, PaginationState::Aborted);
        assert!(status.message.contains("layout engine crashed"));
        assert!(!controller.should_start());
    }

    /// Invalidates the controller from inside the page callback of a running pass.
    struct InvalidatingPaginator {
        controller: Arc<Mutex<Option<Arc<PrintController>>>>,
    }

    #[async_trait]
    impl Paginator for InvalidatingPaginator {
        async fn paginate(
            &self,
            _: &PrintDocument,
            _: PageBox,
            on_page: &mut (dyn FnMut(u32) -> PageFlow + Send),
        ) -> anyhow::Result<u32> {
            assert_eq!(on_page(1), PageFlow::Continue);
            let controller = self.controller.lock().unwrap().clone();
            if let Some(controller) = controller {
                controller.set_document(doc("<p>edited</p>"));
            }
            assert_eq!(on_page(2), PageFlow::Stop);
            Ok(2)
        }
    }

    #[tokio::test]
    async fn stale_pass_stops_and_its_result_is_dropped() {
        let handle = Arc::new(Mutex::new(None));
        let controller = Arc::new(PrintController::new(
            Arc::new(FixedHeight(10.0)),
            Arc::new(InvalidatingPaginator {
                controller: handle.clone(),
            }),
            1.0,
        ));
        *handle.lock().unwrap() = Some(controller.clone());
        controller.set_document(doc("<p>original</p>"));
        controller.request_render();

        let status = controller.run().await;
        assert_eq!(status.state, PaginationState::NotStarted);
        assert_eq!(status.page_count, None);
        assert_eq!(status.generation, 2);
    }
}
