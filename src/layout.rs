use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};

use crate::print::PrintDocument;

/// Content box of one page in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub width: f64,
    pub height: f64,
}

/// Lays a document out at a fixed width and reports its total height.
pub trait LayoutMeasurer: Send + Sync {
    fn measure_height(&self, document: &PrintDocument, width: f64) -> anyhow::Result<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFlow {
    Continue,
    Stop,
}

/// Splits a document into pages, calling `on_page` with the 1-based number of
/// every finished page. Returns the page count, or the pages laid out so far
/// when the callback asked to stop.
#[async_trait]
pub trait Paginator: Send + Sync {
    async fn paginate(
        &self,
        document: &PrintDocument,
        page: PageBox,
        on_page: &mut (dyn FnMut(u32) -> PageFlow + Send),
    ) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub font_size_px: f64,
    pub line_height: f64,
    /// Average glyph advance as a fraction of the font size.
    pub char_width_em: f64,
    pub block_spacing_px: f64,
    pub image_height_px: f64,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self {
            font_size_px: 16.0,
            line_height: 1.3,
            char_width_em: 0.5,
            block_spacing_px: 8.0,
            image_height_px: 240.0,
        }
    }
}

/// One laid-out block: its height and whether it must start a new page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub height: f64,
    pub break_before: bool,
}

const SKIPPED: &[&str] = &["style", "script", "head", "title", "input", "label"];
const LEAVES: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "pre", "blockquote", "tr", "dt", "dd",
];

/// Headless measurer: block elements become lines of average-width glyphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLayoutMeasurer {
    pub metrics: TextMetrics,
}

impl TextLayoutMeasurer {
    pub fn blocks(&self, html: &str, width: f64) -> Vec<Block> {
        let fragment = Html::parse_fragment(html);
        let mut blocks = Vec::new();
        self.walk(fragment.root_element(), width.max(1.0), false, &mut blocks);
        blocks
    }

    fn walk(&self, element: ElementRef<'_>, width: f64, break_before: bool, blocks: &mut Vec<Block>) {
        let mut pending_break = break_before;
        let mut loose_text = String::new();
        for child in element.children() {
            match child.value() {
                Node::Text(text) => loose_text.push_str(text),
                Node::Element(_) => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if !loose_text.trim().is_empty() {
                        blocks.push(self.text_block(&loose_text, 1.0, width, pending_break));
                        pending_break = false;
                    }
                    loose_text.clear();

                    let name = child.value().name();
                    let starts_page = name == "section";
                    if SKIPPED.contains(&name) {
                        continue;
                    }
                    if name == "img" {
                        blocks.push(Block {
                            height: self.metrics.image_height_px,
                            break_before: pending_break || starts_page,
                        });
                        pending_break = false;
                    } else if name == "hr" || name == "br" {
                        blocks.push(Block {
                            height: self.metrics.block_spacing_px,
                            break_before: pending_break,
                        });
                        pending_break = false;
                    } else if LEAVES.contains(&name) {
                        let text: String = child.text().collect();
                        blocks.push(self.text_block(&text, heading_scale(name), width, pending_break));
                        pending_break = false;
                    } else {
                        let before = blocks.len();
                        self.walk(child, width, pending_break || starts_page, blocks);
                        if blocks.len() > before {
                            pending_break = false;
                        }
                    }
                }
                _ => {}
            }
        }
        if !loose_text.trim().is_empty() {
            blocks.push(self.text_block(&loose_text, 1.0, width, pending_break));
        }
    }

    fn text_block(&self, text: &str, scale: f64, width: f64, break_before: bool) -> Block {
        let font_size = self.metrics.font_size_px * scale;
        let chars = text.split_whitespace().map(|w| w.chars().count() + 1).sum::<usize>();
        let per_line = (width / (font_size * self.metrics.char_width_em)).floor().max(1.0);
        let lines = (chars as f64 / per_line).ceil().max(1.0);
        Block {
            height: lines * font_size * self.metrics.line_height + self.metrics.block_spacing_px,
            break_before,
        }
    }
}

fn heading_scale(name: &str) -> f64 {
    match name {
        "h1" => 1.6,
        "h2" => 1.5,
        "h3" => 1.17,
        "h5" => 0.83,
        "h6" => 0.67,
        _ => 1.0,
    }
}

impl LayoutMeasurer for TextLayoutMeasurer {
    fn measure_height(&self, document: &PrintDocument, width: f64) -> anyhow::Result<f64> {
        if !width.is_finite() || width <= 0.0 {
            anyhow::bail!("invalid measurement width: {width}");
        }
        Ok(self.blocks(&document.html, width).iter().map(|b| b.height).sum())
    }
}

/// Flows measured blocks into pages; `<section>` elements start a new page.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowPaginator {
    pub measurer: TextLayoutMeasurer,
}

#[async_trait]
impl Paginator for FlowPaginator {
    async fn paginate(
        &self,
        document: &PrintDocument,
        page: PageBox,
        on_page: &mut (dyn FnMut(u32) -> PageFlow + Send),
    ) -> anyhow::Result<u32> {
        if page.height <= 0.0 || page.width <= 0.0 {
            anyhow::bail!("invalid page box: {} x {}", page.width, page.height);
        }
        let blocks = self.measurer.blocks(&document.html, page.width);
        let mut pages = 0u32;
        let mut used = 0.0f64;

        for block in blocks {
            if block.break_before && used > 0.0 {
                pages += 1;
                used = 0.0;
                if on_page(pages) == PageFlow::Stop {
                    return Ok(pages);
                }
                tokio::task::yield_now().await;
            }
            let mut height = block.height;
            while used + height > page.height {
                let room = page.height - used;
                height -= room;
                pages += 1;
                used = 0.0;
                if on_page(pages) == PageFlow::Stop {
                    return Ok(pages);
                }
                tokio::task::yield_now().await;
            }
            used += height;
        }
        if used > 0.0 || pages == 0 {
            pages += 1;
            on_page(pages);
        }
        Ok(pages)
    }
}
