use scraper::{ElementRef, Html};

use crate::formats::{CatalogEntry, HtmlSections, PrintOptions};
use crate::html::{generate_cover, generate_toc};

const PX_PER_INCH: f64 = 96.0;
/// `@page { margin: 1cm }` top plus bottom.
const PAGE_MARGIN_VERTICAL: &str = "2cm";
/// `:left`/`:right` pages use 20mm and 30mm side margins.
const PAGE_MARGIN_HORIZONTAL: &str = "50mm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub key: &'static str,
    pub label: &'static str,
    pub orientation: Orientation,
    pub width: &'static str,
    pub height: &'static str,
}

pub const PAGE_SIZES: [PageSize; 7] = [
    PageSize {
        key: "a4",
        label: "A4",
        orientation: Orientation::Portrait,
        width: "210mm",
        height: "297mm",
    },
    PageSize {
        key: "a5",
        label: "A5",
        orientation: Orientation::Portrait,
        width: "148.5mm",
        height: "210mm",
    },
    PageSize {
        key: "letter",
        label: "US Letter",
        orientation: Orientation::Portrait,
        width: "8.5in",
        height: "11in",
    },
    PageSize {
        key: "trade",
        label: "Trade",
        orientation: Orientation::Portrait,
        width: "6in",
        height: "9in",
    },
    PageSize {
        key: "crown-quarto",
        label: "Crown Quarto",
        orientation: Orientation::Portrait,
        width: "189mm",
        height: "246mm",
    },
    PageSize {
        key: "a4-landscape",
        label: "A4",
        orientation: Orientation::Landscape,
        width: "297mm",
        height: "210mm",
    },
    PageSize {
        key: "letter-landscape",
        label: "US Letter",
        orientation: Orientation::Landscape,
        width: "11in",
        height: "8.5in",
    },
];

pub fn page_size(key: &str) -> anyhow::Result<&'static PageSize> {
    let key = key.trim().to_lowercase();
    PAGE_SIZES.iter().find(|size| size.key == key).ok_or_else(|| {
        let known: Vec<&str> = PAGE_SIZES.iter().map(|size| size.key).collect();
        anyhow::anyhow!("unknown page size {key:?} (expected one of: {})", known.join(", "))
    })
}

impl PageSize {
    pub fn print_options(&self) -> PrintOptions {
        PrintOptions {
            page_width: self.width.to_owned(),
            page_height: self.height.to_owned(),
            ..PrintOptions::default()
        }
    }
}

/// CSS absolute length (`mm`, `cm`, `in`, `pt`, `px`) in CSS pixels.
pub fn css_length_to_px(length: &str) -> anyhow::Result<f64> {
    let length = length.trim();
    let split = length
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(length.len());
    let (number, unit) = length.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid css length: {length:?}"))?;
    let factor = match unit {
        "mm" => PX_PER_INCH / 25.4,
        "cm" => PX_PER_INCH / 2.54,
        "in" => PX_PER_INCH,
        "pt" => PX_PER_INCH / 72.0,
        "px" | "" => 1.0,
        other => anyhow::bail!("unsupported css unit {other:?} in {length:?}"),
    };
    Ok(value * factor)
}

/// Width and height available to content on one page, in CSS pixels.
pub fn content_box_px(options: &PrintOptions) -> anyhow::Result<(f64, f64)> {
    let width = css_length_to_px(&options.page_width)? - css_length_to_px(PAGE_MARGIN_HORIZONTAL)?;
    let height = css_length_to_px(&options.page_height)? - css_length_to_px(PAGE_MARGIN_VERTICAL)?;
    if width <= 0.0 || height <= 0.0 {
        anyhow::bail!(
            "page {} x {} leaves no room inside the margins",
            options.page_width,
            options.page_height
        );
    }
    Ok((width, height))
}

/// Input for the paginator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintDocument {
    pub html: String,
    pub css: String,
}

pub fn page_css(options: &PrintOptions, web_css: &str, print_css: &str) -> String {
    let columns = options.columns.max(1);
    format!(
        r#"
@page {{
  size: {width} {height};
  margin: 1cm;

  @footnote {{
    float: bottom;
    border-top: black 1px solid;
    padding-top: 2mm;
    font-size: 8pt;
  }}

  @bottom-center {{
    content: counter(page);
  }}
}}

@page :first {{
  @bottom-center {{
    content: none;
  }}
}}

@page :blank {{
  @bottom-center {{content: none}}
  @top-center {{content: none}}
  @top-left {{ content: none}}
  @top-right {{content: none}}
}}

@page :cover-page {{
  @bottom-center {{content: none}}
  @top-center {{content: none}}
  @top-left {{ content: none}}
  @top-right {{content: none}}
}}

@page :left {{
  margin-right: 30mm;
  margin-left: 20mm;

  @top-left {{
    font-size: 10px;
    content: element(titleRunning);
    text-align: left;
  }}
}}

@page :right {{
  margin-left: 30mm;
  margin-right: 20mm;

  @top-right {{
    font-size: 10px;
    content: element(titleRunning);
    text-align: right;
  }}
}}

.bible-book {{
  columns: {columns};
}}

.header-title {{
  position: running(titleRunning);
}}

@media print {{
  h1 {{
    break-before: avoid-page;
  }}

  section,
  article {{
    break-after: page;
  }}

  section.toc-page,
  section.copyright-page {{
    break-before: page;
  }}
}}

.cover-page,
.title-page {{
  page: cover-page;
  padding-top: 100px;
}}

#toc-contents ul {{
  list-style: none;
  padding: 0;
  padding-inline-start: 0;
}}

#toc-contents ul ul {{
  padding-left: 10px;
}}

[data-direction="rtl"] #toc-contents ul ul {{
  padding-left: 0;
  padding-right: 10px;
}}

#toc-contents ul li {{
  width: 100%;
  list-style-type: none;
  padding-bottom: 2px;
  line-height: 1.1em;
}}

#toc-contents ul a {{
  display: inline-block;
  width: 100%;
  border-bottom: 2px dotted #555555;
  text-decoration: none;
  color: #000 !important;
}}

#toc-contents > ul > li > a {{
  font-weight: bold;
}}

#toc-contents ul a span {{
  background-color: white;
  margin: 0 25px 0 0;
  padding: 0 2px 3px 0;
}}

#toc-contents ul a::after {{
  position: absolute;
  right: 0;
  content: target-counter(attr(href), page);
  background-color: white;
  padding-bottom: 4px;
  padding-left: 2px;
  padding-right: 10px;
}}

[data-direction="rtl"] #toc-contents ul a::after {{
  left: 0 !important;
  right: auto !important;
  padding-right: 2px;
  padding-left: 30px;
}}

h1 {{
  font-size: 1.6em;
}}

{web_css}

{print_css}
"#,
        width = options.page_width,
        height = options.page_height,
    )
}

/// Keeps only top-level body elements whose `id` is listed. An empty list keeps everything.
pub fn filter_sections(body: &str, included_names: &[String]) -> String {
    if included_names.is_empty() {
        return body.to_owned();
    }
    let fragment = Html::parse_fragment(body);
    fragment
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|element| {
            element
                .value()
                .id()
                .is_some_and(|id| included_names.iter().any(|name| name == id))
        })
        .map(|element| element.html())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wraps cover, copyright, toc and body into the paginator's document, with the page CSS.
pub fn compose(entry: &CatalogEntry, sections: &HtmlSections, options: &PrintOptions) -> PrintDocument {
    let body = filter_sections(&sections.body, &options.included_names);
    let direction = if entry.is_rtl() { "rtl" } else { "ltr" };

    let mut html = format!(
        "\n<div id=\"pagedjs-print\" style=\"direction: {direction}\" data-direction=\"{direction}\">\n"
    );
    if !options.hide_cover {
        html.push_str(&format!(
            "  <section class=\"cover-page\">\n    {}\n  </section>\n",
            generate_cover(entry, &sections.cover)
        ));
    }
    if !options.hide_copyright {
        html.push_str(&format!(
            "  <section id=\"copyright-page\" class=\"copyright-page\">\n    {}\n  </section>\n",
            sections.copyright
        ));
    }
    if !options.hide_toc {
        let toc = if sections.toc.is_empty() || !options.included_names.is_empty() {
            generate_toc(&body)
        } else {
            sections.toc.clone()
        };
        html.push_str(&format!("  <section class=\"toc-page\">\n    {toc}\n  </section>\n"));
    }
    html.push_str(&body);
    html.push_str("\n</div>\n");

    PrintDocument {
        html,
        css: page_css(options, &sections.css.web, &sections.css.print),
    }
}
