use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::RenderError;
use crate::fetch::ResourceArchive;
use crate::formats::{CatalogEntry, HtmlSections, MetadataType, SectionCss};
use crate::markdown::{encode_html, markdown_to_html_fragment};
use crate::render::{RenderContext, Rendered, finish_sections};

pub const STORY_COUNT: u32 = 50;

static FRAME_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)\.jpg").expect("frame number regex"));
static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("img selector"));

pub const WEB_CSS: &str = r#"
.article img {
  display: block;
  margin: 0 auto;
  width: 100%;
  max-width: 640px;
}

a.header-link {
  font-weight: inherit !important;
  font-size: inherit !important;
  color: #000000;
  text-decoration: none;
}

a.header-link:hover::after {
  content: '#';
  padding-left: 5px;
  color: blue;
  display: inline-block;
}
"#;

pub const PRINT_CSS: &str = r#"
.obs-story-title {
  text-align: center;
}

#pagedjs-print .obs-story-title {
  break-after: page !important;
  padding-top: 300px;
}

.article {
  break-before: auto !important;
  break-after: auto !important;
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsFrame {
    pub number: u32,
    pub image_url: String,
    /// HTML paragraphs following the frame's image.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsStory {
    pub number: u32,
    pub title: String,
    pub frames: Vec<ObsFrame>,
    pub bible_ref: String,
}

impl ObsStory {
    fn untitled(number: u32) -> Self {
        Self {
            number,
            title: format!("{number}. [NO TITLE]"),
            frames: Vec::new(),
            bible_ref: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsData {
    pub title: String,
    pub front: String,
    pub back: String,
    pub stories: Vec<ObsStory>,
}

pub fn cdn_image_url(resolution: &str, story: u32, frame: u32) -> String {
    format!("https://cdn.door43.org/obs/jpg/{resolution}/obs-en-{story:02}-{frame:02}.jpg")
}

/// Image URL for a frame: a `data:` URL when the images archive has the picture,
/// the CDN otherwise, nothing at resolution `none`.
pub fn image_url(
    story: u32,
    frame: u32,
    resolution: &str,
    images: Option<&ResourceArchive>,
) -> String {
    if resolution == "none" {
        return String::new();
    }
    let short = format!("-{story}-{frame}.jpg");
    let padded = format!("-{story:02}-{frame:02}.jpg");
    let found = images.and_then(|archive| {
        archive
            .paths()
            .find(|path| path.ends_with(&short) || path.ends_with(&padded))
            .and_then(|path| archive.bytes(path))
    });
    match found {
        Some(bytes) => format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ),
        None => cdn_image_url(resolution, story, frame),
    }
}

/// Reads the 50 stories plus front and back matter from an RC or tS archive.
pub fn load_obs_data(entry: &CatalogEntry, archive: &ResourceArchive) -> anyhow::Result<ObsData> {
    let Some(ingredient) = entry.ingredient("obs") else {
        return Err(RenderError::NoIngredients {
            resource: entry.full_name(),
        }
        .into());
    };
    let root = ingredient
        .path
        .trim_start_matches("./")
        .trim_start_matches('/')
        .trim_end_matches('/');
    let join = |path: &str| {
        if root.is_empty() || root == "." {
            path.to_owned()
        } else {
            format!("{root}/{path}")
        }
    };
    let first_markdown = |paths: [&str; 2]| {
        paths
            .iter()
            .find_map(|path| archive.read_to_string(&join(path)))
            .map(|md| markdown_to_html_fragment(&md))
            .unwrap_or_default()
    };

    let mut data = ObsData {
        title: entry.title.clone(),
        front: String::new(),
        back: String::new(),
        stories: Vec::with_capacity(STORY_COUNT as usize),
    };

    if entry.metadata_type == MetadataType::Ts {
        if let Some(title) = archive.read_to_string(&join("front/title.txt")) {
            data.title = title.trim().to_owned();
        }
        for number in 1..=STORY_COUNT {
            data.stories.push(load_ts_story(archive, &join(&format!("{number:02}")), number));
        }
    } else {
        data.front = first_markdown(["front.md", "front/intro.md"]);
        data.back = first_markdown(["back.md", "back/intro.md"]);
        for number in 1..=STORY_COUNT {
            let story = match archive.read_to_string(&join(&format!("{number:02}.md"))) {
                Some(md) => parse_rc_story(&md, number),
                None => ObsStory {
                    title: format!("{number}. [STORY NOT FOUND]"),
                    ..ObsStory::untitled(number)
                },
            };
            data.stories.push(story);
        }
    }
    let found = data
        .stories
        .iter()
        .filter(|story| !story.frames.is_empty())
        .count();
    tracing::debug!(resource = %entry.full_name(), found, "loaded obs stories");
    Ok(data)
}

fn load_ts_story(archive: &ResourceArchive, story_path: &str, number: u32) -> ObsStory {
    let prefix = format!("{story_path}/");
    if archive.paths_under(&prefix).next().is_none() {
        return ObsStory {
            title: format!("{number}. [STORY NOT FOUND]"),
            ..ObsStory::untitled(number)
        };
    }
    let mut story = ObsStory::untitled(number);
    if let Some(title) = archive.read_to_string(&format!("{prefix}title.txt")) {
        story.title = title.trim().to_owned();
    }
    if let Some(reference) = archive.read_to_string(&format!("{prefix}reference.txt")) {
        story.bible_ref = reference.trim().to_owned();
    }
    let mut frame = 1;
    while let Some(text) = archive.read_to_string(&format!("{prefix}{frame:02}.txt")) {
        story.frames.push(ObsFrame {
            number: frame,
            image_url: cdn_image_url("360px", number, frame),
            content: format!("<p>{}</p>", encode_html(text.trim())),
        });
        frame += 1;
    }
    story
}

/// An RC story is a heading, then image paragraphs each followed by that frame's
/// text, then an italic Bible reference as the last paragraph.
pub fn parse_rc_story(markdown: &str, number: u32) -> ObsStory {
    let html = markdown_to_html_fragment(markdown);
    let fragment = Html::parse_fragment(&html);
    let elements: Vec<ElementRef<'_>> = fragment
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .collect();

    let mut story = ObsStory::untitled(number);
    let mut frame: Option<ObsFrame> = None;
    for (index, element) in elements.iter().enumerate() {
        let name = element.value().name();
        if matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
            story.title = element.text().collect::<String>().trim().to_owned();
            continue;
        }
        if name != "p" {
            continue;
        }
        if let Some(img) = element.select(&IMG_SELECTOR).next() {
            let src = img.value().attr("src").unwrap_or_default();
            if let Some(caps) = FRAME_NUMBER_RE.captures(src)
                && let Ok(frame_number) = caps[1].parse::<u32>()
            {
                story.frames.extend(frame.take());
                frame = Some(ObsFrame {
                    number: frame_number,
                    image_url: cdn_image_url("360px", number, frame_number),
                    content: String::new(),
                });
            }
        } else if index + 1 == elements.len() && is_only_emphasis(element) {
            story.frames.extend(frame.take());
            story.bible_ref = element.text().collect::<String>().trim().to_owned();
        } else if let Some(frame) = frame.as_mut() {
            frame.content.push_str(&element.html());
        }
    }
    story.frames.extend(frame);
    story
}

fn is_only_emphasis(element: &ElementRef<'_>) -> bool {
    let children: Vec<_> = element
        .children()
        .filter(|node| !matches!(node.value(), Node::Text(text) if text.trim().is_empty()))
        .collect();
    matches!(children.as_slice(), [only] if ElementRef::wrap(*only).is_some_and(|e| e.value().name() == "em"))
}

/// Stories as sections, frames as articles. `stories` limits output to the given story numbers.
pub fn obs_to_html(
    data: &ObsData,
    images: Option<&ResourceArchive>,
    resolution: &str,
    stories: Option<&[u32]>,
) -> String {
    let mut html = format!(
        r#"
<div class="section" id="obs" data-toc-title="{}">
"#,
        encode_html(&data.title)
    );
    if !data.front.is_empty() {
        html.push_str(&format!(
            r#"
<div class="section obs-front-matter" id="nav-obs-front" data-toc-title="Front Matter">
  {}
</div>
"#,
            data.front
        ));
    }

    for story in &data.stories {
        if stories.is_some_and(|wanted| !wanted.contains(&story.number)) {
            continue;
        }
        let number = story.number;
        html.push_str(&format!(
            r##"
<div class="section story" id="nav-obs-{number}" data-toc-title="{}">
  <h1 class="obs-story-title title"><a href="#nav-obs-{number}" class="header-link">{}</a></h1>
"##,
            encode_html(&story.title),
            story.title
        ));

        let placeholder = [ObsFrame {
            number: 0,
            image_url: String::new(),
            content: "<p>[NO FRAMES FOUND]</p>".to_owned(),
        }];
        let frames = if story.frames.is_empty() {
            &placeholder[..]
        } else {
            &story.frames[..]
        };
        for frame in frames {
            let image = if frame.number == 0 {
                String::new()
            } else if images.is_some() || resolution != "360px" {
                image_url(number, frame.number, resolution, images)
            } else {
                frame.image_url.clone()
            };
            html.push_str(&format!(
                "\n  <div class=\"article frame\" id=\"nav-obs-{number}-{}\">\n",
                frame.number
            ));
            if !image.is_empty() && resolution != "none" {
                html.push_str(&format!(
                    "    <img src=\"{image}\" alt=\"OBS Image {number}-{}\">\n",
                    frame.number
                ));
            }
            html.push_str(&format!("    {}\n  </div>\n", frame.content));
        }

        if !story.bible_ref.is_empty() {
            html.push_str(&format!("\n  <p><em>{}</em></p>\n", story.bible_ref));
        }
        html.push_str("</div>\n");
    }

    if !data.back.is_empty() {
        html.push_str(&format!(
            r#"
<div class="section obs-back-matter" id="nav-obs-back" data-toc-title="Back Matter">
  {}
</div>
"#,
            data.back
        ));
    }
    html.push_str("</div>\n");
    html
}

pub async fn render(ctx: &RenderContext, entry: &CatalogEntry) -> anyhow::Result<Rendered> {
    let resolution = ctx.config.obs_image_resolution.as_str();
    let (archive, images) = tokio::try_join!(ctx.fetcher.fetch_zip(entry), async {
        if resolution == "none" {
            Ok(None)
        } else {
            ctx.fetcher.fetch_image_archive(resolution).await
        }
    })?;
    let data = load_obs_data(entry, &archive)?;
    let body = obs_to_html(&data, images.as_deref(), resolution, None);
    tracing::info!(
        resource = %entry.full_name(),
        stories = data.stories.len(),
        embedded_images = images.is_some(),
        "rendered open bible stories"
    );

    let sections = HtmlSections {
        cover: format!(r#"<h3 class="cover-book-title">{}</h3>"#, encode_html(&data.title)),
        body,
        css: SectionCss {
            web: WEB_CSS.to_owned(),
            print: PRINT_CSS.to_owned(),
        },
        ..HtmlSections::default()
    };
    finish_sections(ctx, entry, sections, vec![entry.clone()]).await
}
