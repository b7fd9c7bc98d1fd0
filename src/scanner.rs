//! Image discovery over the `<img>` elements of a document.

use crate::model::{ImageDescriptor, ImageFormat};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// Raw attributes of one `<img>` element, as found in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageElement {
    /// `src` attribute.
    pub src: Option<String>,
    /// Deferred-load `data-src` attribute.
    pub data_src: Option<String>,
    /// `alt` attribute.
    pub alt: Option<String>,
    /// `width` attribute, unparsed.
    pub width_attr: Option<String>,
    /// `height` attribute, unparsed.
    pub height_attr: Option<String>,
    /// Decoded dimensions, when the image bytes were probed.
    pub natural: Option<(u32, u32)>,
}

impl ImageElement {
    /// Source reference before resolution: `src`, else `data-src`.
    pub fn raw_source(&self) -> Option<&str> {
        non_empty(self.src.as_deref()).or_else(|| non_empty(self.data_src.as_deref()))
    }

    /// Width and height with natural dimensions taking precedence over attributes.
    pub fn dimensions(&self) -> (u32, u32) {
        let (natural_width, natural_height) = self.natural.unwrap_or((0, 0));
        let width = if natural_width > 0 {
            natural_width
        } else {
            parse_dimension(self.width_attr.as_deref())
        };
        let height = if natural_height > 0 {
            natural_height
        } else {
            parse_dimension(self.height_attr.as_deref())
        };
        (width, height)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Reads the leading integer of a dimension attribute (`"120"`, `"120px"`); 0 when absent.
pub fn parse_dimension(value: Option<&str>) -> u32 {
    let Some(value) = value else {
        return 0;
    };
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Resolves an element's source against the page URL.
///
/// Only `http(s)` and `data:` references survive; `data:` URLs are kept verbatim.
pub fn resolve_source(element: &ImageElement, base: &Url) -> Option<String> {
    let raw = element.raw_source()?;
    if raw.starts_with("data:") {
        return Some(raw.to_string());
    }
    let resolved = base.join(raw).ok()?;
    let resolved = String::from(resolved);
    resolved.starts_with("http").then_some(resolved)
}

/// Classifies a source by the extension of its last path segment.
pub fn image_format(source: &str) -> ImageFormat {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, extension)) => ImageFormat::from_extension(extension),
        None => ImageFormat::Unknown,
    }
}

/// Turns the document's image elements into descriptors.
///
/// Ids follow element positions, so rejected elements leave gaps. Elements without a
/// usable source or with either dimension at or below one pixel are dropped.
pub fn scan(elements: &[ImageElement], base: &Url) -> Vec<ImageDescriptor> {
    elements
        .iter()
        .enumerate()
        .filter_map(|(index, element)| {
            let source_url = resolve_source(element, base)?;
            let (width, height) = element.dimensions();
            if width <= 1 || height <= 1 {
                return None;
            }
            Some(ImageDescriptor {
                id: format!("img_{index}"),
                format: image_format(&source_url),
                source_url,
                alt_text: element.alt.clone().unwrap_or_default(),
                width,
                height,
            })
        })
        .collect()
}

/// Parsed view of a complete HTML document: its title and `<img>` elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Text of the first `<title>`, trimmed.
    pub title: String,
    /// Image elements in document order.
    pub elements: Vec<ImageElement>,
}

/// Parses an in-memory HTML string.
pub fn parse_html(html: &str) -> ParsedDocument {
    let document = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|node| node.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let elements = match Selector::parse("img") {
        Ok(selector) => document
            .select(&selector)
            .map(|img| {
                let attr = |name: &str| img.value().attr(name).map(str::to_string);
                ImageElement {
                    src: attr("src"),
                    data_src: attr("data-src"),
                    alt: attr("alt"),
                    width_attr: attr("width"),
                    height_attr: attr("height"),
                    natural: None,
                }
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    ParsedDocument { title, elements }
}

/// Convenience wrapper: parse then scan.
pub fn scan_html(html: &str, base: &Url) -> Vec<ImageDescriptor> {
    scan(&parse_html(html).elements, base)
}
