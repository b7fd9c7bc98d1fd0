//! Records shared between the page, background and viewer contexts.

use crate::grouping::group;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image format guessed from the trailing extension of a source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    /// `.jpg` or `.jpeg`.
    Jpeg,
    /// `.png`.
    Png,
    /// `.gif`.
    Gif,
    /// `.webp`.
    Webp,
    /// `.svg`.
    Svg,
    /// `.bmp`.
    Bmp,
    /// Anything else, including extensionless sources.
    Unknown,
}

impl ImageFormat {
    /// Maps a bare file extension (without the dot) to a format, ignoring case.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "webp" => Self::Webp,
            "svg" => Self::Svg,
            "bmp" => Self::Bmp,
            _ => Self::Unknown,
        }
    }

    /// Upper-case label, as shown in the gallery.
    pub fn label(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Gif => "GIF",
            Self::Webp => "WEBP",
            Self::Svg => "SVG",
            Self::Bmp => "BMP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Lower-cased label used as a file extension when the original format is kept.
    pub fn extension(self) -> String {
        self.label().to_ascii_lowercase()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One detected image. Ids are positional within a single scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// `img_{n}` where `n` is the element's position in the document.
    pub id: String,
    /// Absolute `http(s)` URL or inline `data:` URL.
    #[serde(rename = "src")]
    pub source_url: String,
    /// Alternative text, empty when the element has none.
    #[serde(rename = "alt")]
    pub alt_text: String,
    /// Width in pixels, always greater than one.
    pub width: u32,
    /// Height in pixels, always greater than one.
    pub height: u32,
    /// Best-effort format classification.
    #[serde(rename = "type")]
    pub format: ImageFormat,
}

impl ImageDescriptor {
    /// The `WxH` key of the group this descriptor belongs to.
    pub fn dimension_key(&self) -> String {
        dimension_key(self.width, self.height)
    }

    /// Projects the descriptor into the payload of a bulk download request.
    pub fn to_download_item(&self) -> DownloadItem {
        DownloadItem {
            url: self.source_url.clone(),
            width: self.width,
            height: self.height,
            format: Some(self.format.extension()),
        }
    }
}

/// Formats a `WxH` grouping key.
pub fn dimension_key(width: u32, height: u32) -> String {
    format!("{width}x{height}")
}

/// Descriptors that share identical dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGroup {
    /// `WxH` key.
    #[serde(rename = "dimension")]
    pub dimension_key: String,
    /// Width of the first member seen.
    pub width: u32,
    /// Height of the first member seen.
    pub height: u32,
    /// Members in document order.
    #[serde(rename = "images")]
    pub members: Vec<ImageDescriptor>,
}

impl ImageGroup {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the group has no members. Groups produced by [`group`] never are.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One entry of a bulk download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    /// Where to fetch the image from.
    pub url: String,
    /// Width used in the generated filename.
    pub width: u32,
    /// Height used in the generated filename.
    pub height: u32,
    /// Extension to use; `jpg` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Ordered items downloaded sequentially under one batch folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadBatchRequest {
    /// Items in dispatch order.
    pub items: Vec<DownloadItem>,
    /// Milliseconds since the epoch, shared by every filename in the batch.
    pub batch_timestamp: i64,
}

/// Everything a scan of one page produced.
///
/// Serialize-only: the groups are always derived from the images by [`PageSnapshot::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    images: Vec<ImageDescriptor>,
    groups: Vec<ImageGroup>,
    page_url: String,
    page_title: String,
}

impl PageSnapshot {
    /// Builds a snapshot, computing the groups from `images`.
    pub fn new(images: Vec<ImageDescriptor>, page_url: String, page_title: String) -> Self {
        let groups = group(&images);
        Self {
            images,
            groups,
            page_url,
            page_title,
        }
    }

    /// A snapshot without images.
    pub fn empty(page_url: String, page_title: String) -> Self {
        Self::new(Vec::new(), page_url, page_title)
    }

    /// Detected images in document order.
    pub fn images(&self) -> &[ImageDescriptor] {
        &self.images
    }

    /// Groups sorted by descending population.
    pub fn groups(&self) -> &[ImageGroup] {
        &self.groups
    }

    /// URL of the scanned page.
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// Title of the scanned page.
    pub fn page_title(&self) -> &str {
        &self.page_title
    }

    /// Looks up a descriptor by id.
    pub fn image(&self, id: &str) -> Option<&ImageDescriptor> {
        self.images.iter().find(|image| image.id == id)
    }

    /// Looks up a group by its `WxH` key.
    pub fn group(&self, dimension_key: &str) -> Option<&ImageGroup> {
        self.groups
            .iter()
            .find(|group| group.dimension_key == dimension_key)
    }
}
