//! Filename policies for single, bulk and archived downloads.

use crate::model::ImageDescriptor;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Extension used by bulk downloads when an item carries no format.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Output format picked in the gallery. Only the extension changes; bytes are never re-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestedFormat {
    /// Keep the detected format.
    #[default]
    Original,
    /// Use this literal as the extension.
    Literal(String),
}

impl RequestedFormat {
    /// Extension for `descriptor` under this choice.
    pub fn extension_for(&self, descriptor: &ImageDescriptor) -> String {
        match self {
            Self::Original => descriptor.format.extension(),
            Self::Literal(extension) => extension.clone(),
        }
    }
}

/// A requested extension that is not plain ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFormat(pub String);

impl fmt::Display for InvalidFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid format {:?}: expected `original` or an alphanumeric extension",
            self.0
        )
    }
}

impl Error for InvalidFormat {}

impl FromStr for RequestedFormat {
    type Err = InvalidFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("original") {
            Ok(Self::Original)
        } else if value.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self::Literal(value.to_string()))
        } else {
            Err(InvalidFormat(value.to_string()))
        }
    }
}

impl fmt::Display for RequestedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::Literal(extension) => f.write_str(extension),
        }
    }
}

/// `image_{W}x{H}_{millis}.{ext}`, used by single downloads and archive entries.
pub fn interactive_filename(
    descriptor: &ImageDescriptor,
    format: &RequestedFormat,
    unix_millis: i64,
) -> String {
    format!(
        "image_{}x{}_{unix_millis}.{}",
        descriptor.width,
        descriptor.height,
        format.extension_for(descriptor)
    )
}

/// `images_batch_{millis}/image_{n}_{W}x{H}.{ext}` with a 1-based `position`.
pub fn bulk_filename(
    batch_timestamp: i64,
    position: usize,
    width: u32,
    height: u32,
    format: Option<&str>,
) -> String {
    let extension = format.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_EXTENSION);
    format!("images_batch_{batch_timestamp}/image_{position}_{width}x{height}.{extension}")
}

/// `images_{YYYY-MM-DDTHH-MM-SS}.zip`.
pub fn archive_filename(now: DateTime<Utc>) -> String {
    format!("images_{}.zip", now.format("%Y-%m-%dT%H-%M-%S"))
}

/// Default name for a single download request that carries no filename.
pub fn fallback_filename(unix_millis: i64, format: Option<&str>) -> String {
    let extension = format.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_EXTENSION);
    format!("image_{unix_millis}.{extension}")
}

/// Replaces characters that are unsafe in filenames, and whitespace runs, with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

/// Makes `name` unique among `taken` by appending `_{n}` before the extension.
pub fn dedupe_filename(name: &str, taken: &std::collections::HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| numbered_filename(name, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// `name` with `_{n}` inserted before the extension.
pub fn numbered_filename(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}_{n}.{extension}"),
        _ => format!("{name}_{n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageFormat;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor {
            id: "img_0".into(),
            source_url: "https://cdn.test/a.png".into(),
            alt_text: String::new(),
            width: 100,
            height: 50,
            format: ImageFormat::Png,
        }
    }

    #[test]
    fn original_keeps_detected_extension() {
        let format: RequestedFormat = "original".parse().unwrap();
        assert_eq!(
            interactive_filename(&descriptor(), &format, 1700000000000),
            "image_100x50_1700000000000.png"
        );
    }

    #[test]
    fn literal_format_overrides_detected_extension() {
        let format: RequestedFormat = "webp".parse().unwrap();
        assert_eq!(
            interactive_filename(&descriptor(), &format, 7),
            "image_100x50_7.webp"
        );
    }

    #[test]
    fn format_literals_must_be_plain_extensions() {
        assert_eq!(
            "  PNG ".parse::<RequestedFormat>(),
            Ok(RequestedFormat::Literal("PNG".into()))
        );
        assert_eq!("".parse::<RequestedFormat>(), Ok(RequestedFormat::Original));
        for bad in ["a/b", "..", ".png", "x y", "jp\\g"] {
            assert_eq!(
                bad.parse::<RequestedFormat>(),
                Err(InvalidFormat(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn bulk_names_default_to_jpg() {
        assert_eq!(
            bulk_filename(42, 1, 640, 480, None),
            "images_batch_42/image_1_640x480.jpg"
        );
        assert_eq!(
            bulk_filename(42, 3, 8, 8, Some("gif")),
            "images_batch_42/image_3_8x8.gif"
        );
    }

    #[test]
    fn archive_name_uses_hyphenated_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(archive_filename(now), "images_2024-03-09T14-05-07.zip");
    }

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_filename("my cat: \"best\"?.png"), "my_cat___best__.png");
        assert_eq!(sanitize_filename("a\t \nb.jpg"), "a_b.jpg");
    }

    #[test]
    fn dedupes_before_extension() {
        let mut taken = HashSet::new();
        taken.insert("image_1x1_5.png".to_string());
        taken.insert("image_1x1_5_2.png".to_string());
        assert_eq!(dedupe_filename("image_1x1_5.png", &taken), "image_1x1_5_3.png");
        assert_eq!(dedupe_filename("fresh.png", &taken), "fresh.png");
        assert_eq!(numbered_filename("README", 2), "README_2");
        assert_eq!(numbered_filename(".hidden", 4), ".hidden_4");
    }
}
