//! Key-value store shared by every context, with atomic multi-key writes.

use crate::model::{ImageDescriptor, ImageGroup, PageSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// Key holding the detected descriptors.
pub const DETECTED_IMAGES_KEY: &str = "detectedImages";
/// Key holding the grouped descriptors.
pub const GROUPED_IMAGES_KEY: &str = "groupedImages";
/// Key holding the scanned page URL.
pub const PAGE_URL_KEY: &str = "pageUrl";
/// Key holding the scanned page title.
pub const PAGE_TITLE_KEY: &str = "pageTitle";

/// The four keys of a snapshot, in write order.
pub const SNAPSHOT_KEYS: [&str; 4] = [
    DETECTED_IMAGES_KEY,
    GROUPED_IMAGES_KEY,
    PAGE_URL_KEY,
    PAGE_TITLE_KEY,
];

/// Errors raised by the store.
#[derive(Debug)]
pub enum StoreError {
    /// The lock guarding the entries was poisoned.
    Poisoned,
    /// A value could not be encoded.
    Encode(serde_json::Error),
    /// A stored value does not have the expected shape.
    Decode(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poisoned => write!(f, "store lock poisoned"),
            Self::Encode(err) => write!(f, "failed to encode stored value: {err}"),
            Self::Decode(err) => write!(f, "failed to decode stored value: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Poisoned => None,
            Self::Encode(err) | Self::Decode(err) => Some(err),
        }
    }
}

/// In-memory store. Last writer wins; no key is ever half-written.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl SnapshotStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes every entry under one lock.
    pub fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        guard.extend(entries);
        Ok(())
    }

    /// Reads the requested keys; absent keys are simply missing from the result.
    pub fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let guard = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| guard.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    /// Publishes a snapshot as its four keys in one write.
    pub fn write_snapshot(&self, snapshot: &PageSnapshot) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(DETECTED_IMAGES_KEY.into(), encode(snapshot.images())?);
        entries.insert(GROUPED_IMAGES_KEY.into(), encode(snapshot.groups())?);
        entries.insert(PAGE_URL_KEY.into(), Value::String(snapshot.page_url().into()));
        entries.insert(PAGE_TITLE_KEY.into(), Value::String(snapshot.page_title().into()));
        self.set(entries)
    }

    /// Reads back whatever part of a snapshot is present.
    pub fn read_snapshot(&self) -> Result<StoredSnapshot, StoreError> {
        let entries = self.get(&SNAPSHOT_KEYS)?;
        serde_json::from_value(Value::Object(entries)).map_err(StoreError::Decode)
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(StoreError::Encode)
}

/// The snapshot keys as read from the store; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    /// `detectedImages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_images: Option<Vec<ImageDescriptor>>,
    /// `groupedImages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_images: Option<Vec<ImageGroup>>,
    /// `pageUrl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    /// `pageTitle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

impl StoredSnapshot {
    /// Whether both image keys are present.
    pub fn is_complete(&self) -> bool {
        self.detected_images.is_some() && self.grouped_images.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageFormat;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot() -> PageSnapshot {
        PageSnapshot::new(
            vec![ImageDescriptor {
                id: "img_0".into(),
                source_url: "https://cdn.test/a.gif".into(),
                alt_text: "a".into(),
                width: 3,
                height: 4,
                format: ImageFormat::Gif,
            }],
            "https://page.test/".into(),
            "Page".into(),
        )
    }

    #[test]
    fn empty_store_reads_as_incomplete() {
        let store = SnapshotStore::new();
        let stored = store.read_snapshot().expect("read");
        assert_eq!(stored, StoredSnapshot::default());
        assert!(!stored.is_complete());
    }

    #[test]
    fn snapshot_round_trips_through_the_four_keys() {
        let store = SnapshotStore::new();
        let snapshot = snapshot();
        store.write_snapshot(&snapshot).expect("write");

        let raw = store.get(&SNAPSHOT_KEYS).expect("get");
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[PAGE_TITLE_KEY], json!("Page"));

        let stored = store.read_snapshot().expect("read");
        assert!(stored.is_complete());
        assert_eq!(stored.grouped_images.as_deref(), Some(snapshot.groups()));
    }

    #[test]
    fn later_writes_replace_earlier_ones() {
        let store = SnapshotStore::new();
        store.write_snapshot(&snapshot()).expect("first");
        store
            .write_snapshot(&PageSnapshot::empty("https://next.test/".into(), "Next".into()))
            .expect("second");

        let stored = store.read_snapshot().expect("read");
        assert_eq!(stored.detected_images, Some(Vec::new()));
        assert_eq!(stored.page_url.as_deref(), Some("https://next.test/"));
    }

    #[test]
    fn malformed_values_surface_as_decode_errors() {
        let store = SnapshotStore::new();
        let mut entries = Map::new();
        entries.insert(DETECTED_IMAGES_KEY.into(), json!("not a list"));
        store.set(entries).expect("set");

        assert!(matches!(store.read_snapshot(), Err(StoreError::Decode(_))));
    }
}
