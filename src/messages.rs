//! Messages exchanged between contexts.
//!
//! A request is an `{"action": ..., "data": ...}` envelope. Every action belongs to exactly one
//! receiving context, recorded in [`ACTIONS`].

use crate::download::DownloadId;
use crate::model::{DownloadItem, ImageDescriptor, ImageGroup};
use crate::store::StoredSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error literal returned for actions outside [`ACTIONS`].
pub const UNRECOGNIZED_ACTION: &str = "unrecognized action";

/// Closed set of actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Download one image.
    DownloadImage,
    /// Download several images as a sequential batch.
    DownloadMultipleImages,
    /// Read the stored snapshot.
    GetStoredImages,
    /// Open the gallery; no response.
    OpenViewer,
    /// Count images on the page.
    GetImageCount,
    /// Scan and group images on the page.
    GetAllImages,
}

/// Context that answers an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Background worker.
    Background,
    /// Page (content) context of the active tab.
    Page,
}

/// Lookup table: wire name, action, recipient.
pub const ACTIONS: [(&str, Action, Recipient); 6] = [
    ("downloadImage", Action::DownloadImage, Recipient::Background),
    (
        "downloadMultipleImages",
        Action::DownloadMultipleImages,
        Recipient::Background,
    ),
    ("getStoredImages", Action::GetStoredImages, Recipient::Background),
    ("openViewer", Action::OpenViewer, Recipient::Background),
    ("getImageCount", Action::GetImageCount, Recipient::Page),
    ("getAllImages", Action::GetAllImages, Recipient::Page),
];

impl Action {
    /// Resolves a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        ACTIONS
            .iter()
            .find(|(wire, _, _)| *wire == name)
            .map(|(_, action, _)| *action)
    }

    /// Wire name.
    pub fn name(self) -> &'static str {
        self.entry().0
    }

    /// Context that answers this action.
    pub fn recipient(self) -> Recipient {
        self.entry().2
    }

    fn entry(self) -> (&'static str, Action, Recipient) {
        ACTIONS
            .iter()
            .copied()
            .find(|(_, action, _)| *action == self)
            .unwrap_or_else(|| unreachable!("every action has a table entry"))
    }

    /// Whether the sender expects an answer.
    pub fn expects_response(self) -> bool {
        !matches!(self, Self::OpenViewer)
    }
}

/// Payload of `downloadImage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadImageData {
    /// Source URL.
    pub url: String,
    /// Target filename; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Extension used by the generated filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A request, tagged by action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum Request {
    /// See [`Action::DownloadImage`].
    DownloadImage(DownloadImageData),
    /// See [`Action::DownloadMultipleImages`].
    DownloadMultipleImages(Vec<DownloadItem>),
    /// See [`Action::GetStoredImages`].
    GetStoredImages,
    /// See [`Action::OpenViewer`].
    OpenViewer,
    /// See [`Action::GetImageCount`].
    GetImageCount,
    /// See [`Action::GetAllImages`].
    GetAllImages,
}

impl Request {
    /// The action this request carries.
    pub fn action(&self) -> Action {
        match self {
            Self::DownloadImage(_) => Action::DownloadImage,
            Self::DownloadMultipleImages(_) => Action::DownloadMultipleImages,
            Self::GetStoredImages => Action::GetStoredImages,
            Self::OpenViewer => Action::OpenViewer,
            Self::GetImageCount => Action::GetImageCount,
            Self::GetAllImages => Action::GetAllImages,
        }
    }
}

/// A response. Serialized with the `success` flag the senders check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `downloadImage` succeeded.
    Downloaded {
        /// Id of the download.
        download_id: DownloadId,
    },
    /// `downloadMultipleImages` completed.
    BatchDownloaded {
        /// Ids of the accepted items.
        download_ids: Vec<DownloadId>,
        /// Items in the request.
        total_requested: usize,
    },
    /// `getStoredImages` succeeded.
    StoredImages(StoredSnapshot),
    /// `getImageCount` answer.
    ImageCount {
        /// Images found.
        count: usize,
    },
    /// `getAllImages` answer.
    AllImages {
        /// Descriptors in document order.
        images: Vec<ImageDescriptor>,
        /// Groups by descending population.
        groups: Vec<ImageGroup>,
    },
    /// Fire-and-forget actions answer with nothing.
    Empty,
    /// Any failure.
    Failure {
        /// Human-readable reason.
        error: String,
    },
}

impl Response {
    /// Failure with the given reason.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// The response to an action nobody handles.
    pub fn unrecognized() -> Self {
        Self::failure(UNRECOGNIZED_ACTION)
    }

    /// Whether this is not a failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// JSON body as the senders read it.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Downloaded { download_id } => {
                json!({ "success": true, "downloadId": download_id })
            }
            Self::BatchDownloaded {
                download_ids,
                total_requested,
            } => json!({
                "success": true,
                "downloadIds": download_ids,
                "totalDownloaded": download_ids.len(),
                "totalRequested": total_requested,
            }),
            Self::StoredImages(data) => json!({ "success": true, "data": data }),
            Self::ImageCount { count } => json!({ "success": true, "count": count }),
            Self::AllImages { images, groups } => {
                json!({ "success": true, "images": images, "groups": groups })
            }
            Self::Empty => Value::Null,
            Self::Failure { error } => json!({ "success": false, "error": error }),
        }
    }
}
