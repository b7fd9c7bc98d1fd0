//! Background context: downloads, stored snapshot access and viewer launches.

use crate::batch::download_batch;
use crate::download::{DownloadRequest, Downloader};
use crate::filenames::{fallback_filename, sanitize_filename};
use crate::messages::{DownloadImageData, Request, Response};
use crate::model::{DownloadBatchRequest, DownloadItem};
use crate::store::SnapshotStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Signal asking the host to show the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerLaunch {
    /// Milliseconds since the epoch when the launch was requested.
    pub requested_at: i64,
}

/// Handles the actions routed to the background.
pub struct BackgroundContext {
    downloader: Arc<dyn Downloader>,
    store: Arc<SnapshotStore>,
    item_delay: Duration,
    viewer: UnboundedSender<ViewerLaunch>,
}

impl BackgroundContext {
    /// Wires the context to its download subsystem, the shared store and the viewer channel.
    pub fn new(
        downloader: Arc<dyn Downloader>,
        store: Arc<SnapshotStore>,
        item_delay: Duration,
        viewer: UnboundedSender<ViewerLaunch>,
    ) -> Self {
        Self {
            downloader,
            store,
            item_delay,
            viewer,
        }
    }

    /// Answers one request.
    pub async fn handle(&self, request: Request) -> Response {
        debug!(action = request.action().name(), "background request");
        match request {
            Request::DownloadImage(data) => self.download_image(data).await,
            Request::DownloadMultipleImages(items) => self.download_multiple(items).await,
            Request::GetStoredImages => self.stored_images(),
            Request::OpenViewer => {
                self.open_viewer();
                Response::Empty
            }
            Request::GetImageCount | Request::GetAllImages => Response::unrecognized(),
        }
    }

    async fn download_image(&self, data: DownloadImageData) -> Response {
        let filename = match data.filename.as_deref() {
            Some(name) if !name.trim().is_empty() => sanitize_path(name),
            _ => fallback_filename(Utc::now().timestamp_millis(), data.format.as_deref()),
        };
        match self
            .downloader
            .download(DownloadRequest::url(data.url, filename))
            .await
        {
            Ok(download_id) => Response::Downloaded { download_id },
            Err(err) => {
                error!(error = %err, "download failed");
                Response::failure(err.to_string())
            }
        }
    }

    async fn download_multiple(&self, items: Vec<DownloadItem>) -> Response {
        let request = DownloadBatchRequest {
            items,
            batch_timestamp: Utc::now().timestamp_millis(),
        };
        let report = download_batch(self.downloader.as_ref(), &request, self.item_delay).await;
        Response::BatchDownloaded {
            download_ids: report.download_ids,
            total_requested: report.requested,
        }
    }

    fn stored_images(&self) -> Response {
        match self.store.read_snapshot() {
            Ok(data) => Response::StoredImages(data),
            Err(err) => {
                error!(error = %err, "failed to read stored images");
                Response::failure(err.to_string())
            }
        }
    }

    fn open_viewer(&self) {
        let launch = ViewerLaunch {
            requested_at: Utc::now().timestamp_millis(),
        };
        match self.viewer.send(launch) {
            Ok(()) => info!("viewer launch requested"),
            Err(_) => warn!("viewer host is gone, launch dropped"),
        }
    }
}

/// Sanitizes each segment of a caller-supplied relative path, keeping folder separators.
fn sanitize_path(name: &str) -> String {
    name.split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize_filename)
        .collect::<Vec<_>>()
        .join("/")
}
