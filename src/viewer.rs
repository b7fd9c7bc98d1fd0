//! Gallery view: loads the snapshot, owns the selection, and issues downloads.

use crate::batch::{download_archive, ArchiveError, ArchiveReport};
use crate::download::{DownloadError, DownloadId, DownloadRequest, Downloader, ImageFetcher};
use crate::filenames::{interactive_filename, RequestedFormat};
use crate::gateway::{Gateway, TransportError};
use crate::messages::{Action, Request, Response};
use crate::model::{DownloadItem, PageSnapshot};
use crate::selection::{GroupSelection, SelectionController};
use crate::store::StoredSnapshot;
use chrono::Utc;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shown instead of a page URL the store did not record.
pub const UNKNOWN_PAGE: &str = "unknown page";
/// Shown instead of a page title the store did not record.
pub const UNKNOWN_TITLE: &str = "unknown title";

/// Where the loaded snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// The shared store held a complete snapshot.
    Store,
    /// The store was incomplete and the page was asked directly.
    Page,
    /// Neither answered; the gallery is empty.
    Unavailable,
}

/// Errors surfaced by gallery actions.
#[derive(Debug)]
pub enum ViewerError {
    /// The store could not be read.
    Storage(String),
    /// No image with this id in the current snapshot.
    UnknownImage(String),
    /// The action needs a non-empty selection.
    NothingSelected,
    /// A single download failed.
    Download(DownloadError),
    /// Building or saving the archive failed.
    Archive(ArchiveError),
    /// A message could not be delivered.
    Transport(TransportError),
    /// A context answered with something other than what the action expects.
    Rejected {
        /// The action that was sent.
        action: Action,
        /// Reason given by the receiver.
        reason: String,
    },
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(reason) => {
                write!(f, "detection failed, reload the page ({reason})")
            }
            Self::UnknownImage(id) => write!(f, "no image with id {id}"),
            Self::NothingSelected => write!(f, "no image selected"),
            Self::Download(err) => write!(f, "download failed: {err}"),
            Self::Archive(err) => write!(f, "{err}"),
            Self::Transport(err) => write!(f, "{err}"),
            Self::Rejected { action, reason } => {
                write!(f, "{} was rejected: {reason}", action.name())
            }
        }
    }
}

impl Error for ViewerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Download(err) => Some(err),
            Self::Archive(err) => Some(err),
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// One group as rendered in the gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupView {
    /// `WxH` key.
    pub dimension_key: String,
    /// Members in the group.
    pub count: usize,
    /// Selection state of the members.
    pub selection: GroupSelection,
    /// Whether the group is folded.
    pub collapsed: bool,
}

/// Outcome of a bulk request as reported by the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Ids of the accepted downloads.
    pub download_ids: Vec<DownloadId>,
    /// Items sent.
    pub requested: usize,
}

/// The gallery for one tab.
pub struct Viewer {
    gateway: Arc<Gateway>,
    downloader: Arc<dyn Downloader>,
    fetcher: Arc<dyn ImageFetcher>,
    controller: SelectionController,
    format: RequestedFormat,
    injection_delay: Duration,
}

impl Viewer {
    /// An empty gallery; call [`Viewer::load`] to fill it.
    pub fn new(
        gateway: Arc<Gateway>,
        downloader: Arc<dyn Downloader>,
        fetcher: Arc<dyn ImageFetcher>,
        injection_delay: Duration,
    ) -> Self {
        let tab = gateway.tab();
        let empty = PageSnapshot::empty(tab.url.clone(), tab.title.clone());
        Self {
            gateway,
            downloader,
            fetcher,
            controller: SelectionController::new(empty),
            format: RequestedFormat::Original,
            injection_delay,
        }
    }

    /// Loads the stored snapshot, falling back to asking the page when the store is incomplete.
    ///
    /// A previous selection is cleared; collapsed groups stay collapsed.
    pub async fn load(&mut self) -> Result<SnapshotOrigin, ViewerError> {
        let stored = match self.gateway.send(Request::GetStoredImages).await {
            Ok(Response::StoredImages(stored)) => stored,
            Ok(Response::Failure { error }) => {
                error!(%error, "stored images unavailable");
                return Err(ViewerError::Storage(error));
            }
            Ok(other) => {
                return Err(ViewerError::Storage(format!("unexpected answer {other:?}")));
            }
            Err(err) => return Err(ViewerError::Transport(err)),
        };

        let (snapshot, origin) = if stored.is_complete() {
            (from_store(stored), SnapshotOrigin::Store)
        } else {
            debug!("store incomplete, asking the page");
            self.load_from_page().await
        };
        info!(
            images = snapshot.images().len(),
            groups = snapshot.groups().len(),
            ?origin,
            "gallery loaded"
        );
        self.controller.replace_snapshot(snapshot);
        Ok(origin)
    }

    async fn load_from_page(&self) -> (PageSnapshot, SnapshotOrigin) {
        let tab = self.gateway.tab();
        let response = self
            .gateway
            .send_with_injection(Request::GetAllImages, self.injection_delay)
            .await;
        match response {
            Ok(Response::AllImages { images, .. }) => (
                PageSnapshot::new(images, tab.url.clone(), tab.title.clone()),
                SnapshotOrigin::Page,
            ),
            Ok(other) => {
                warn!(?other, "page did not return images");
                (unavailable(&tab.url, &tab.title), SnapshotOrigin::Unavailable)
            }
            Err(err) => {
                warn!(error = %err, "page unreachable");
                (unavailable(&tab.url, &tab.title), SnapshotOrigin::Unavailable)
            }
        }
    }

    /// Selection state and current snapshot.
    pub fn controller(&self) -> &SelectionController {
        &self.controller
    }

    /// Mutable access for selection changes.
    pub fn controller_mut(&mut self) -> &mut SelectionController {
        &mut self.controller
    }

    /// Output format used for single and archived downloads.
    pub fn format(&self) -> &RequestedFormat {
        &self.format
    }

    /// Changes the output format.
    pub fn set_format(&mut self, format: RequestedFormat) {
        debug!(%format, "download format updated");
        self.format = format;
    }

    /// Groups in display order with their selection and collapse state.
    pub fn group_views(&self) -> Vec<GroupView> {
        self.controller
            .snapshot()
            .groups()
            .iter()
            .map(|group| GroupView {
                dimension_key: group.dimension_key.clone(),
                count: group.len(),
                selection: self
                    .controller
                    .group_selection(&group.dimension_key)
                    .unwrap_or(GroupSelection::None),
                collapsed: self.controller.is_collapsed(&group.dimension_key),
            })
            .collect()
    }

    /// Plain-text rendering: page header, summary line, then each group with its members.
    ///
    /// Collapsed groups list no members; selected members are starred.
    pub fn listing(&self) -> String {
        let snapshot = self.controller.snapshot();
        let summary = self.controller.summary();
        let title = match snapshot.page_title() {
            "" => UNKNOWN_TITLE,
            title => title,
        };
        let mut lines = vec![
            title.to_string(),
            snapshot.page_url().to_string(),
            format!(
                "{} image(s) detected, {} selected [{}]",
                summary.total,
                summary.selected,
                summary.toggle.label()
            ),
        ];
        for view in self.group_views() {
            let marker = if view.collapsed { "[+]" } else { "[-]" };
            lines.push(format!(
                "{marker} {} ({}) {}",
                view.dimension_key,
                view.count,
                view.selection.label()
            ));
            if view.collapsed {
                continue;
            }
            let Some(group) = snapshot.group(&view.dimension_key) else {
                continue;
            };
            for member in &group.members {
                let star = if self.controller.is_selected(&member.id) { '*' } else { ' ' };
                lines.push(format!(
                    "  {star} {} {} {}",
                    member.id, member.format, member.source_url
                ));
            }
        }
        lines.join("\n")
    }

    /// Downloads one image under its interactive filename.
    pub async fn download_single(&self, id: &str) -> Result<DownloadId, ViewerError> {
        let descriptor = self
            .controller
            .snapshot()
            .image(id)
            .ok_or_else(|| ViewerError::UnknownImage(id.to_string()))?;
        let filename = interactive_filename(
            descriptor,
            &self.format,
            Utc::now().timestamp_millis(),
        );
        self.downloader
            .download(DownloadRequest::url(descriptor.source_url.clone(), filename))
            .await
            .map_err(ViewerError::Download)
    }

    /// Bundles the selection into one ZIP download.
    pub async fn download_selected_archive(&self) -> Result<ArchiveReport, ViewerError> {
        let selected = self.controller.selected_descriptors();
        if selected.is_empty() {
            return Err(ViewerError::NothingSelected);
        }
        download_archive(
            self.fetcher.as_ref(),
            self.downloader.as_ref(),
            &selected,
            &self.format,
            Utc::now(),
        )
        .await
        .map_err(ViewerError::Archive)
    }

    /// Hands the selection to the background as one sequential batch.
    pub async fn download_selected_bulk(&self) -> Result<BulkOutcome, ViewerError> {
        let items: Vec<DownloadItem> = self
            .controller
            .selected_descriptors()
            .into_iter()
            .map(|descriptor| descriptor.to_download_item())
            .collect();
        if items.is_empty() {
            return Err(ViewerError::NothingSelected);
        }
        let action = Action::DownloadMultipleImages;
        match self
            .gateway
            .send(Request::DownloadMultipleImages(items))
            .await
            .map_err(ViewerError::Transport)?
        {
            Response::BatchDownloaded {
                download_ids,
                total_requested,
            } => Ok(BulkOutcome {
                download_ids,
                requested: total_requested,
            }),
            Response::Failure { error } => Err(ViewerError::Rejected {
                action,
                reason: error,
            }),
            other => Err(ViewerError::Rejected {
                action,
                reason: format!("unexpected answer {other:?}"),
            }),
        }
    }
}

fn from_store(stored: StoredSnapshot) -> PageSnapshot {
    PageSnapshot::new(
        stored.detected_images.unwrap_or_default(),
        stored.page_url.unwrap_or_else(|| UNKNOWN_PAGE.to_string()),
        stored.page_title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
    )
}

fn unavailable(url: &str, title: &str) -> PageSnapshot {
    PageSnapshot::empty(url.to_string(), title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundContext;
    use crate::download::{DownloadSource, FetchError};
    use crate::gateway::{PageInjector, TabInfo};
    use crate::page::{PageContext, PageDocument, PageEvent};
    use crate::scanner::parse_html;
    use crate::store::{SnapshotStore, DETECTED_IMAGES_KEY, GROUPED_IMAGES_KEY};
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use url::Url;

    const GALLERY: &str = r#"
        <title>Gallery</title>
        <img id="a" src="/a.png" width="100" height="100">
        <img src="/b.jpg" width="100" height="100">
        <img src="/c.gif" width="40" height="30">
    "#;

    #[derive(Default)]
    struct Recorder {
        next_id: AtomicU64,
        requests: Mutex<Vec<DownloadRequest>>,
    }

    impl Downloader for Recorder {
        fn download(
            &self,
            request: DownloadRequest,
        ) -> BoxFuture<'_, Result<DownloadId, DownloadError>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
            })
        }
    }

    struct EchoFetcher;

    impl ImageFetcher for EchoFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
            Box::pin(async move { Ok(url.as_bytes().to_vec()) })
        }
    }

    struct Harness {
        viewer: Viewer,
        store: Arc<SnapshotStore>,
        recorder: Arc<Recorder>,
        gateway: Arc<Gateway>,
    }

    fn harness() -> Harness {
        let store = Arc::new(SnapshotStore::new());
        let recorder = Arc::new(Recorder::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let background = Arc::new(BackgroundContext::new(
            recorder.clone(),
            Arc::clone(&store),
            Duration::ZERO,
            tx,
        ));
        let page_store = Arc::clone(&store);
        let injector: PageInjector = Box::new(move || {
            let document = PageDocument::from_parsed(
                Url::parse("https://gallery.test/").unwrap(),
                parse_html(GALLERY),
            );
            Arc::new(PageContext::new(
                document,
                Arc::clone(&page_store),
                Duration::ZERO,
            ))
        });
        let tab = TabInfo {
            url: "https://gallery.test/".into(),
            title: "Gallery tab".into(),
        };
        let gateway = Arc::new(Gateway::new(background, tab, injector));
        let viewer = Viewer::new(
            Arc::clone(&gateway),
            recorder.clone(),
            Arc::new(EchoFetcher),
            Duration::ZERO,
        );
        Harness {
            viewer,
            store,
            recorder,
            gateway,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn falls_back_to_the_page_when_store_is_empty() {
        let mut h = harness();

        let origin = h.viewer.load().await.expect("loaded");

        assert_eq!(origin, SnapshotOrigin::Page);
        let snapshot = h.viewer.controller().snapshot();
        assert_eq!(snapshot.images().len(), 3);
        assert_eq!(snapshot.page_title(), "Gallery tab");
        assert!(h.gateway.page().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefers_the_stored_snapshot() {
        let mut h = harness();
        let page = h.gateway.inject_page();
        page.handle_event(PageEvent::Initialized).await.expect("stored");

        let origin = h.viewer.load().await.expect("loaded");

        assert_eq!(origin, SnapshotOrigin::Store);
        assert_eq!(h.viewer.controller().snapshot().page_title(), "Gallery");
        let keys: Vec<_> = h
            .viewer
            .group_views()
            .into_iter()
            .map(|g| (g.dimension_key, g.count))
            .collect();
        assert_eq!(keys, vec![("100x100".to_string(), 2), ("40x30".to_string(), 1)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listing_marks_selection_and_collapsed_groups() {
        let mut h = harness();
        h.viewer.load().await.expect("loaded");
        h.viewer.controller_mut().select_image("img_1", true);
        h.viewer.controller_mut().toggle_collapsed("40x30");

        let listing = h.viewer.listing();

        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Gallery tab",
                "https://gallery.test/",
                "3 image(s) detected, 1 selected [select all]",
                "[-] 100x100 (2) 1/2 selected",
                "    img_0 PNG https://gallery.test/a.png",
                "  * img_1 JPEG https://gallery.test/b.jpg",
                "[+] 40x30 (1) select group",
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn partial_store_without_titles_uses_placeholders() {
        let mut h = harness();
        let mut entries = Map::new();
        entries.insert(DETECTED_IMAGES_KEY.into(), json!([]));
        entries.insert(GROUPED_IMAGES_KEY.into(), json!([]));
        h.store.set(entries).expect("set");

        h.viewer.load().await.expect("loaded");

        let snapshot = h.viewer.controller().snapshot();
        assert_eq!(snapshot.page_url(), UNKNOWN_PAGE);
        assert_eq!(snapshot.page_title(), UNKNOWN_TITLE);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreadable_store_is_a_storage_error() {
        let mut h = harness();
        let mut entries = Map::new();
        entries.insert(DETECTED_IMAGES_KEY.into(), json!(42));
        h.store.set(entries).expect("set");

        let err = h.viewer.load().await.expect_err("storage error");

        assert!(matches!(err, ViewerError::Storage(_)));
        assert!(err.to_string().starts_with("detection failed, reload the page"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn single_download_uses_the_requested_format() {
        let mut h = harness();
        h.viewer.load().await.expect("loaded");
        h.viewer.set_format("webp".parse().unwrap());

        let id = h.viewer.download_single("img_2").await.expect("downloaded");

        assert_eq!(id, 1);
        let requests = h.recorder.requests.lock().unwrap();
        assert!(requests[0].filename.starts_with("image_40x30_"));
        assert!(requests[0].filename.ends_with(".webp"));
        assert!(matches!(
            h.viewer.download_single("img_9").await,
            Err(ViewerError::UnknownImage(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn archive_and_bulk_need_a_selection() {
        let mut h = harness();
        h.viewer.load().await.expect("loaded");

        assert!(matches!(
            h.viewer.download_selected_archive().await,
            Err(ViewerError::NothingSelected)
        ));
        assert!(matches!(
            h.viewer.download_selected_bulk().await,
            Err(ViewerError::NothingSelected)
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn group_selection_drives_archive_and_bulk() {
        let mut h = harness();
        h.viewer.load().await.expect("loaded");
        h.viewer.controller_mut().toggle_group("100x100");

        let archive = h.viewer.download_selected_archive().await.expect("archive");
        assert_eq!(archive.included(), 2);

        let bulk = h.viewer.download_selected_bulk().await.expect("bulk");
        assert_eq!(bulk.requested, 2);
        assert_eq!(bulk.download_ids.len(), 2);

        let requests = h.recorder.requests.lock().unwrap();
        assert!(matches!(requests[0].source, DownloadSource::Bytes(_)));
        assert!(requests[0].filename.ends_with(".zip"));
        assert!(requests[1].filename.ends_with("/image_1_100x100.png"));
        assert!(requests[2].filename.ends_with("/image_2_100x100.jpeg"));
    }
}
