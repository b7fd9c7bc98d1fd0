#![warn(missing_docs)]
//! Core library entry points for imagegrab: detect the images of a page, group them by
//! dimensions, select a subset and download it one by one, as a batch or as a ZIP archive.
//!
//! The work is split across four cooperating contexts connected by a typed [`Gateway`]:
//! the page context scans the document, the background executes downloads and serves the
//! stored snapshot, the popup counts images, and the viewer owns the selection.

pub mod background;
pub mod batch;
pub mod controls;
pub mod download;
pub mod filenames;
pub mod gateway;
pub mod grouping;
pub mod html;
pub mod messages;
pub mod model;
pub mod page;
pub mod popup;
pub mod runtime;
pub mod scanner;
pub mod selection;
pub mod store;
pub mod viewer;

pub use background::{BackgroundContext, ViewerLaunch};
pub use batch::{download_archive, download_batch, ArchiveError, ArchiveReport, BatchReport};
pub use controls::{Cli, Command, DownloadMode, GrabControls};
pub use download::{
    DownloadError, DownloadId, DownloadRequest, Downloader, FetchError, FsDownloader,
    HttpFetcher, ImageFetcher,
};
pub use filenames::{InvalidFormat, RequestedFormat};
pub use gateway::{Gateway, TabInfo, TransportError};
pub use grouping::group;
pub use messages::{Action, Request, Response};
pub use model::{
    DownloadBatchRequest, DownloadItem, ImageDescriptor, ImageFormat, ImageGroup, PageSnapshot,
};
pub use page::{PageContext, PageDocument, PageEvent};
pub use popup::{Popup, PopupView};
pub use runtime::{run as run_imagegrab, Session};
pub use scanner::scan;
pub use selection::{GroupSelection, SelectionController};
pub use store::{SnapshotStore, StoredSnapshot};
pub use viewer::{Viewer, ViewerError};
