//! Sequential multi-image downloads, either one request per item or a single ZIP archive.

use crate::download::{DownloadId, DownloadRequest, Downloader, ImageFetcher};
use crate::filenames::{
    archive_filename, bulk_filename, dedupe_filename, interactive_filename, RequestedFormat,
};
use crate::model::{DownloadBatchRequest, ImageDescriptor};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::io::{Cursor, Write};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Pause between two dispatches of the same batch.
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(200);

/// Folder that holds the images inside an archive.
pub const ARCHIVE_FOLDER: &str = "images";

/// Outcome of a bulk batch. Failures are per item; the batch itself always completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Ids of the downloads that were accepted, in item order.
    pub download_ids: Vec<DownloadId>,
    /// Items in the request.
    pub requested: usize,
}

impl BatchReport {
    /// Items that were downloaded.
    pub fn succeeded(&self) -> usize {
        self.download_ids.len()
    }
}

/// Downloads every item in order, one request each, pausing `delay` between items.
///
/// A failed item is logged and skipped; it never stops the items after it.
pub async fn download_batch(
    downloader: &dyn Downloader,
    request: &DownloadBatchRequest,
    delay: Duration,
) -> BatchReport {
    let total = request.items.len();
    let mut download_ids = Vec::with_capacity(total);

    for (index, item) in request.items.iter().enumerate() {
        let filename = bulk_filename(
            request.batch_timestamp,
            index + 1,
            item.width,
            item.height,
            item.format.as_deref(),
        );
        match downloader
            .download(DownloadRequest::url(item.url.clone(), filename))
            .await
        {
            Ok(id) => download_ids.push(id),
            Err(err) => warn!(item = index + 1, url = %item.url, error = %err, "batch item failed"),
        }

        if index + 1 < total && !delay.is_zero() {
            sleep(delay).await;
        }
    }

    info!(
        succeeded = download_ids.len(),
        requested = total,
        "batch download finished"
    );
    BatchReport {
        download_ids,
        requested: total,
    }
}

/// Outcome of an archive download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Name the archive was saved under.
    pub filename: String,
    /// Id of the single archive download.
    pub download_id: DownloadId,
    /// Entry names, in item order.
    pub entries: Vec<String>,
    /// Items in the request.
    pub requested: usize,
}

impl ArchiveReport {
    /// Items that made it into the archive.
    pub fn included(&self) -> usize {
        self.entries.len()
    }
}

/// Errors that abort an archive download as a whole.
#[derive(Debug)]
pub enum ArchiveError {
    /// Every fetch failed, so there is nothing to archive.
    NothingFetched {
        /// Items in the request.
        requested: usize,
    },
    /// Building the ZIP failed.
    Zip(zip::result::ZipError),
    /// Writing an entry into the in-memory buffer failed.
    Io(std::io::Error),
    /// The download subsystem rejected the archive.
    Download(crate::download::DownloadError),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingFetched { requested } => {
                write!(f, "none of the {requested} images could be fetched")
            }
            Self::Zip(err) => write!(f, "zip error: {err}"),
            Self::Io(err) => write!(f, "archive write error: {err}"),
            Self::Download(err) => write!(f, "archive download failed: {err}"),
        }
    }
}

impl Error for ArchiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NothingFetched { .. } => None,
            Self::Zip(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Download(err) => Some(err),
        }
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Zip(err)
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Fetches every descriptor in order into one in-memory ZIP, then issues a single download.
///
/// Entries are named like single downloads and placed under `images/`. Items whose fetch
/// fails are logged and left out.
pub async fn download_archive(
    fetcher: &dyn ImageFetcher,
    downloader: &dyn Downloader,
    descriptors: &[&ImageDescriptor],
    format: &RequestedFormat,
    now: DateTime<Utc>,
) -> Result<ArchiveReport, ArchiveError> {
    let requested = descriptors.len();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut taken = HashSet::new();
    let mut entries = Vec::with_capacity(requested);

    for (index, descriptor) in descriptors.iter().enumerate() {
        debug!(item = index + 1, total = requested, id = %descriptor.id, "fetching archive item");
        let bytes = match fetcher.fetch(&descriptor.source_url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url = %descriptor.source_url, error = %err, "skipping archive item");
                continue;
            }
        };

        let name = interactive_filename(descriptor, format, Utc::now().timestamp_millis());
        let name = dedupe_filename(&name, &taken);
        taken.insert(name.clone());

        writer.start_file(format!("{ARCHIVE_FOLDER}/{name}"), options)?;
        writer.write_all(&bytes)?;
        entries.push(name);
    }

    if entries.is_empty() {
        return Err(ArchiveError::NothingFetched { requested });
    }

    let archive = writer.finish()?.into_inner();
    let filename = archive_filename(now);
    let download_id = downloader
        .download(DownloadRequest::bytes(archive, filename.clone()))
        .await
        .map_err(ArchiveError::Download)?;

    info!(%filename, included = entries.len(), requested, "archive download issued");
    Ok(ArchiveReport {
        filename,
        download_id,
        entries,
        requested,
    })
}
