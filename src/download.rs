//! Host download subsystem: resolves image bytes and writes them below an output directory.

use crate::filenames::numbered_filename;
use base64::Engine;
use futures_util::future::BoxFuture;
use reqwest::Client;
use std::error::Error;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Identifier handed out for every accepted download.
pub type DownloadId = u64;

/// Where the bytes of a download come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// `http(s)` or `data:` URL resolved through an [`ImageFetcher`].
    Url(String),
    /// Bytes already in memory, such as a generated archive.
    Bytes(Vec<u8>),
}

/// A single request to the download subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Payload source.
    pub source: DownloadSource,
    /// Relative path below the download root; `/` separates folders.
    pub filename: String,
}

impl DownloadRequest {
    /// Download of a URL.
    pub fn url(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: DownloadSource::Url(url.into()),
            filename: filename.into(),
        }
    }

    /// Download of in-memory bytes.
    pub fn bytes(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            source: DownloadSource::Bytes(bytes),
            filename: filename.into(),
        }
    }
}

/// Fetches image bytes.
pub trait ImageFetcher: Send + Sync {
    /// Returns the body behind `url`.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// Accepts download requests and returns an id per accepted request.
pub trait Downloader: Send + Sync {
    /// Issues one download.
    fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Result<DownloadId, DownloadError>>;
}

/// Errors produced while fetching image bytes.
#[derive(Debug)]
pub enum FetchError {
    /// The HTTP request failed.
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Status(u16),
    /// A `data:` URL could not be decoded.
    InvalidDataUrl(String),
    /// The scheme is neither `http(s)` nor `data:`.
    UnsupportedScheme(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Status(status) => write!(f, "unexpected status {status}"),
            Self::InvalidDataUrl(reason) => write!(f, "invalid data url: {reason}"),
            Self::UnsupportedScheme(url) => write!(f, "unsupported url scheme: {url}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors produced while issuing a download.
#[derive(Debug)]
pub enum DownloadError {
    /// The payload could not be fetched.
    Fetch(FetchError),
    /// The filename is empty, absolute or escapes the download root.
    InvalidFilename(String),
    /// Writing to disk failed.
    Io(std::io::Error),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "fetch failed: {err}"),
            Self::InvalidFilename(name) => write!(f, "invalid filename: {name:?}"),
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl Error for DownloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::InvalidFilename(_) => None,
        }
    }
}

impl From<FetchError> for DownloadError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Fetches `http(s)` URLs with `reqwest` and decodes `data:` URLs locally.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Wraps a configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(FetchError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(FetchError::Http)?;
        Ok(body.to_vec())
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            if url.starts_with("data:") {
                decode_data_url(url)
            } else if url.starts_with("http://") || url.starts_with("https://") {
                self.fetch_remote(url).await
            } else {
                Err(FetchError::UnsupportedScheme(url.to_string()))
            }
        })
    }
}

/// Decodes `data:[<mime>][;base64],<payload>`.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, FetchError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::InvalidDataUrl("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidDataUrl("missing ',' separator".into()))?;
    if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| FetchError::InvalidDataUrl(err.to_string()))
    } else {
        Ok(percent_decode(payload))
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Writes downloads below `root`, handing out ids in issue order starting at 1.
pub struct FsDownloader {
    root: PathBuf,
    fetcher: Arc<dyn ImageFetcher>,
    next_id: AtomicU64,
}

impl FsDownloader {
    /// Creates a downloader rooted at `root`. Directories are created on demand.
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
            next_id: AtomicU64::new(1),
        }
    }

    /// Download root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write(&self, request: DownloadRequest) -> Result<(DownloadId, PathBuf), DownloadError> {
        let relative = checked_relative_path(&request.filename)?;
        let bytes = match request.source {
            DownloadSource::Bytes(bytes) => bytes,
            DownloadSource::Url(url) => self.fetcher.fetch(&url).await?,
        };
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = write_new_file(&path, &bytes).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok((id, path))
    }
}

/// Writes `bytes` to `path`, or to `stem_{n}.ext` next to it when the name is taken.
/// Existing files are never overwritten.
async fn write_new_file(path: &Path, bytes: &[u8]) -> Result<PathBuf, std::io::Error> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = path.to_path_buf();
    let mut n = 1;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                return Ok(candidate);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                n += 1;
                debug!(path = %candidate.display(), "name taken, numbering");
                candidate = path.with_file_name(numbered_filename(&name, n));
            }
            Err(err) => return Err(err),
        }
    }
}

impl Downloader for FsDownloader {
    fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Result<DownloadId, DownloadError>> {
        Box::pin(async move {
            let filename = request.filename.clone();
            match self.write(request).await {
                Ok((id, path)) => {
                    info!(download_id = id, path = %path.display(), "download complete");
                    Ok(id)
                }
                Err(err) => {
                    warn!(%filename, error = %err, "download failed");
                    Err(err)
                }
            }
        })
    }
}

fn checked_relative_path(filename: &str) -> Result<PathBuf, DownloadError> {
    let path = Path::new(filename);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(DownloadError::InvalidFilename(filename.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(DownloadError::InvalidFilename(filename.to_string()));
    }
    Ok(clean)
}
