//! Page context: owns the loaded document, scans it and publishes snapshots.

use crate::download::ImageFetcher;
use crate::html::{stream_document, HtmlStreamError};
use crate::messages::{Request, Response};
use crate::model::PageSnapshot;
use crate::scanner::{resolve_source, scan, ImageElement, ParsedDocument};
use crate::store::{SnapshotStore, StoreError};
use reqwest::Client;
use std::error::Error;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Time given to a changed page before it is scanned.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// The document a tab currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    /// Address of the document; relative image sources resolve against it.
    pub url: Url,
    /// `<title>` text.
    pub title: String,
    /// `<img>` elements in document order.
    pub elements: Vec<ImageElement>,
}

impl PageDocument {
    /// Builds a document from a parse result.
    pub fn from_parsed(url: Url, parsed: ParsedDocument) -> Self {
        Self {
            url,
            title: parsed.title,
            elements: parsed.elements,
        }
    }
}

/// Something that should trigger a re-scan of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// The page context was just attached.
    Initialized,
    /// The tab navigated to another document.
    Navigated(PageDocument),
    /// Explicit refresh of the current document.
    Refreshed,
}

impl PageEvent {
    /// Label used in logs.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Initialized => "initialization",
            Self::Navigated(_) => "url change",
            Self::Refreshed => "refresh",
        }
    }
}

/// Answers page-side requests and keeps the shared store in sync with the document.
pub struct PageContext {
    document: Mutex<PageDocument>,
    store: Arc<SnapshotStore>,
    settle_delay: Duration,
}

impl PageContext {
    /// Attaches to `document`. Nothing is published until the first event.
    pub fn new(document: PageDocument, store: Arc<SnapshotStore>, settle_delay: Duration) -> Self {
        Self {
            document: Mutex::new(document),
            store,
            settle_delay,
        }
    }

    /// Scans the current document.
    pub fn snapshot(&self) -> PageSnapshot {
        let document = self.document.lock().unwrap_or_else(|p| p.into_inner());
        let images = scan(&document.elements, &document.url);
        PageSnapshot::new(images, document.url.to_string(), document.title.clone())
    }

    /// URL of the current document.
    pub fn url(&self) -> Url {
        self.document
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .url
            .clone()
    }

    /// Waits for the page to settle, then re-scans and publishes the snapshot.
    pub async fn handle_event(&self, event: PageEvent) -> Result<PageSnapshot, StoreError> {
        info!(source = event.source(), "page update triggered");
        if !self.settle_delay.is_zero() {
            sleep(self.settle_delay).await;
        }
        if let PageEvent::Navigated(next) = event {
            *self.document.lock().unwrap_or_else(|p| p.into_inner()) = next;
        }
        let snapshot = self.snapshot();
        self.store.write_snapshot(&snapshot)?;
        debug!(
            images = snapshot.images().len(),
            groups = snapshot.groups().len(),
            "snapshot stored"
        );
        Ok(snapshot)
    }

    /// Answers page-side requests. Anything else is unrecognized here.
    pub fn handle(&self, request: &Request) -> Response {
        match request {
            Request::GetImageCount => Response::ImageCount {
                count: self.snapshot().images().len(),
            },
            Request::GetAllImages => {
                let snapshot = self.snapshot();
                Response::AllImages {
                    images: snapshot.images().to_vec(),
                    groups: snapshot.groups().to_vec(),
                }
            }
            _ => Response::unrecognized(),
        }
    }
}

/// Errors raised while loading a document.
#[derive(Debug)]
pub enum PageLoadError {
    /// The request failed.
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Status(u16),
    /// The body could not be streamed.
    Html(HtmlStreamError),
}

impl fmt::Display for PageLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Status(status) => write!(f, "unexpected status {status}"),
            Self::Html(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PageLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Html(err) => Some(err),
            Self::Status(_) => None,
        }
    }
}

/// Fetches `url` and streams its image elements. The final URL after redirects is kept.
pub async fn load_document(client: &Client, url: &Url) -> Result<PageDocument, PageLoadError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(PageLoadError::Http)?;
    if !response.status().is_success() {
        return Err(PageLoadError::Status(response.status().as_u16()));
    }
    let final_url = response.url().clone();
    let parsed = stream_document(response)
        .await
        .map_err(PageLoadError::Html)?;
    Ok(PageDocument::from_parsed(final_url, parsed))
}

/// Fills in natural dimensions for elements whose markup lacks a usable size.
///
/// Formats the decoder does not know (SVG among them) keep their attribute sizes.
/// Returns how many elements were probed successfully.
pub async fn probe_natural_dimensions(
    document: &mut PageDocument,
    fetcher: &dyn ImageFetcher,
) -> usize {
    let mut probed = 0;
    for element in document.elements.iter_mut() {
        let (width, height) = element.dimensions();
        if width > 1 && height > 1 {
            continue;
        }
        let Some(source) = resolve_source(element, &document.url) else {
            continue;
        };
        let bytes = match fetcher.fetch(&source).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url = %source, error = %err, "dimension probe failed");
                continue;
            }
        };
        match decoded_dimensions(&bytes) {
            Some(dims) => {
                element.natural = Some(dims);
                probed += 1;
            }
            None => debug!(url = %source, "undecodable image, keeping markup size"),
        }
    }
    probed
}

fn decoded_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
