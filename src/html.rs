//! Streaming HTML helpers built on `lol_html`.

use crate::scanner::{ImageElement, ParsedDocument};
use futures_util::{Stream, StreamExt};
use html_escape::decode_html_entities;
use lol_html::{element, text, HtmlRewriter, OutputSink, Settings};
use reqwest::Response;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Streams an HTTP response body, collecting the `<title>` text and every `<img>` element.
pub async fn stream_document(response: Response) -> Result<ParsedDocument, HtmlStreamError> {
    collect_document(response.bytes_stream()).await
}

/// Same as [`stream_document`] over any chunked byte stream.
pub async fn collect_document<S, B>(mut stream: S) -> Result<ParsedDocument, HtmlStreamError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let document: Arc<Mutex<ParsedDocument>> = Arc::new(Mutex::new(ParsedDocument::default()));
    let images_handle = Arc::clone(&document);
    let title_handle = Arc::clone(&document);
    let title_done = Arc::new(Mutex::new(false));
    let title_done_handle = Arc::clone(&title_done);

    let image_handler = element!("img", move |el| {
        let mut document = images_handle
            .lock()
            .map_err(|_| "document collector mutex poisoned")?;
        let attr = |name: &str| el.get_attribute(name).map(|raw| decode_entities(&raw));
        document.elements.push(ImageElement {
            src: attr("src"),
            data_src: attr("data-src"),
            alt: attr("alt"),
            width_attr: attr("width"),
            height_attr: attr("height"),
            natural: None,
        });
        Ok(())
    });

    // Only the first <title> counts; its text may arrive split across chunks.
    let title_handler = text!("title", move |chunk| {
        let mut done = title_done_handle
            .lock()
            .map_err(|_| "title flag mutex poisoned")?;
        if *done {
            return Ok(());
        }
        let mut document = title_handle
            .lock()
            .map_err(|_| "document collector mutex poisoned")?;
        document.title.push_str(chunk.as_str());
        if chunk.last_in_text_node() {
            *done = true;
        }
        Ok(())
    });

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![image_handler, title_handler],
            ..Settings::default()
        },
        NoopSink,
    );

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HtmlStreamError::Http)?;
        rewriter
            .write(chunk.as_ref())
            .map_err(HtmlStreamError::Rewrite)?;
    }
    rewriter.end().map_err(HtmlStreamError::Rewrite)?;

    let mut collected = Arc::try_unwrap(document)
        .map_err(|_| HtmlStreamError::CollectorInUse)?
        .into_inner()
        .map_err(|_| HtmlStreamError::CollectorPoisoned)?;
    collected.title = decode_entities(collected.title.trim());

    Ok(collected)
}

/// Errors surfaced while streaming HTML.
#[derive(Debug)]
pub enum HtmlStreamError {
    /// Reading the response stream failed.
    Http(reqwest::Error),
    /// The HTML rewriter encountered malformed markup.
    Rewrite(lol_html::errors::RewritingError),
    /// Internal buffer still had outstanding references.
    CollectorInUse,
    /// Collector mutex was poisoned while draining results.
    CollectorPoisoned,
}

impl fmt::Display for HtmlStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http stream error: {err}"),
            Self::Rewrite(err) => write!(f, "html rewrite error: {err}"),
            Self::CollectorInUse => write!(f, "document collector still in use"),
            Self::CollectorPoisoned => write!(f, "document collector mutex poisoned"),
        }
    }
}

impl Error for HtmlStreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Rewrite(err) => Some(err),
            Self::CollectorInUse | Self::CollectorPoisoned => None,
        }
    }
}

// lol_html hands out attribute values and text exactly as written in the markup.
fn decode_entities(input: &str) -> String {
    decode_html_entities(input).into_owned()
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
