//! Request/response relay between the page, background and UI contexts.

use crate::background::BackgroundContext;
use crate::messages::{Action, Recipient, Request, Response};
use crate::page::PageContext;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Time given to a freshly injected page context before the request is retried.
pub const DEFAULT_INJECTION_DELAY: Duration = Duration::from_millis(200);

/// Builds a page context for the active tab on demand.
pub type PageInjector = Box<dyn Fn() -> Arc<PageContext> + Send + Sync>;

/// Errors raised while relaying a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No context is listening for this action.
    ReceiverMissing(Action),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceiverMissing(action) => write!(
                f,
                "could not establish connection for {}: receiving end does not exist",
                action.name()
            ),
        }
    }
}

impl Error for TransportError {}

/// Address bar view of the active tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    /// Tab URL.
    pub url: String,
    /// Tab title.
    pub title: String,
}

/// Routes requests to the context that owns their action.
pub struct Gateway {
    background: Arc<BackgroundContext>,
    tab: TabInfo,
    page: Mutex<Option<Arc<PageContext>>>,
    injector: PageInjector,
}

impl Gateway {
    /// A gateway whose tab has no page context yet.
    pub fn new(background: Arc<BackgroundContext>, tab: TabInfo, injector: PageInjector) -> Self {
        Self {
            background,
            tab,
            page: Mutex::new(None),
            injector,
        }
    }

    /// The active tab.
    pub fn tab(&self) -> &TabInfo {
        &self.tab
    }

    /// Currently attached page context, if any.
    pub fn page(&self) -> Option<Arc<PageContext>> {
        self.page.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Injects the page context unless one is already attached. Returns the attached context.
    pub fn inject_page(&self) -> Arc<PageContext> {
        let mut slot = self.page.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(page) = slot.as_ref() {
            debug!("page context already injected");
            return Arc::clone(page);
        }
        let page = (self.injector)();
        *slot = Some(Arc::clone(&page));
        info!(url = %self.tab.url, "page context injected");
        page
    }

    /// Delivers a request and waits for the answer.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let action = request.action();
        match action.recipient() {
            Recipient::Background => Ok(self.background.handle(request).await),
            Recipient::Page => {
                let page = self.page().ok_or(TransportError::ReceiverMissing(action))?;
                Ok(page.handle(&request))
            }
        }
    }

    /// Like [`Gateway::send`], but when the page context is missing it injects it, waits
    /// `settle`, and retries exactly once.
    pub async fn send_with_injection(
        &self,
        request: Request,
        settle: Duration,
    ) -> Result<Response, TransportError> {
        match self.send(request.clone()).await {
            Err(TransportError::ReceiverMissing(action)) => {
                warn!(action = action.name(), "no receiver, injecting page context");
                self.inject_page();
                if !settle.is_zero() {
                    sleep(settle).await;
                }
                self.send(request).await
            }
            other => other,
        }
    }

    /// Fire-and-forget delivery.
    pub async fn notify(&self, request: Request) -> Result<(), TransportError> {
        self.send(request).await.map(|_| ())
    }

    /// Dispatches a raw `{"action", "data"}` envelope and returns the JSON answer.
    ///
    /// Unknown actions and malformed payloads come back as failures, never as errors.
    pub async fn dispatch_json(&self, envelope: &Value) -> Value {
        let name = envelope.get("action").and_then(Value::as_str).unwrap_or("");
        if Action::from_name(name).is_none() {
            warn!(action = name, "unrecognized action");
            return Response::unrecognized().to_json();
        }
        let request: Request = match serde_json::from_value(envelope.clone()) {
            Ok(request) => request,
            Err(err) => return Response::failure(format!("invalid payload: {err}")).to_json(),
        };
        match self.send(request).await {
            Ok(response) => response.to_json(),
            Err(err) => Response::failure(err.to_string()).to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::ViewerLaunch;
    use crate::download::{DownloadError, DownloadId, DownloadRequest, Downloader};
    use crate::page::PageDocument;
    use crate::scanner::parse_html;
    use crate::store::SnapshotStore;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use url::Url;

    struct NullDownloader;

    impl Downloader for NullDownloader {
        fn download(
            &self,
            _request: DownloadRequest,
        ) -> BoxFuture<'_, Result<DownloadId, DownloadError>> {
            Box::pin(async { Ok(7) })
        }
    }

    fn gateway(injections: Arc<AtomicUsize>) -> (Gateway, mpsc::UnboundedReceiver<ViewerLaunch>) {
        let store = Arc::new(SnapshotStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let background = Arc::new(BackgroundContext::new(
            Arc::new(NullDownloader),
            Arc::clone(&store),
            Duration::ZERO,
            tx,
        ));
        let injector: PageInjector = Box::new(move || {
            injections.fetch_add(1, Ordering::SeqCst);
            let document = PageDocument::from_parsed(
                Url::parse("https://tab.test/").unwrap(),
                parse_html(r#"<img src="a.png" width="4" height="4"><img src="b.png" width="4" height="4">"#),
            );
            Arc::new(PageContext::new(document, Arc::clone(&store), Duration::ZERO))
        });
        let tab = TabInfo {
            url: "https://tab.test/".into(),
            title: "Tab".into(),
        };
        (Gateway::new(background, tab, injector), rx)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn page_requests_fail_without_a_receiver() {
        let (gateway, _rx) = gateway(Arc::new(AtomicUsize::new(0)));
        assert_eq!(
            gateway.send(Request::GetImageCount).await,
            Err(TransportError::ReceiverMissing(Action::GetImageCount))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn injects_once_and_retries() {
        let injections = Arc::new(AtomicUsize::new(0));
        let (gateway, _rx) = gateway(Arc::clone(&injections));

        let first = gateway
            .send_with_injection(Request::GetImageCount, Duration::ZERO)
            .await;
        let second = gateway
            .send_with_injection(Request::GetImageCount, Duration::ZERO)
            .await;

        assert_eq!(first, Ok(Response::ImageCount { count: 2 }));
        assert_eq!(second, Ok(Response::ImageCount { count: 2 }));
        assert_eq!(injections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn injection_is_idempotent() {
        let injections = Arc::new(AtomicUsize::new(0));
        let (gateway, _rx) = gateway(Arc::clone(&injections));

        let a = gateway.inject_page();
        let b = gateway.inject_page();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(injections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_actions_are_answered_not_dropped() {
        let (gateway, _rx) = gateway(Arc::new(AtomicUsize::new(0)));

        let body = gateway.dispatch_json(&json!({ "action": "formatDisk" })).await;
        assert_eq!(body, json!({ "success": false, "error": "unrecognized action" }));

        let body = gateway.dispatch_json(&json!({ "data": 1 })).await;
        assert_eq!(body["error"], "unrecognized action");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn json_dispatch_reaches_background() {
        let (gateway, mut rx) = gateway(Arc::new(AtomicUsize::new(0)));

        let body = gateway
            .dispatch_json(&json!({
                "action": "downloadImage",
                "data": { "url": "https://cdn.test/a.png" }
            }))
            .await;
        assert_eq!(body, json!({ "success": true, "downloadId": 7 }));

        let body = gateway.dispatch_json(&json!({ "action": "openViewer" })).await;
        assert_eq!(body, Value::Null);
        assert!(rx.try_recv().is_ok());

        let body = gateway
            .dispatch_json(&json!({ "action": "downloadImage", "data": { "nope": true } }))
            .await;
        assert_eq!(body["success"], false);
    }
}
