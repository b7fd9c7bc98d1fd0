//! Popup: live image count and the viewer launch button.

use crate::gateway::{Gateway, TransportError};
use crate::messages::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the popup shows after asking the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupView {
    /// Images were found; the viewer action is enabled.
    Ready {
        /// Images on the page.
        count: usize,
    },
    /// The page has no usable images; the viewer action is disabled.
    Empty,
    /// The page could not be reached even after injection.
    DetectionFailed(String),
}

impl PopupView {
    /// Status line shown under the count.
    pub fn status(&self) -> String {
        match self {
            Self::Ready { count: 1 } => "1 image found".to_string(),
            Self::Ready { count } => format!("{count} images found"),
            Self::Empty => "no images found".to_string(),
            Self::DetectionFailed(reason) => format!("detection failed: {reason}"),
        }
    }

    /// Whether the "open viewer" action can be pressed.
    pub fn viewer_enabled(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// The popup of the active tab.
pub struct Popup {
    gateway: Arc<Gateway>,
    injection_delay: Duration,
}

impl Popup {
    /// Popup bound to a gateway.
    pub fn new(gateway: Arc<Gateway>, injection_delay: Duration) -> Self {
        Self {
            gateway,
            injection_delay,
        }
    }

    /// Asks the page for its image count, injecting the page context when needed.
    pub async fn open(&self) -> PopupView {
        let response = self
            .gateway
            .send_with_injection(Request::GetImageCount, self.injection_delay)
            .await;
        match response {
            Ok(Response::ImageCount { count: 0 }) => PopupView::Empty,
            Ok(Response::ImageCount { count }) => {
                info!(count, "popup image count");
                PopupView::Ready { count }
            }
            Ok(other) => {
                warn!(?other, "unexpected image count answer");
                PopupView::DetectionFailed("unexpected answer from page".into())
            }
            Err(err) => {
                warn!(error = %err, "image count failed");
                PopupView::DetectionFailed(err.to_string())
            }
        }
    }

    /// Sends the fire-and-forget viewer launch.
    pub async fn launch_viewer(&self) -> Result<(), TransportError> {
        self.gateway.notify(Request::OpenViewer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{BackgroundContext, ViewerLaunch};
    use crate::download::{DownloadError, DownloadId, DownloadRequest, Downloader};
    use crate::gateway::{PageInjector, TabInfo};
    use crate::page::{PageContext, PageDocument};
    use crate::scanner::parse_html;
    use crate::store::SnapshotStore;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use url::Url;

    struct RejectingDownloader;

    impl Downloader for RejectingDownloader {
        fn download(
            &self,
            _request: DownloadRequest,
        ) -> BoxFuture<'_, Result<DownloadId, DownloadError>> {
            Box::pin(async { Err(DownloadError::InvalidFilename(String::new())) })
        }
    }

    fn popup(html: &'static str) -> (Popup, mpsc::UnboundedReceiver<ViewerLaunch>) {
        let store = Arc::new(SnapshotStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let background = Arc::new(BackgroundContext::new(
            Arc::new(RejectingDownloader),
            Arc::clone(&store),
            Duration::ZERO,
            tx,
        ));
        let injector: PageInjector = Box::new(move || {
            let document = PageDocument::from_parsed(
                Url::parse("https://popup.test/").unwrap(),
                parse_html(html),
            );
            Arc::new(PageContext::new(document, Arc::clone(&store), Duration::ZERO))
        });
        let tab = TabInfo {
            url: "https://popup.test/".into(),
            title: String::new(),
        };
        let gateway = Arc::new(Gateway::new(background, tab, injector));
        (Popup::new(gateway, Duration::ZERO), rx)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn counts_images_after_injection() {
        let (popup, _rx) = popup(
            r#"<img src="a.jpg" width="30" height="30"><img src="b.jpg" width="1" height="30">"#,
        );

        let view = popup.open().await;

        assert_eq!(view, PopupView::Ready { count: 1 });
        assert_eq!(view.status(), "1 image found");
        assert!(view.viewer_enabled());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_page_disables_the_viewer() {
        let (popup, _rx) = popup("<p>text only</p>");

        let view = popup.open().await;

        assert_eq!(view, PopupView::Empty);
        assert_eq!(view.status(), "no images found");
        assert!(!view.viewer_enabled());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn launch_reaches_the_background() {
        let (popup, mut rx) = popup("");

        popup.launch_viewer().await.expect("delivered");

        assert!(rx.try_recv().is_ok());
    }
}
