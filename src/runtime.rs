//! Application runner wiring the contexts together and executing one command.

use crate::background::{BackgroundContext, ViewerLaunch};
use crate::controls::{Cli, Command, DownloadArgs, DownloadMode, GrabControls};
use crate::download::{Downloader, FsDownloader, HttpFetcher, ImageFetcher};
use crate::gateway::{Gateway, PageInjector, TabInfo};
use crate::page::{load_document, probe_natural_dimensions, PageContext, PageDocument, PageEvent};
use crate::popup::{Popup, PopupView};
use crate::store::SnapshotStore;
use crate::viewer::{Viewer, ViewerError};
use reqwest::Client;
use std::sync::Arc;
use tokio::runtime::Builder;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("imagegrab/", env!("CARGO_PKG_VERSION"));

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Entry point used by the binary: runs `cli.command` to completion on a single thread.
pub fn run(cli: Cli) -> Result<(), DynError> {
    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run_command(cli))
}

/// HTTP client shared by page loads and image fetches.
pub fn build_client(controls: &GrabControls) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(controls.request_timeout())
        .build()
}

/// Every context of one tab, wired to a shared store.
pub struct Session {
    /// Routes messages between the contexts.
    pub gateway: Arc<Gateway>,
    /// Download subsystem used by the viewer and the background.
    pub downloader: Arc<dyn Downloader>,
    /// Byte source for archives and dimension probes.
    pub fetcher: Arc<dyn ImageFetcher>,
    /// Viewer launches requested through the background.
    pub launches: UnboundedReceiver<ViewerLaunch>,
    controls: GrabControls,
}

impl Session {
    /// Wires the contexts around an already loaded document.
    pub fn new(
        document: PageDocument,
        controls: GrabControls,
        fetcher: Arc<dyn ImageFetcher>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new());
        let (tx, launches) = mpsc::unbounded_channel();
        let background = Arc::new(BackgroundContext::new(
            Arc::clone(&downloader),
            Arc::clone(&store),
            controls.item_delay(),
            tx,
        ));
        let tab = TabInfo {
            url: document.url.to_string(),
            title: document.title.clone(),
        };
        let settle = controls.settle_delay();
        let injector: PageInjector = Box::new(move || {
            Arc::new(PageContext::new(document.clone(), Arc::clone(&store), settle))
        });

        Self {
            gateway: Arc::new(Gateway::new(background, tab, injector)),
            downloader,
            fetcher,
            launches,
            controls,
        }
    }

    /// Popup of the tab.
    pub fn popup(&self) -> Popup {
        Popup::new(Arc::clone(&self.gateway), self.controls.injection_delay())
    }

    /// A fresh gallery for the tab.
    pub fn viewer(&self) -> Viewer {
        Viewer::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.downloader),
            Arc::clone(&self.fetcher),
            self.controls.injection_delay(),
        )
    }

    /// Injects the page context and lets it publish its first snapshot.
    pub async fn initialize_page(&self) -> Result<(), DynError> {
        let page = self.gateway.inject_page();
        page.handle_event(PageEvent::Initialized).await?;
        Ok(())
    }
}

async fn run_command(cli: Cli) -> Result<(), DynError> {
    if let Command::Download(args) = &cli.command {
        if !args.has_selection() {
            return Err("nothing to download: pass --all, --group WxH or --image ID".into());
        }
    }
    let controls = cli.build_controls();
    let client = build_client(&controls)?;
    let url = cli.command.url().clone();

    let mut document = load_document(&client, &url).await?;
    info!(url = %document.url, elements = document.elements.len(), "page loaded");

    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::new(client));
    if controls.probe_dimensions() {
        let probed = probe_natural_dimensions(&mut document, fetcher.as_ref()).await;
        info!(probed, "natural dimensions probed");
    }
    let downloader: Arc<dyn Downloader> = Arc::new(FsDownloader::new(
        controls.output_dir(),
        Arc::clone(&fetcher),
    ));
    let mut session = Session::new(document, controls, fetcher, downloader);

    match cli.command {
        Command::Count { open, .. } => run_count(&mut session, open).await,
        Command::List { json, .. } => run_list(&session, json).await,
        Command::Download(args) => run_download(&session, args).await,
    }
}

async fn run_count(session: &mut Session, open: bool) -> Result<(), DynError> {
    let popup = session.popup();
    let view = popup.open().await;
    if let PopupView::DetectionFailed(reason) = &view {
        return Err(format!("detection failed: {reason}").into());
    }
    println!("{}", view.status());

    if open && view.viewer_enabled() {
        popup.launch_viewer().await?;
        if session.launches.recv().await.is_some() {
            let mut viewer = session.viewer();
            viewer.load().await?;
            println!("{}", viewer.listing());
        }
    }
    Ok(())
}

async fn run_list(session: &Session, json: bool) -> Result<(), DynError> {
    session.initialize_page().await?;
    let mut viewer = session.viewer();
    viewer.load().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(viewer.controller().snapshot())?);
    } else {
        println!("{}", viewer.listing());
    }
    Ok(())
}

async fn run_download(session: &Session, args: DownloadArgs) -> Result<(), DynError> {
    session.initialize_page().await?;
    let mut viewer = session.viewer();
    viewer.load().await?;
    viewer.set_format(args.format.clone());

    let controller = viewer.controller_mut();
    if args.all {
        controller.select_all(true);
    }
    for key in &args.groups {
        if controller.snapshot().group(key).is_none() {
            warn!(group = %key, "no such group");
        }
        controller.select_group(key, true);
    }
    for id in &args.images {
        if !controller.select_image(id, true) && !controller.is_selected(id) {
            warn!(%id, "no such image");
        }
    }

    match args.mode() {
        DownloadMode::Single => download_each(&viewer).await,
        DownloadMode::Bulk => {
            let outcome = viewer.download_selected_bulk().await?;
            println!(
                "{}/{} images downloaded",
                outcome.download_ids.len(),
                outcome.requested
            );
            Ok(())
        }
        DownloadMode::Zip => {
            let report = viewer.download_selected_archive().await?;
            println!(
                "{}: {}/{} images included",
                report.filename,
                report.included(),
                report.requested
            );
            Ok(())
        }
    }
}

async fn download_each(viewer: &Viewer) -> Result<(), DynError> {
    let ids: Vec<String> = viewer
        .controller()
        .selected_descriptors()
        .iter()
        .map(|descriptor| descriptor.id.clone())
        .collect();
    if ids.is_empty() {
        return Err(ViewerError::NothingSelected.into());
    }

    let mut succeeded = 0;
    for id in &ids {
        match viewer.download_single(id).await {
            Ok(download_id) => {
                succeeded += 1;
                println!("{id}: download #{download_id}");
            }
            Err(err) => warn!(%id, error = %err, "download failed"),
        }
    }
    println!("{succeeded}/{} images downloaded", ids.len());
    Ok(())
}
