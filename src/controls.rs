//! Timing and output controls shared by every context, plus the command-line surface.

use crate::batch::DEFAULT_ITEM_DELAY;
use crate::filenames::RequestedFormat;
use crate::gateway::DEFAULT_INJECTION_DELAY;
use crate::page::DEFAULT_SETTLE_DELAY;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Tunable knobs that bound how the contexts pace themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrabControls {
    item_delay: Duration,
    injection_delay: Duration,
    settle_delay: Duration,
    request_timeout: Duration,
    output_dir: PathBuf,
    probe_dimensions: bool,
}

impl GrabControls {
    /// Constructs a new set of controls.
    pub fn new(
        item_delay: Duration,
        injection_delay: Duration,
        settle_delay: Duration,
        request_timeout: Duration,
        output_dir: PathBuf,
        probe_dimensions: bool,
    ) -> Self {
        Self {
            item_delay,
            injection_delay,
            settle_delay,
            request_timeout,
            output_dir,
            probe_dimensions,
        }
    }

    /// Pause between two items of a bulk batch.
    pub fn item_delay(&self) -> Duration {
        self.item_delay
    }

    /// Wait after injecting the page context before retrying a request.
    pub fn injection_delay(&self) -> Duration {
        self.injection_delay
    }

    /// Wait after a page change before re-scanning.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Timeout applied to every HTTP request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Directory downloads are written below.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether images lacking a markup size are fetched to learn their natural size.
    pub fn probe_dimensions(&self) -> bool {
        self.probe_dimensions
    }
}

impl Default for GrabControls {
    fn default() -> Self {
        Self {
            item_delay: DEFAULT_ITEM_DELAY,
            injection_delay: DEFAULT_INJECTION_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            request_timeout: Duration::from_secs(10),
            output_dir: PathBuf::from("downloads"),
            probe_dimensions: false,
        }
    }
}

/// Command-line interface of the `imagegrab` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "imagegrab", about = "Detect, group and download the images of a page")]
pub struct Cli {
    /// Milliseconds between two items of a bulk download
    #[arg(long, global = true, env = "IMAGEGRAB_ITEM_DELAY_MS", default_value_t = 200)]
    pub item_delay_ms: u64,

    /// Milliseconds to wait after injecting the page context
    #[arg(long, global = true, env = "IMAGEGRAB_INJECTION_MS", default_value_t = 200)]
    pub injection_ms: u64,

    /// Milliseconds to wait after a page change before scanning
    #[arg(long, global = true, env = "IMAGEGRAB_SETTLE_MS", default_value_t = 500)]
    pub settle_ms: u64,

    /// HTTP timeout in seconds
    #[arg(long, global = true, env = "IMAGEGRAB_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Directory downloads are written to
    #[arg(long, global = true, env = "IMAGEGRAB_OUT", default_value = "downloads")]
    pub out: PathBuf,

    /// Fetch images without a markup size to read their natural dimensions
    #[arg(long, global = true, env = "IMAGEGRAB_PROBE", default_value_t = false)]
    pub probe: bool,

    /// What to do with the page
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Converts the parsed CLI into `GrabControls`.
    pub fn build_controls(&self) -> GrabControls {
        GrabControls::new(
            Duration::from_millis(self.item_delay_ms),
            Duration::from_millis(self.injection_ms),
            Duration::from_millis(self.settle_ms),
            Duration::from_secs(self.timeout_secs),
            self.out.clone(),
            self.probe,
        )
    }
}

/// Subcommands, one per user-facing flow.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the number of usable images on the page
    Count {
        /// Page to inspect
        url: Url,
        /// Ask the background to open the gallery when images were found
        #[arg(long)]
        open: bool,
    },
    /// Print the images grouped by dimensions
    List {
        /// Page to inspect
        url: Url,
        /// Print the snapshot as JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
    /// Select images and download them
    Download(DownloadArgs),
}

impl Command {
    /// Page the command operates on.
    pub fn url(&self) -> &Url {
        match self {
            Self::Count { url, .. } | Self::List { url, .. } => url,
            Self::Download(args) => &args.url,
        }
    }
}

/// How selected images leave the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// One interactive download per image.
    Single,
    /// One sequential batch handled by the background.
    Bulk,
    /// One ZIP archive.
    Zip,
}

/// Arguments of `download`.
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Page to inspect
    pub url: Url,

    /// Select every member of a `WxH` group (repeatable)
    #[arg(long = "group", value_name = "WxH")]
    pub groups: Vec<String>,

    /// Select one image by id, e.g. `img_3` (repeatable)
    #[arg(long = "image", value_name = "ID")]
    pub images: Vec<String>,

    /// Select every image
    #[arg(long)]
    pub all: bool,

    /// Output extension, or `original` to keep the detected one
    #[arg(long, default_value = "original")]
    pub format: RequestedFormat,

    /// Bundle the selection into one ZIP archive
    #[arg(long, conflicts_with = "bulk")]
    pub zip: bool,

    /// Hand the selection to the background as one batch
    #[arg(long)]
    pub bulk: bool,
}

impl DownloadArgs {
    /// Mode picked by the `--zip`/`--bulk` flags.
    pub fn mode(&self) -> DownloadMode {
        if self.zip {
            DownloadMode::Zip
        } else if self.bulk {
            DownloadMode::Bulk
        } else {
            DownloadMode::Single
        }
    }

    /// Whether any selection flag was given.
    pub fn has_selection(&self) -> bool {
        self.all || !self.groups.is_empty() || !self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_controls_default() {
        let cli = Cli::try_parse_from(["imagegrab", "count", "https://page.test/"]).expect("parse");
        assert_eq!(cli.build_controls(), GrabControls::default());
    }

    #[test]
    fn download_flags_pick_the_mode() {
        let cli = Cli::try_parse_from([
            "imagegrab",
            "download",
            "https://page.test/",
            "--group",
            "100x100",
            "--image",
            "img_4",
            "--format",
            "png",
            "--zip",
            "--out",
            "/tmp/grab",
        ])
        .expect("parse");

        assert_eq!(cli.out, PathBuf::from("/tmp/grab"));
        let Command::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.mode(), DownloadMode::Zip);
        assert_eq!(args.groups, vec!["100x100"]);
        assert_eq!(args.images, vec!["img_4"]);
        assert_eq!(args.format, RequestedFormat::Literal("png".into()));
        assert!(args.has_selection());
    }

    #[test]
    fn zip_and_bulk_conflict() {
        let result = Cli::try_parse_from([
            "imagegrab",
            "download",
            "https://page.test/",
            "--all",
            "--zip",
            "--bulk",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_formats_that_are_not_extensions() {
        let result = Cli::try_parse_from([
            "imagegrab",
            "download",
            "https://page.test/",
            "--all",
            "--format",
            "a/b",
        ]);
        let err = result.expect_err("rejected");
        assert!(err.to_string().contains("invalid format"), "{err}");
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(Cli::try_parse_from(["imagegrab", "list", "not a url"]).is_err());
    }
}
