use anyhow::{anyhow, Context, Result};
use clap::Parser;
use imagegrab::{runtime, Cli};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let cli = Cli::parse();
    let url = cli.command.url().clone();
    runtime::run(cli)
        .map_err(|err| anyhow!(err))
        .with_context(|| format!("imagegrab failed for {url}"))
}
