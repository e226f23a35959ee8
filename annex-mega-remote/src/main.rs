mod annex;
mod backend;
mod commands;
mod config;
mod dispatch;
mod progress;
mod session;
mod transfer;

use tracing::info;
use tracing_subscriber::EnvFilter;

use annex::{Annex, AnnexWriter};
use config::Settings;
use dispatch::Remote;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the protocol; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let settings = Settings::from_env()?;
    let connector = backend::connector(&settings)?;
    info!(backend = %settings.backend, "git-annex-remote-mega starting");

    let annex = Annex::new(tokio::io::stdin(), AnnexWriter::new(std::io::stdout()));
    Remote::new(annex, connector).run().await
}
