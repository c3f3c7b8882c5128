#![warn(missing_docs)]
//! # portfolio-review binary
//!
//! Command-line entry point: run the server, submit a file, or check the
//! configured API key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use portfolio_review_app::client::{
    ConsoleObserver, HttpAnalysisTransport, SessionDriver, SystemClipboard, candidate_from_path,
};
use portfolio_review_app::config::Settings;
use portfolio_review_app::server::{self, AppState};
use portfolio_review_app::{app_version, logging};
use portfolio_review_ui::{ResultPresenter, SessionState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "portfolio-review")]
#[command(version = portfolio_review_app::APP_VERSION)]
#[command(about = "AI design feedback for portfolio images and PDFs")]
struct Cli {
    /// Settings file (TOML); defaults to ./portfolio-review.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload endpoint and feedback view
    Serve,
    /// Upload one file to a running server and print the feedback
    Submit {
        /// JPG, PNG, or PDF file to analyze
        file: PathBuf,
        /// Server base URL (overrides `server_url`)
        #[arg(long)]
        server: Option<String>,
        /// Also save the feedback as a word-processor document
        #[arg(long)]
        download: Option<PathBuf>,
        /// Also copy the feedback text to the clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Send a minimal request to verify the configured API key
    CheckKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing()?;

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    info!(version = app_version(), "portfolio-review starting");

    match cli.command {
        Command::Serve => server::serve(&settings).await?,
        Command::Submit {
            file,
            server,
            download,
            copy,
        } => {
            let server_url = server.unwrap_or_else(|| settings.server_url.clone());
            submit(&file, &server_url, download, copy).await?;
        }
        Command::CheckKey => check_key(&settings).await?,
    }

    Ok(())
}

async fn submit(file: &Path, server_url: &str, download: Option<PathBuf>, copy: bool) -> Result<()> {
    let candidate = candidate_from_path(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let transport = Arc::new(HttpAnalysisTransport::new(server_url)?);
    let mut driver = SessionDriver::new(transport, ConsoleObserver);

    let state = driver.submit(candidate).await?;
    driver.wait_background().await;
    if state != SessionState::Complete {
        bail!("analysis did not complete");
    }

    let presenter = ResultPresenter::new(SystemClipboard);
    if let Some(html) = presenter.render(driver.session()) {
        println!("{html}");
    }
    if let Some(path) = download {
        let artifact = presenter.download(driver.session())?;
        tokio::fs::write(&path, artifact.body)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
        eprintln!("Saved {} ({})", path.display(), artifact.mime_type);
    }
    if copy {
        eprintln!("{}", presenter.copy(driver.session())?);
    }

    presenter.start_new_analysis(driver.session_mut())?;
    Ok(())
}

async fn check_key(settings: &Settings) -> Result<()> {
    let state = AppState::from_settings(settings)?;
    state.gateway().verify_credential().await?;
    println!("API key is valid.");
    Ok(())
}
