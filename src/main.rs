//! Snapwatch
//!
//! Launches a browser, watches its tabs and saves matching pages once they are
//! ready.

use anyhow::Context;
use clap::Parser;
use snapwatch::host::{BrowserConfig, ChromiumHost, FileSink, TracingNotifier};
use snapwatch::metrics::global_metrics;
use snapwatch::{CaptureOrchestrator, Dispatcher, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Snapwatch page capture daemon
#[derive(Parser, Debug)]
#[command(name = "snapwatch")]
#[command(version)]
#[command(about = "Capture dynamically-rendered pages as you browse")]
struct Args {
    /// Settings file (JSON)
    #[arg(short, long, default_value = "snapwatch.json")]
    settings: PathBuf,

    /// Write the default settings to the settings file and exit
    #[arg(long)]
    init_settings: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to Chrome/Chromium executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Run the browser headless
    #[arg(long)]
    headless: bool,

    /// Disable the Chrome sandbox
    #[arg(long)]
    no_sandbox: bool,

    /// URLs to open at startup
    #[arg(long = "open", value_name = "URL")]
    open: Vec<String>,
}

/// `--verbose` wins, then `RUST_LOG`, then info
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("snapwatch=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.verbose))
        .init();

    if args.init_settings {
        Settings::default()
            .save(&args.settings)
            .with_context(|| format!("writing {}", args.settings.display()))?;
        tracing::info!("Wrote default settings to {}", args.settings.display());
        return Ok(());
    }

    let settings = Settings::load(&args.settings)
        .with_context(|| format!("loading {}", args.settings.display()))?;

    let mut config = BrowserConfig::builder()
        .headless(args.headless)
        .sandbox(!args.no_sandbox);
    if let Some(path) = args.chrome_path {
        config = config.chrome_path(path);
    }

    let (host, events) = ChromiumHost::launch(config.build()).await?;
    let host = Arc::new(host);

    let (bus, _) = broadcast::channel(256);
    let notifier = Arc::new(TracingNotifier);
    let orchestrator =
        CaptureOrchestrator::new(host.clone(), notifier.clone(), Arc::new(FileSink), bus);
    let dispatcher = Dispatcher::new(host.clone(), notifier, orchestrator, &settings)?;

    for url in &args.open {
        host.open_tab(url).await?;
    }

    tracing::info!(
        save_folder = %settings.save_folder,
        "Snapwatch running; press Ctrl-C to stop"
    );

    tokio::select! {
        _ = dispatcher.run(events) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    tracing::info!("Final counters:\n{}", global_metrics().to_prometheus_format());

    drop(dispatcher);
    match Arc::try_unwrap(host) {
        Ok(host) => host.close().await?,
        Err(_) => tracing::warn!("Browser still in use, leaving it to exit with the process"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_enables_debug() {
        assert!(log_filter(true).to_string().contains("snapwatch=debug"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["snapwatch", "-v", "--open", "https://a.example.com/x"]);
        assert!(args.verbose);
        assert_eq!(args.open, vec!["https://a.example.com/x"]);
        assert_eq!(args.settings, PathBuf::from("snapwatch.json"));
    }
}
