//! Snapwatch - Automated Capture of Dynamically-Rendered Pages
//!
//! Snapwatch watches browser navigation over CDP, matches tab URLs against
//! configured patterns, waits until a page is worth capturing and saves a
//! full-document HTML snapshot.
//!
//! # Features
//!
//! - **Capture workflow**: per-tab delay, verification gate, readiness probe,
//!   extraction and persistence
//! - **Verification gate**: holds a capture while a human-verification page is shown
//! - **Readiness probe**: expands a collapsed references section before capture
//! - **Link fan-out**: opens matching links from a page in background tabs
//! - **Focus guard**: keeps the user's tab in front while background tabs open
//!
//! # Architecture
//!
//! ```text
//! Browser (CDP) ──▶ ChromiumHost ──TabEvent──▶ Dispatcher
//!                                                 │
//!                  ┌──────────────────────────────┼──────────────────┐
//!                  ▼                              ▼                  ▼
//!          CaptureOrchestrator               LinkFanOut          FocusGuard
//!        gate ─▶ probe ─▶ snapshot
//!                  │
//!                  ▼
//!        {saveFolder}/{filename}.html
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use snapwatch::host::{BrowserConfig, ChromiumHost, FileSink, TracingNotifier};
//! use snapwatch::{CaptureOrchestrator, Dispatcher, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (host, events) = ChromiumHost::launch(BrowserConfig::default()).await?;
//!     let host = Arc::new(host);
//!     let (bus, _) = tokio::sync::broadcast::channel(256);
//!
//!     let orchestrator = CaptureOrchestrator::new(
//!         host.clone(),
//!         Arc::new(TracingNotifier),
//!         Arc::new(FileSink),
//!         bus,
//!     );
//!     let dispatcher = Dispatcher::new(
//!         host,
//!         Arc::new(TracingNotifier),
//!         orchestrator,
//!         &Settings::default(),
//!     )?;
//!
//!     dispatcher.run(events).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod filename;
pub mod focus;
pub mod host;
pub mod metrics;
pub mod orchestrator;
pub mod readiness;
pub mod verification;

// Re-exports for convenience
pub use classifier::{PageStateClassifier, PhraseClassifier};
pub use config::Settings;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use fanout::LinkFanOut;
pub use focus::FocusGuard;
pub use orchestrator::{CaptureOrchestrator, CaptureOutcome, CaptureRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
