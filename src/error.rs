//! Error types for Snapwatch
//!
//! Every workflow failure funnels into [`Error`]. Bounded-retry exhaustion
//! (the readiness probe giving up) is an outcome, not an error, and lives in
//! [`crate::readiness::ProbeOutcome`].

use crate::host::TabId;
use thiserror::Error;

/// The main error type for Snapwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// The URL could not be parsed as an absolute URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The verification gate never cleared within its wait ceiling
    #[error("Verification did not clear on tab {tab} after {waited_secs}s")]
    VerificationStuck {
        /// Tab that stayed behind the interstitial
        tab: TabId,
        /// How long the gate waited
        waited_secs: u64,
    },

    /// Reading page state or the document snapshot failed
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Writing the snapshot failed
    #[error("Persistence failed for {path}: {source}")]
    Persistence {
        /// Target path of the snapshot
        path: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The tab a workflow targets no longer exists
    #[error("Tab {0} was closed")]
    TabClosed(TabId),

    /// Invalid settings
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Browser lifecycle errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Browser lifecycle and control errors
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Failed to launch browser
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Browser configuration error
    #[error("Invalid browser configuration: {0}")]
    ConfigError(String),

    /// Failed to create new page/tab
    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),
}

/// Result type alias for Snapwatch operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Create an extraction error from a string
    pub fn extraction<S: Into<String>>(msg: S) -> Self {
        Error::Extraction(msg.into())
    }

    /// Whether this error means the target tab is gone
    pub fn is_tab_closed(&self) -> bool {
        matches!(self, Error::TabClosed(_))
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Browser(BrowserError::LaunchFailed("no chrome".to_string()));
        assert!(err.to_string().contains("Failed to launch browser"));
        assert!(err.to_string().contains("no chrome"));
    }

    #[test]
    fn test_invalid_url_error() {
        let err = Error::InvalidUrl("not a url".to_string());
        assert_eq!(err.to_string(), "Invalid URL: not a url");
    }

    #[test]
    fn test_verification_stuck_error() {
        let err = Error::VerificationStuck {
            tab: TabId::new("t1"),
            waited_secs: 600,
        };
        assert!(err.to_string().contains("t1"));
        assert!(err.to_string().contains("600s"));
    }

    #[test]
    fn test_persistence_error_keeps_path() {
        let err = Error::Persistence {
            path: "saved_pages/a.html".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("saved_pages/a.html"));
    }

    #[test]
    fn test_tab_closed() {
        let err = Error::TabClosed(TabId::new("gone"));
        assert!(err.is_tab_closed());
        assert!(!Error::extraction("x").is_tab_closed());
    }

    #[test]
    fn test_regex_error_is_config() {
        let err: Error = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
