//! User settings
//!
//! Settings are a flat JSON object whose keys match the options page of the
//! capture workflow (`downloadUrlPattern`, `saveFolder`, ...). Missing keys
//! fall back to defaults; both URL patterns are validated as regexes before
//! the settings are used or saved.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Persisted, user-editable settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Tabs whose URL matches trigger a capture
    pub download_url_pattern: String,
    /// Tabs whose URL matches trigger link fan-out (empty = disabled)
    pub open_url_pattern: String,
    /// Folder prefix for persisted snapshots
    pub save_folder: String,
    /// Filename template
    pub filename_pattern: String,
    /// Seconds to wait after navigation before capturing
    pub delay: u64,
    /// Skip the readiness probe entirely
    pub disable_reference_expansion: bool,
    /// Close the source tab once the snapshot is saved
    pub close_tab_after_save: bool,
    /// Discovered links containing this substring are never opened (empty = none)
    pub open_url_denylist: String,
    /// Ceiling on how long a capture waits behind a verification page (0 = no ceiling)
    pub verification_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_url_pattern: r".*\.example\.com/.*".to_string(),
            open_url_pattern: String::new(),
            save_folder: "saved_pages".to_string(),
            filename_pattern: "{hostname}_{pathname}".to_string(),
            delay: 3,
            disable_reference_expansion: false,
            close_tab_after_save: true,
            open_url_denylist: "#".to_string(),
            verification_timeout_secs: 600,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; a missing file yields defaults
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        debug!(?settings, "Loaded settings");
        Ok(settings)
    }

    /// Validate and write settings as pretty JSON
    #[instrument(skip(self))]
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved settings");
        Ok(())
    }

    /// Check that both URL patterns compile
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }

    /// Build the matchers used by the dispatcher
    pub fn compile(&self) -> Result<CompiledSettings> {
        let download = Regex::new(&self.download_url_pattern).map_err(|e| {
            Error::Config(format!("downloadUrlPattern: {}", e))
        })?;
        let open = if self.open_url_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(&self.open_url_pattern)
                    .map_err(|e| Error::Config(format!("openUrlPattern: {}", e)))?,
            )
        };

        Ok(CompiledSettings {
            download,
            open,
            settings: self.clone(),
        })
    }

    /// Pre-capture delay
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    /// Verification wait ceiling
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }
}

/// Settings with their URL patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledSettings {
    download: Regex,
    open: Option<Regex>,
    settings: Settings,
}

impl CompiledSettings {
    /// Whether a URL should be captured
    pub fn should_capture(&self, url: &str) -> bool {
        self.download.is_match(url)
    }

    /// Link pattern, when fan-out is enabled and `url` triggers it
    pub fn fan_out_pattern(&self, url: &str) -> Option<&Regex> {
        self.open.as_ref().filter(|re| re.is_match(url))
    }

    /// The raw settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.save_folder, "saved_pages");
        assert_eq!(settings.filename_pattern, "{hostname}_{pathname}");
        assert_eq!(settings.delay, 3);
        assert!(!settings.disable_reference_expansion);
        assert!(settings.close_tab_after_save);
        assert_eq!(settings.verification_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_camel_case_keys_and_partial_json() {
        let json = r#"{ "downloadUrlPattern": "news\\.site/.*", "disableReferenceExpansion": true }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.download_url_pattern, r"news\.site/.*");
        assert!(settings.disable_reference_expansion);
        assert_eq!(settings.save_folder, "saved_pages");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let settings = Settings {
            open_url_pattern: "([".to_string(),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("openUrlPattern"));
    }

    #[test]
    fn test_compiled_matching() {
        let settings = Settings {
            open_url_pattern: r"/toc$".to_string(),
            ..Default::default()
        };
        let compiled = settings.compile().unwrap();
        assert!(compiled.should_capture("https://www.example.com/article"));
        assert!(!compiled.should_capture("https://other.org/"));
        assert!(compiled.fan_out_pattern("https://x.org/toc").is_some());
        assert!(compiled.fan_out_pattern("https://x.org/other").is_none());
    }

    #[test]
    fn test_empty_open_pattern_disables_fan_out() {
        let compiled = Settings::default().compile().unwrap();
        assert!(compiled.fan_out_pattern("https://anything").is_none());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/settings.json");
        let settings = Settings {
            delay: 0,
            save_folder: "/tmp/pages".to_string(),
            ..Default::default()
        };

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }
}
