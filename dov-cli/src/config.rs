//! Configuration for the `dov` binary.

use std::path::Path;

use dov_core::{
    AnalyzerConfig, DetectorConfig, DovError, Layout, LayoutConfig, ReceiverConfig, SenderConfig,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DovConfig {
    /// Frame geometry. Sender and receiver must agree on it.
    pub layout: LayoutConfig,
    /// Corner-marker search.
    pub detector: DetectorConfig,
    /// Payload retry tuning.
    pub analyzer: AnalyzerConfig,
    /// Frame pacing.
    pub sender: SenderConfig,
    /// Timeouts, queueing and output directory.
    pub receiver: ReceiverConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Overridden by `RUST_LOG` when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DovConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The default configuration as TOML, for `--gen-config`.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Validate the `[layout]` section.
    pub fn layout(&self) -> Result<Layout, DovError> {
        Layout::new(&self.layout)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = DovConfig::default_toml().unwrap();
        assert!(text.contains("[layout]"));
        assert!(text.contains("block_size"));
        assert!(text.contains("connection_timeout_ms"));
        assert!(text.contains("target_fps"));
    }

    #[test]
    fn roundtrip_config() {
        let text = DovConfig::default_toml().unwrap();
        let parsed = DovConfig::parse(&text).unwrap();
        assert_eq!(parsed.layout, LayoutConfig::default());
        assert_eq!(parsed.sender, SenderConfig::default());
        assert_eq!(parsed.receiver, ReceiverConfig::default());
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed = DovConfig::parse(
            "[layout]\nframe_width = 1280\nframe_height = 720\n\n[sender]\ntarget_fps = 10\n",
        )
        .unwrap();
        assert_eq!(parsed.layout.frame_width, 1280);
        assert_eq!(parsed.layout.block_size, LayoutConfig::default().block_size);
        assert_eq!(parsed.sender.target_fps, 10);
        assert_eq!(parsed.sender.start_repeat, SenderConfig::default().start_repeat);
        assert!(parsed.layout().is_ok());
    }

    #[test]
    fn invalid_layout_is_rejected() {
        let mut config = DovConfig::default();
        config.layout.block_size = 0;
        assert!(matches!(config.layout(), Err(DovError::InvalidLayout(_))));
    }

    #[test]
    fn missing_or_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DovConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(missing.layout, LayoutConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "layout = [not toml").unwrap();
        let loaded = DovConfig::load(&broken);
        assert_eq!(loaded.receiver, ReceiverConfig::default());
    }
}
