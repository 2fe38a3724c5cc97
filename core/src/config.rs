//! Anchor engine configuration loading
//!
//! Loads configuration from `~/.config/pcf-anchor/config.toml` (or the
//! `PCF_ANCHOR_CONFIG` env var). Every field has a default, so a missing file
//! or an empty one yields a working configuration.
//!
//! Intervals are seconds as floats. Zero is legal and means "every tick".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::binding::DEFAULT_BINDING_RADIUS;
use crate::error::{AnchorError, Result};

/// Root configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PcfConfig {
    /// Frame registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Defaults applied to every anchor
    #[serde(default)]
    pub anchor: AnchorConfig,

    /// Binding library storage
    #[serde(default)]
    pub store: StoreConfig,
}

/// Frame registry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Seconds between full frame-set polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f32,

    /// Buffered discovery events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_poll_interval_secs() -> f32 {
    2.0
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        secs_to_duration(self.poll_interval_secs, default_poll_interval_secs())
    }
}

/// Per-anchor configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AnchorConfig {
    /// Frames farther than this from the anchor are not bound
    #[serde(default = "default_binding_radius")]
    pub binding_radius: f32,

    /// Seconds between automatic bind-and-save attempts
    #[serde(default = "default_auto_bind_interval_secs")]
    pub auto_bind_interval_secs: f32,

    /// Seconds between restore attempts while waiting for a stored frame
    #[serde(default = "default_restore_retry_interval_secs")]
    pub restore_retry_interval_secs: f32,

    /// Re-parent the anchor under the resolved frame's proxy node
    #[serde(default)]
    pub parent_to_frame: bool,
}

fn default_binding_radius() -> f32 {
    DEFAULT_BINDING_RADIUS
}

fn default_auto_bind_interval_secs() -> f32 {
    2.0
}

fn default_restore_retry_interval_secs() -> f32 {
    1.0
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            binding_radius: default_binding_radius(),
            auto_bind_interval_secs: default_auto_bind_interval_secs(),
            restore_retry_interval_secs: default_restore_retry_interval_secs(),
            parent_to_frame: false,
        }
    }
}

impl AnchorConfig {
    pub fn auto_bind_interval(&self) -> Duration {
        secs_to_duration(
            self.auto_bind_interval_secs,
            default_auto_bind_interval_secs(),
        )
    }

    pub fn restore_retry_interval(&self) -> Duration {
        secs_to_duration(
            self.restore_retry_interval_secs,
            default_restore_retry_interval_secs(),
        )
    }
}

/// Binding library storage configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct StoreConfig {
    /// Directory for stored bindings (default: `$XDG_DATA_HOME/pcf-anchor/bindings`)
    #[serde(default)]
    pub dir: Option<String>,
}

impl StoreConfig {
    /// Get the resolved store directory (expanding ~ if needed)
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        match &self.dir {
            Some(path) => {
                if let Some(stripped) = path.strip_prefix("~/")
                    && let Some(home) = dirs::home_dir()
                {
                    return Some(home.join(stripped));
                }
                Some(PathBuf::from(path))
            }
            None => dirs::data_dir().map(|d| d.join("pcf-anchor").join("bindings")),
        }
    }
}

fn secs_to_duration(secs: f32, fallback: f32) -> Duration {
    Duration::try_from_secs_f32(secs)
        .or_else(|_| Duration::try_from_secs_f32(fallback))
        .unwrap_or_default()
}

impl PcfConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "PCF_ANCHOR_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load configuration
    ///
    /// Resolution order:
    /// 1. `PCF_ANCHOR_CONFIG` environment variable
    /// 2. `~/.config/pcf-anchor/config.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "pcf-anchor config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AnchorError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: PcfConfig = toml::from_str(contents)
            .map_err(|e| AnchorError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|d| d.join("pcf-anchor").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("registry.poll_interval_secs", self.registry.poll_interval_secs),
            ("anchor.auto_bind_interval_secs", self.anchor.auto_bind_interval_secs),
            (
                "anchor.restore_retry_interval_secs",
                self.anchor.restore_retry_interval_secs,
            ),
        ];

        for (name, value) in intervals {
            if !value.is_finite() || value < 0.0 {
                return Err(AnchorError::config(format!(
                    "{name} must be a finite, non-negative number of seconds (got {value})"
                )));
            }
            if value == 0.0 {
                tracing::warn!(setting = name, "interval is 0; the task will run every tick");
            }
        }

        if !self.anchor.binding_radius.is_finite() || self.anchor.binding_radius <= 0.0 {
            return Err(AnchorError::config(format!(
                "anchor.binding_radius must be positive (got {})",
                self.anchor.binding_radius
            )));
        }

        if self.registry.event_capacity == 0 {
            return Err(AnchorError::config("registry.event_capacity must be at least 1"));
        }

        Ok(())
    }
}
