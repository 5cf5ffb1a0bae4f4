//! Configuration for the zmon daemon.
//!
//! Two layers live here:
//!
//! - **Settings**: the daemon's own TOML settings (which device
//!   configuration to load, verbosity, an endpoint override), merged from
//!   defaults, the platform config file and `ZMON_*` environment variables.
//! - **Device configuration**: the ZPL file handed to the device actor,
//!   read from disk and validated before anything is started.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use zmon_core::config::ENDPOINT_PATH;
use zmon_core::{ConfigTree, CoreError};

/// Prefix of the environment variables that override settings.
pub const ENV_PREFIX: &str = "ZMON_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid device configuration {}: {source}", path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Daemon settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// ZPL file configuring the device actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_config: Option<PathBuf>,

    /// Put the actor in verbose mode at start-up.
    #[serde(default)]
    pub verbose: bool,

    /// Broker endpoint, overriding `malamute/endpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Settings {
    /// Render as TOML, the format of the settings file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "zmon", "zmon").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("zmon");
            p.push("zmon.toml");
            p
        },
        |dirs| dirs.config_dir().join("zmon.toml"),
    )
}

/// Load settings from the canonical file and the environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from `path` (missing files are skipped) and the
/// environment. Environment variables win.
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;
    debug!(file = %path.display(), ?settings, "settings loaded");
    Ok(settings)
}

// ── Device configuration ────────────────────────────────────────────

/// A parsed ZPL device configuration and where it came from.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub path: PathBuf,
    pub tree: ConfigTree,
}

impl DeviceConfig {
    /// Read and parse the ZPL file at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let tree = ConfigTree::parse(&text).map_err(|source| ConfigError::Device {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, tree })
    }

    /// Apply the settings that override the file's contents.
    pub fn apply(&mut self, settings: &Settings) {
        if let Some(endpoint) = settings.endpoint.as_deref() {
            debug!(endpoint, "broker endpoint overridden by settings");
            self.tree.put(ENDPOINT_PATH, endpoint);
        }
    }

    /// The configuration as ZPL text, ready for a CONFIG command.
    pub fn text(&self) -> String {
        self.tree.to_string()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
