//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use zmon_config::ConfigError;
use zmon_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("No device configuration given")]
    #[diagnostic(
        code(zmon::no_device_config),
        help(
            "Pass --config <file>, set device_config in {path},\n\
             or export ZMON_DEVICE_CONFIG."
        )
    )]
    NoDeviceConfig { path: String },

    #[error("Cannot read device configuration {path}")]
    #[diagnostic(code(zmon::unreadable_config))]
    UnreadableConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device configuration {path}")]
    #[diagnostic(
        code(zmon::invalid_config),
        help(
            "{reason}\n\
             Entries are `name` or `name = value`, nested with four spaces."
        )
    )]
    InvalidConfig { path: String, reason: String },

    #[error("{key} is not set in {path}")]
    #[diagnostic(
        code(zmon::missing_setting),
        help("The device actor needs malamute/endpoint and malamute/address.")
    )]
    MissingSetting { key: String, path: String },

    #[error("Cannot start the device actor: {reason}")]
    #[diagnostic(code(zmon::actor_config))]
    ActorConfig { reason: String },

    #[error(transparent)]
    #[diagnostic(code(zmon::settings))]
    Settings(Box<figment::Error>),

    // ── Broker ───────────────────────────────────────────────────────
    #[error("Cannot bind broker at {endpoint}")]
    #[diagnostic(
        code(zmon::bind_failed),
        help("Endpoints look like inproc://<name>.")
    )]
    BindFailed {
        endpoint: String,
        #[source]
        source: zmon_api::Error,
    },

    #[error("Could not connect to broker at {endpoint}")]
    #[diagnostic(code(zmon::connection_failed), help("{reason}"))]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Broker link setup failed: {reason}")]
    #[diagnostic(code(zmon::link_setup))]
    LinkSetup { reason: String },

    // ── Actor ────────────────────────────────────────────────────────
    #[error("Device actor error: {message}")]
    #[diagnostic(code(zmon::actor))]
    Actor { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(zmon::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoDeviceConfig { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingSetting { .. }
            | Self::ActorConfig { .. }
            | Self::Settings(_) => exit_code::USAGE,
            Self::UnreadableConfig { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                exit_code::NOT_FOUND
            }
            Self::BindFailed { .. } | Self::ConnectionFailed { .. } | Self::LinkSetup { .. } => {
                exit_code::CONNECTION
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── Error mapping ────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => CliError::UnreadableConfig {
                path: path.display().to_string(),
                source,
            },
            ConfigError::Device { path, source } => CliError::InvalidConfig {
                path: path.display().to_string(),
                reason: source.to_string(),
            },
            ConfigError::Figment(err) => CliError::Settings(err),
            ConfigError::Serialization(err) => CliError::Actor {
                message: err.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { endpoint, reason } => {
                CliError::ConnectionFailed { endpoint, reason }
            }
            err if err.is_connectivity() => CliError::LinkSetup {
                reason: err.to_string(),
            },
            err if err.is_config() => CliError::ActorConfig {
                reason: err.to_string(),
            },
            err => CliError::Actor {
                message: err.to_string(),
            },
        }
    }
}
