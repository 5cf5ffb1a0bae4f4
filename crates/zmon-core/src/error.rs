// ── Core error types ──
//
// Errors surfaced by the device actor to whoever drives its control
// channel. Broker-level failures from `zmon_api` are folded into
// connectivity variants that name the endpoint or stream involved.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Cannot parse configuration at line {line}: {reason}")]
    ConfigParse { line: usize, reason: String },

    // ── Connectivity errors ──────────────────────────────────────────
    #[error("Cannot connect to broker at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Cannot set up producer on stream {stream}: {reason}")]
    ProducerFailed { stream: String, reason: String },

    #[error("Cannot set up consumer {stream}/{pattern}: {reason}")]
    ConsumerFailed {
        stream: String,
        pattern: String,
        reason: String,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] zmon_api::Error),

    // ── Control errors ───────────────────────────────────────────────
    #[error("Unknown control command '{0}'")]
    UnknownCommand(String),

    #[error("Control command {command} requires an argument")]
    MissingArgument { command: String },

    #[error("Device actor is not running")]
    ActorStopped,

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Cannot access device file {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed device file {}: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for errors caused by missing or invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::ConfigParse { .. })
    }

    /// Returns `true` for broker connectivity failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ProducerFailed { .. }
                | Self::ConsumerFailed { .. }
                | Self::Broker(_)
        )
    }
}
