use thiserror::Error;

/// Top-level error type for the `zmon-api` crate.
///
/// Covers every failure mode of the protocol codec and the broker link.
/// `zmon-core` maps these into actor-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Codec ───────────────────────────────────────────────────────
    /// Payload bytes did not decode into a protocol message.
    #[error("Malformed protocol message: {0}")]
    Decode(#[source] serde_json::Error),

    /// A message could not be serialized.
    #[error("Cannot encode protocol message: {0}")]
    Encode(#[source] serde_json::Error),

    // ── Broker ──────────────────────────────────────────────────────
    /// Endpoint is not an `inproc://` address.
    #[error("Unsupported broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// Another live broker already owns the endpoint.
    #[error("Broker endpoint already bound: {0}")]
    EndpointInUse(String),

    /// No broker appeared at the endpoint within the connect timeout.
    #[error("Cannot reach broker at {endpoint} within {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u128 },

    /// The broker this client was connected to is gone.
    #[error("Broker connection closed")]
    Disconnected,

    /// `send` was called before `set_producer`.
    #[error("No producer stream registered")]
    NoProducer,

    /// Consumer pattern is not a valid regular expression.
    #[error("Invalid consumer pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Mailbox target is not connected to the broker.
    #[error("No client with address '{0}'")]
    UnknownAddress(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
