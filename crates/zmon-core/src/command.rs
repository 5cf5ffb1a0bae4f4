// ── Command API ──
//
// Control commands drive the actor's lifecycle; mailbox subjects select
// the request handled for a direct broker message. Both are closed sets:
// anything else is surfaced as an explicit error value.

use strum::{AsRefStr, Display, EnumString};

use crate::error::CoreError;

/// A command envelope sent through the control channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct ControlEnvelope {
    pub command: ControlCommand,
    pub response_tx: tokio::sync::oneshot::Sender<Result<(), CoreError>>,
}

/// Lifecycle commands accepted on the actor's control channel.
#[derive(Debug, Clone, PartialEq, Eq, Display, AsRefStr)]
pub enum ControlCommand {
    /// Replace the configuration with the given ZPL text.
    #[strum(serialize = "CONFIG")]
    Config(String),
    /// Connect to the broker and register producer/consumers.
    #[strum(serialize = "START")]
    Start,
    /// Disconnect from the broker and flush the registry.
    #[strum(serialize = "STOP")]
    Stop,
    /// Enable verbose diagnostics.
    #[strum(serialize = "VERBOSE")]
    Verbose,
    /// Leave the control loop.
    #[strum(serialize = "TERMINATE")]
    Terminate,
}

impl ControlCommand {
    /// Build a command from string frames: a command token followed by its
    /// arguments, e.g. `["CONFIG", "<zpl text>"]`.
    ///
    /// `$TERM` is accepted as an alias of `TERMINATE`.
    pub fn from_frames<S: AsRef<str>>(frames: &[S]) -> Result<Self, CoreError> {
        let Some(token) = frames.first().map(AsRef::as_ref) else {
            return Err(CoreError::UnknownCommand(String::new()));
        };

        match token {
            "CONFIG" => frames
                .get(1)
                .map(|text| Self::Config(text.as_ref().to_owned()))
                .ok_or_else(|| CoreError::MissingArgument {
                    command: token.to_owned(),
                }),
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "VERBOSE" => Ok(Self::Verbose),
            "TERMINATE" | "$TERM" => Ok(Self::Terminate),
            other => Err(CoreError::UnknownCommand(other.to_owned())),
        }
    }
}

/// Requests the actor answers on its broker mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum MailboxSubject {
    /// Add or update a device and announce it on the producer stream.
    #[strum(serialize = "INSERT")]
    Insert,
    /// Forget a device and announce it on the producer stream.
    #[strum(serialize = "DELETE")]
    Delete,
    /// Return one device by name.
    #[strum(serialize = "LOOKUP")]
    Lookup,
    /// Stream every device back to the requester.
    #[strum(serialize = "GET-ALL")]
    GetAll,
    /// Broadcast every device on the producer stream.
    #[strum(serialize = "PUBLISH-ALL")]
    PublishAll,
}
