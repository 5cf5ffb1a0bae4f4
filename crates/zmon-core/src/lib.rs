//! Device registry actor for zmon.
//!
//! A [`DeviceActor`] keeps the set of known monitored devices and serves it
//! over a broker link:
//!
//! - **Control** ([`ControlCommand`]): `CONFIG`, `START`, `STOP`, `VERBOSE`
//!   and `TERMINATE` arrive on an `mpsc` channel, each with a reply channel
//!   so the caller sees the outcome.
//!
//! - **Configuration** ([`ConfigTree`]): a ZPL text blob naming the broker
//!   endpoint, the actor's mailbox address, its producer stream, its
//!   consumer subscriptions and the registry's backing file.
//!
//! - **Mailbox requests** ([`MailboxSubject`]): `INSERT`, `DELETE`,
//!   `LOOKUP`, `GET-ALL` and `PUBLISH-ALL`, answered through the
//!   [`mailbox::Outbox`] seam.
//!
//! - **Registry** ([`DeviceRegistry`]): insertion-ordered devices keyed by
//!   name, persisted as JSON.

pub mod actor;
pub mod command;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod registry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use actor::{CONNECT_TIMEOUT, DeviceActor};
pub use command::{ControlCommand, MailboxSubject};
pub use config::{ConfigNode, ConfigTree, Consumer};
pub use error::CoreError;
pub use registry::DeviceRegistry;
