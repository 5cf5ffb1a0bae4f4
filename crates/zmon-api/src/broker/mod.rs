//! In-process message broker with mailbox and stream delivery.
//!
//! A [`Broker`] is bound to an `inproc://` endpoint and routes messages
//! between [`BrokerClient`]s connected to that endpoint:
//!
//! - **Mailbox** delivery sends a message to exactly one client, addressed
//!   by the identity it connected with.
//! - **Stream** delivery broadcasts a message from a producer to every
//!   client whose consumer pattern on that stream matches the subject.
//!
//! Both kinds arrive on the client's single delivery queue, tagged with a
//! [`DeliveryKind`] so the receiver can tell them apart.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use zmon_api::broker::{Broker, BrokerClient};
//!
//! let _broker = Broker::bind("inproc://zmon")?;
//! let mut reader = BrokerClient::connect("inproc://zmon", Duration::from_secs(1), "reader").await?;
//! reader.set_consumer("_DEVICES", ".*")?;
//!
//! let mut writer = BrokerClient::connect("inproc://zmon", Duration::from_secs(1), "writer").await?;
//! writer.set_producer("_DEVICES")?;
//! writer.send("INSERT", payload)?;
//!
//! let delivery = reader.recv().await;
//! ```

mod client;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::Bytes;
use regex::Regex;
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};

pub use client::BrokerClient;

/// The only endpoint scheme the broker understands.
pub const INPROC_SCHEME: &str = "inproc://";

// ── Delivery ─────────────────────────────────────────────────────────

/// How a message reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum DeliveryKind {
    /// Addressed directly to this client by a specific sender.
    #[strum(serialize = "MAILBOX DELIVER")]
    Mailbox,
    /// Broadcast on a stream this client consumes.
    #[strum(serialize = "STREAM DELIVER")]
    Stream,
}

/// A message received from the broker, with its routing metadata.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub kind: DeliveryKind,
    /// Address of the client that sent the message.
    pub sender: String,
    /// Stream name for stream deliveries; the recipient's own address for
    /// mailbox deliveries.
    pub address: String,
    pub subject: String,
    pub payload: Bytes,
}

// ── Broker ───────────────────────────────────────────────────────────

/// Handle to a running in-process broker.
///
/// Cheaply cloneable. The endpoint is released when the last handle is
/// dropped; connected clients then observe a closed delivery queue.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

pub(crate) struct BrokerInner {
    endpoint: String,
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    mailboxes: HashMap<String, Mailbox>,
    streams: HashMap<String, Vec<Subscription>>,
}

struct Mailbox {
    session: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Subscription {
    session: u64,
    pattern: Regex,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Broker {
    /// Bind a new broker to an `inproc://` endpoint.
    pub fn bind(endpoint: &str) -> Result<Self> {
        validate_endpoint(endpoint)?;

        let mut dir = lock(directory());
        if dir.get(endpoint).is_some_and(|weak| weak.strong_count() > 0) {
            return Err(Error::EndpointInUse(endpoint.to_owned()));
        }

        let inner = Arc::new(BrokerInner {
            endpoint: endpoint.to_owned(),
            state: Mutex::new(BrokerState::default()),
        });
        dir.insert(endpoint.to_owned(), Arc::downgrade(&inner));
        debug!(endpoint, "broker bound");

        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Number of clients currently holding a mailbox.
    pub fn client_count(&self) -> usize {
        lock(&self.inner.state).mailboxes.len()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

// ── Routing (used by BrokerClient) ───────────────────────────────────

impl BrokerInner {
    /// Register a mailbox for `address`, taking over any previous session
    /// holding the same address. Returns the new session id.
    fn register(&self, address: &str, tx: mpsc::UnboundedSender<Delivery>) -> u64 {
        let mut state = lock(&self.state);
        state.next_session += 1;
        let session = state.next_session;

        if let Some(old) = state.mailboxes.insert(address.to_owned(), Mailbox { session, tx }) {
            debug!(address, old_session = old.session, "mailbox taken over");
            state.drop_subscriptions(old.session);
        }
        session
    }

    fn unregister(&self, address: &str, session: u64) {
        let mut state = lock(&self.state);
        if state
            .mailboxes
            .get(address)
            .is_some_and(|mailbox| mailbox.session == session)
        {
            state.mailboxes.remove(address);
        }
        state.drop_subscriptions(session);
        debug!(endpoint = %self.endpoint, address, "client disconnected");
    }

    fn subscribe(&self, address: &str, session: u64, stream: &str, pattern: Regex) -> Result<()> {
        let mut state = lock(&self.state);
        let tx = state
            .mailboxes
            .get(address)
            .filter(|mailbox| mailbox.session == session)
            .map(|mailbox| mailbox.tx.clone())
            .ok_or(Error::Disconnected)?;

        state
            .streams
            .entry(stream.to_owned())
            .or_default()
            .push(Subscription {
                session,
                pattern,
                tx,
            });
        Ok(())
    }

    /// Broadcast on `stream`. Every session with at least one matching
    /// pattern receives exactly one copy.
    fn publish(&self, stream: &str, sender: &str, subject: &str, payload: &Bytes) -> usize {
        let state = lock(&self.state);
        let Some(subscriptions) = state.streams.get(stream) else {
            return 0;
        };

        let mut delivered: Vec<u64> = Vec::new();
        for sub in subscriptions {
            if delivered.contains(&sub.session) || !sub.pattern.is_match(subject) {
                continue;
            }
            let delivery = Delivery {
                kind: DeliveryKind::Stream,
                sender: sender.to_owned(),
                address: stream.to_owned(),
                subject: subject.to_owned(),
                payload: payload.clone(),
            };
            if sub.tx.send(delivery).is_ok() {
                delivered.push(sub.session);
            }
        }
        trace!(stream, subject, receivers = delivered.len(), "stream message routed");
        delivered.len()
    }

    fn deliver(&self, sender: &str, address: &str, subject: &str, payload: Bytes) -> Result<()> {
        let state = lock(&self.state);
        let mailbox = state
            .mailboxes
            .get(address)
            .ok_or_else(|| Error::UnknownAddress(address.to_owned()))?;

        mailbox
            .tx
            .send(Delivery {
                kind: DeliveryKind::Mailbox,
                sender: sender.to_owned(),
                address: address.to_owned(),
                subject: subject.to_owned(),
                payload,
            })
            .map_err(|_| Error::UnknownAddress(address.to_owned()))?;
        trace!(sender, address, subject, "mailbox message routed");
        Ok(())
    }
}

impl BrokerState {
    fn drop_subscriptions(&mut self, session: u64) {
        for subs in self.streams.values_mut() {
            subs.retain(|sub| sub.session != session);
        }
        self.streams.retain(|_, subs| !subs.is_empty());
    }
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        let mut dir = lock(directory());
        if dir
            .get(&self.endpoint)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            dir.remove(&self.endpoint);
        }
        debug!(endpoint = %self.endpoint, "broker unbound");
    }
}

// ── Endpoint directory ───────────────────────────────────────────────

type Directory = Mutex<HashMap<String, Weak<BrokerInner>>>;

fn directory() -> &'static Directory {
    static DIRECTORY: OnceLock<Directory> = OnceLock::new();
    DIRECTORY.get_or_init(Directory::default)
}

/// Resolve a bound endpoint to its live broker.
pub(crate) fn lookup(endpoint: &str) -> Option<Arc<BrokerInner>> {
    lock(directory()).get(endpoint).and_then(Weak::upgrade)
}

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<()> {
    match endpoint.strip_prefix(INPROC_SCHEME) {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(Error::InvalidEndpoint(endpoint.to_owned())),
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────
