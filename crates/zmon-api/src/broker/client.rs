// ── Broker client ──
//
// One connection to a broker under a fixed identity. Owns the receiving
// end of the client's delivery queue; sends are synchronous because the
// broker routes in-process.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::{BrokerInner, Delivery, lookup, validate_endpoint};
use crate::error::{Error, Result};

/// How often `connect` re-checks for an endpoint that is not bound yet.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A connection to an in-process broker.
///
/// Dropping the client releases its mailbox and all of its consumer
/// subscriptions.
pub struct BrokerClient {
    broker: Weak<BrokerInner>,
    endpoint: String,
    address: String,
    session: u64,
    producer: Option<String>,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl BrokerClient {
    /// Connect to the broker bound at `endpoint` under identity `address`.
    ///
    /// Waits up to `timeout` for the endpoint to be bound. If another client
    /// already holds `address`, this client takes its mailbox over.
    pub async fn connect(endpoint: &str, timeout: Duration, address: &str) -> Result<Self> {
        validate_endpoint(endpoint)?;

        let deadline = Instant::now() + timeout;
        let broker = loop {
            if let Some(broker) = lookup(endpoint) {
                break broker;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    endpoint: endpoint.to_owned(),
                    timeout_ms: timeout.as_millis(),
                });
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let session = broker.register(address, tx);
        debug!(endpoint, address, session, "connected to broker");

        Ok(Self {
            broker: Arc::downgrade(&broker),
            endpoint: endpoint.to_owned(),
            address: address.to_owned(),
            session,
            producer: None,
            rx,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The identity this client connected with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stream that [`send`](Self::send) publishes on, if any.
    pub fn producer(&self) -> Option<&str> {
        self.producer.as_deref()
    }

    /// Publish subsequent [`send`](Self::send) calls on `stream`.
    pub fn set_producer(&mut self, stream: &str) -> Result<()> {
        self.broker()?;
        self.producer = Some(stream.to_owned());
        debug!(address = %self.address, stream, "producer registered");
        Ok(())
    }

    /// Receive stream messages on `stream` whose subject matches `pattern`
    /// (a regular expression).
    pub fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        self.broker()?
            .subscribe(&self.address, self.session, stream, regex)?;
        debug!(address = %self.address, stream, pattern, "consumer registered");
        Ok(())
    }

    /// Broadcast on the producer stream. Returns how many clients received
    /// the message.
    pub fn send(&self, subject: &str, payload: Bytes) -> Result<usize> {
        let stream = self.producer.as_deref().ok_or(Error::NoProducer)?;
        Ok(self
            .broker()?
            .publish(stream, &self.address, subject, &payload))
    }

    /// Send directly to the client connected as `address`.
    pub fn send_to(&self, address: &str, subject: &str, payload: Bytes) -> Result<()> {
        self.broker()?
            .deliver(&self.address, address, subject, payload)
    }

    /// Wait for the next delivery. Returns `None` once the broker is gone
    /// or another client has taken this address over.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    fn broker(&self) -> Result<Arc<BrokerInner>> {
        self.broker.upgrade().ok_or(Error::Disconnected)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.unregister(&self.address, self.session);
        }
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("endpoint", &self.endpoint)
            .field("address", &self.address)
            .field("session", &self.session)
            .field("producer", &self.producer)
            .finish_non_exhaustive()
    }
}
