// ── Mailbox request handling ──
//
// Requests addressed to the actor's mailbox are dispatched on their
// subject. Single-reply requests answer the sender under `LOOKUP`; the bulk
// requests stream one message per device, each stamped with its position
// (`_seq`) and the batch size (`_cnt`).

use tracing::{debug, warn};
use zmon_api::{BrokerClient, Device, ProtoMessage};

use crate::command::MailboxSubject;
use crate::error::CoreError;
use crate::registry::DeviceRegistry;

/// Subject of every direct reply, whatever the request subject was.
pub const REPLY_SUBJECT: &str = "LOOKUP";
/// Extension key holding a record's 0-based position in a batch.
pub const SEQ_KEY: &str = "_seq";
/// Extension key holding the number of records in a batch.
pub const CNT_KEY: &str = "_cnt";

/// Request payload is not what the subject requires.
pub const BAD_REQUEST: u16 = 400;
/// Subject is not one the actor serves.
pub const SUBJECT_NOT_FOUND: u16 = 403;
/// Requested device (or any device) does not exist.
pub const NOT_FOUND: u16 = 404;

/// Outgoing side of the broker link, as seen by the request handlers.
pub trait Outbox {
    /// Broadcast on the producer stream.
    fn publish(&mut self, subject: &str, message: &ProtoMessage) -> Result<(), CoreError>;

    /// Send directly to the client connected as `address`.
    fn reply(&mut self, address: &str, subject: &str, message: &ProtoMessage)
    -> Result<(), CoreError>;
}

impl Outbox for BrokerClient {
    fn publish(&mut self, subject: &str, message: &ProtoMessage) -> Result<(), CoreError> {
        let receivers = self.send(subject, message.encode()?)?;
        debug!(subject, receivers, "broadcast sent");
        Ok(())
    }

    fn reply(
        &mut self,
        address: &str,
        subject: &str,
        message: &ProtoMessage,
    ) -> Result<(), CoreError> {
        self.send_to(address, subject, message.encode()?)?;
        Ok(())
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

/// Serve one mailbox request from `sender`.
///
/// Handlers never fail: protocol problems become ERROR replies and send
/// failures are logged.
pub fn handle_mailbox<O: Outbox + ?Sized>(
    registry: &mut DeviceRegistry,
    outbox: &mut O,
    sender: &str,
    subject: &str,
    message: &ProtoMessage,
) {
    let reply = match subject.parse::<MailboxSubject>() {
        Ok(MailboxSubject::Insert) => Some(insert(registry, outbox, message)),
        Ok(MailboxSubject::Delete) => Some(delete(registry, outbox, message)),
        Ok(MailboxSubject::Lookup) => Some(lookup(registry, message)),
        Ok(MailboxSubject::GetAll) => get_all(registry, outbox, sender),
        Ok(MailboxSubject::PublishAll) => publish_all(registry, outbox),
        Err(_) => {
            debug!(sender, subject, "unknown mailbox subject");
            Some(ProtoMessage::error(SUBJECT_NOT_FOUND, "Subject not found"))
        }
    };

    let Some(reply) = reply else {
        return;
    };
    if let Err(e) = outbox.reply(sender, REPLY_SUBJECT, &reply) {
        warn!(sender, subject, error = %e, "cannot deliver reply");
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

fn insert<O: Outbox + ?Sized>(
    registry: &mut DeviceRegistry,
    outbox: &mut O,
    message: &ProtoMessage,
) -> ProtoMessage {
    let Some(device) = message.as_device() else {
        return ProtoMessage::error(BAD_REQUEST, "INSERT requires a device record");
    };

    registry.insert(device.clone());
    debug!(device = %device.name, devices = registry.len(), "device inserted");
    broadcast(outbox, MailboxSubject::Insert, message);
    ProtoMessage::ok()
}

fn delete<O: Outbox + ?Sized>(
    registry: &mut DeviceRegistry,
    outbox: &mut O,
    message: &ProtoMessage,
) -> ProtoMessage {
    let Some(name) = message.device_name() else {
        return ProtoMessage::error(BAD_REQUEST, "DELETE requires a device record");
    };

    if registry.remove(name).is_some() {
        debug!(device = name, devices = registry.len(), "device deleted");
    }
    broadcast(outbox, MailboxSubject::Delete, message);
    ProtoMessage::ok()
}

fn lookup(registry: &DeviceRegistry, message: &ProtoMessage) -> ProtoMessage {
    message
        .device_name()
        .and_then(|name| registry.get(name))
        .map_or_else(
            || ProtoMessage::error(NOT_FOUND, "Requested device does not exist"),
            |device| ProtoMessage::Device(device.clone()),
        )
}

/// Stream every device back to `sender`. Only an empty registry yields a
/// final reply.
fn get_all<O: Outbox + ?Sized>(
    registry: &DeviceRegistry,
    outbox: &mut O,
    sender: &str,
) -> Option<ProtoMessage> {
    if registry.is_empty() {
        return Some(no_devices());
    }

    for message in batch(registry) {
        if let Err(e) = outbox.reply(sender, REPLY_SUBJECT, &message) {
            warn!(sender, error = %e, "GET-ALL aborted");
            break;
        }
    }
    None
}

/// Broadcast every device on the producer stream.
fn publish_all<O: Outbox + ?Sized>(
    registry: &DeviceRegistry,
    outbox: &mut O,
) -> Option<ProtoMessage> {
    if registry.is_empty() {
        return Some(no_devices());
    }

    let subject = MailboxSubject::PublishAll.as_ref();
    for message in batch(registry) {
        if let Err(e) = outbox.publish(subject, &message) {
            warn!(error = %e, "PUBLISH-ALL aborted");
            break;
        }
    }
    None
}

// ── Helpers ──────────────────────────────────────────────────────────

fn broadcast<O: Outbox + ?Sized>(outbox: &mut O, subject: MailboxSubject, message: &ProtoMessage) {
    if let Err(e) = outbox.publish(subject.as_ref(), message) {
        warn!(subject = %subject, error = %e, "cannot broadcast device change");
    }
}

fn no_devices() -> ProtoMessage {
    ProtoMessage::error(NOT_FOUND, "No devices")
}

/// Copies of every device in registry order, stamped with batch metadata.
fn batch(registry: &DeviceRegistry) -> impl Iterator<Item = ProtoMessage> + '_ {
    let count = registry.len().to_string();
    registry.iter().enumerate().map(move |(seq, device)| {
        let mut copy: Device = device.clone();
        copy.ext_set(SEQ_KEY, seq.to_string());
        copy.ext_set(CNT_KEY, count.clone());
        ProtoMessage::Device(copy)
    })
}

// ── Tests ────────────────────────────────────────────────────────────
