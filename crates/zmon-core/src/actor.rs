// ── Device actor ──
//
// One task owns the configuration, the broker link and the device
// registry. It waits on two sources at once: the control channel, which
// carries lifecycle commands with a reply channel each, and the broker
// link, which carries mailbox requests and stream messages. Without a
// link only the control channel is watched.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zmon_api::{BrokerClient, Delivery, DeliveryKind, MessageKind, ProtoMessage};

use crate::command::{ControlCommand, ControlEnvelope};
use crate::config::{ADDRESS_PATH, ConfigTree, Consumer, ENDPOINT_PATH};
use crate::error::CoreError;
use crate::mailbox::handle_mailbox;
use crate::registry::DeviceRegistry;

/// How long START waits for the broker endpoint.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CONTROL_CHANNEL_SIZE: usize = 64;

// ── DeviceActor ──────────────────────────────────────────────────────

/// Handle to a running device actor.
///
/// Dropping the handle closes the control channel, which stops the actor
/// as if it had been sent TERMINATE.
#[derive(Debug)]
pub struct DeviceActor {
    control_tx: mpsc::Sender<ControlEnvelope>,
    task: JoinHandle<()>,
}

impl DeviceActor {
    /// Spawn an unconfigured actor on the current tokio runtime.
    pub fn spawn() -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let task = tokio::spawn(run(control_rx));
        Self { control_tx, task }
    }

    // ── Command execution ────────────────────────────────────────────

    /// Send a command and wait for its result.
    pub async fn execute(&self, command: ControlCommand) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();

        self.control_tx
            .send(ControlEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ActorStopped)?;

        rx.await.map_err(|_| CoreError::ActorStopped)?
    }

    /// Send a command given as string frames, e.g. `["CONFIG", text]`.
    pub async fn execute_frames<S: AsRef<str>>(&self, frames: &[S]) -> Result<(), CoreError> {
        let command = ControlCommand::from_frames(frames)?;
        self.execute(command).await
    }

    /// Replace the configuration with ZPL `text`.
    pub async fn configure(&self, text: impl Into<String>) -> Result<(), CoreError> {
        self.execute(ControlCommand::Config(text.into())).await
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.execute(ControlCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.execute(ControlCommand::Stop).await
    }

    pub async fn verbose(&self) -> Result<(), CoreError> {
        self.execute(ControlCommand::Verbose).await
    }

    /// Stop the actor and wait until it has released everything it owns.
    pub async fn terminate(self) -> Result<(), CoreError> {
        match self.execute(ControlCommand::Terminate).await {
            Ok(()) | Err(CoreError::ActorStopped) => {}
            Err(e) => return Err(e),
        }
        self.task
            .await
            .map_err(|e| CoreError::Internal(format!("device actor task failed: {e}")))
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

// ── Control loop ─────────────────────────────────────────────────────

enum Event {
    Control(Option<ControlEnvelope>),
    Broker(Option<Delivery>),
}

async fn run(mut control_rx: mpsc::Receiver<ControlEnvelope>) {
    let mut state = ActorState::default();
    debug!("device actor running");

    while !state.terminated {
        let event = tokio::select! {
            envelope = control_rx.recv() => Event::Control(envelope),
            delivery = next_delivery(state.link.as_mut()) => Event::Broker(delivery),
        };

        match event {
            Event::Control(Some(envelope)) => {
                let result = state.apply(envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
            Event::Control(None) => {
                debug!("control channel closed");
                state.terminated = true;
            }
            Event::Broker(Some(delivery)) => state.on_delivery(&delivery),
            Event::Broker(None) => {
                warn!("broker closed the link");
                state.link = None;
            }
        }
    }

    state.shutdown();
}

/// Next delivery on the link; never resolves when there is no link.
async fn next_delivery(link: Option<&mut BrokerClient>) -> Option<Delivery> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

// ── Actor state ──────────────────────────────────────────────────────

#[derive(Default)]
struct ActorState {
    terminated: bool,
    verbose: bool,
    config: Option<ConfigTree>,
    link: Option<BrokerClient>,
    consumers: Vec<Consumer>,
    registry: DeviceRegistry,
}

impl ActorState {
    async fn apply(&mut self, command: ControlCommand) -> Result<(), CoreError> {
        debug!(command = %command, "control command");
        let result = match command {
            ControlCommand::Config(text) => self.configure(&text),
            ControlCommand::Start => self.start().await,
            ControlCommand::Stop => {
                self.stop();
                Ok(())
            }
            ControlCommand::Verbose => {
                self.verbose = true;
                Ok(())
            }
            ControlCommand::Terminate => {
                self.terminated = true;
                Ok(())
            }
        };

        if let Err(ref e) = result {
            warn!(error = %e, "control command failed");
        }
        result
    }

    /// Replace the configuration. A configured device file rebinds the
    /// registry: the current contents are flushed, then the registry is
    /// reopened from that file.
    fn configure(&mut self, text: &str) -> Result<(), CoreError> {
        let config = ConfigTree::parse(text)?;

        if let Some(path) = config.file() {
            if self.registry.file().is_none() {
                self.registry.set_file(path);
            }
            if let Err(e) = self.registry.store() {
                warn!(error = %e, "cannot flush device registry");
            }
            self.registry = DeviceRegistry::open(path);
            info!(file = %path.display(), devices = self.registry.len(), "device registry bound");
        }

        self.config = Some(config);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        let config = self.config.as_ref().ok_or_else(|| CoreError::Config {
            message: "no configuration loaded".into(),
        })?;
        let endpoint = config.endpoint().ok_or_else(|| missing(ENDPOINT_PATH))?;
        let address = config.address().ok_or_else(|| missing(ADDRESS_PATH))?;

        self.link = None;
        let client = BrokerClient::connect(endpoint, CONNECT_TIMEOUT, address)
            .await
            .map_err(|e| CoreError::ConnectionFailed {
                endpoint: endpoint.to_owned(),
                reason: e.to_string(),
            })?;
        let link = self.link.insert(client);

        if let Some(stream) = config.producer() {
            link.set_producer(stream)
                .map_err(|e| CoreError::ProducerFailed {
                    stream: stream.to_owned(),
                    reason: e.to_string(),
                })?;
        }

        self.consumers = config.consumers();
        for consumer in &self.consumers {
            link.set_consumer(&consumer.stream, &consumer.pattern)
                .map_err(|e| CoreError::ConsumerFailed {
                    stream: consumer.stream.clone(),
                    pattern: consumer.pattern.clone(),
                    reason: e.to_string(),
                })?;
        }

        info!(
            endpoint,
            address,
            producer = config.producer().unwrap_or("-"),
            consumers = self.consumers.len(),
            "device actor connected"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.link.take().is_some() {
            info!("device actor disconnected");
        }
        self.flush();
    }

    fn flush(&self) {
        if let Err(e) = self.registry.store() {
            warn!(error = %e, "cannot flush device registry");
        }
    }

    // ── Broker traffic ───────────────────────────────────────────────

    fn on_delivery(&mut self, delivery: &Delivery) {
        let message = match ProtoMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                if self.verbose {
                    warn!(sender = %delivery.sender, subject = %delivery.subject, error = %e, "dropping malformed message");
                } else {
                    debug!(sender = %delivery.sender, subject = %delivery.subject, error = %e, "dropping malformed message");
                }
                return;
            }
        };

        if self.verbose {
            info!(
                kind = %delivery.kind,
                sender = %delivery.sender,
                address = %delivery.address,
                subject = %delivery.subject,
                message = %message.kind(),
                "delivery received"
            );
        }

        match delivery.kind {
            DeliveryKind::Mailbox => {
                let Some(link) = self.link.as_mut() else {
                    return;
                };
                handle_mailbox(
                    &mut self.registry,
                    link,
                    &delivery.sender,
                    &delivery.subject,
                    &message,
                );
            }
            DeliveryKind::Stream => self.on_stream(delivery, &message),
        }
    }

    /// Stream messages are accepted but not acted on yet.
    fn on_stream(&self, delivery: &Delivery, message: &ProtoMessage) {
        if message.kind() != MessageKind::Device && self.verbose {
            warn!(
                stream = %delivery.address,
                subject = %delivery.subject,
                kind = %message.kind(),
                "ignoring non-device stream message"
            );
        }
    }

    /// Release everything in order: configuration, consumers, link, then
    /// the registry after a final flush.
    fn shutdown(mut self) {
        self.config = None;
        self.consumers.clear();
        self.link = None;
        self.flush();
        debug!(devices = self.registry.len(), "device actor terminated");
    }
}

fn missing(path: &str) -> CoreError {
    CoreError::Config {
        message: format!("{path} is not set"),
    }
}
