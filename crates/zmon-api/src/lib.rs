// zmon-api: protocol codec and in-process broker link for zmon actors.

pub mod broker;
pub mod error;
pub mod proto;

pub use broker::{Broker, BrokerClient, Delivery, DeliveryKind};
pub use error::Error;
pub use proto::{DEVICE_STREAM, Device, MessageKind, ProtoMessage};
