//! The `amqp` module is the reliable publishing pipeline.
//!
//! - `message`: how a log event becomes one or more outbound messages.
//! - `chunk`: splitting of oversized text messages.
//! - `queue`: the FIFO of messages not yet accepted by the broker.
//! - `connection`: the broker link seam and the live connection state.
//! - `reconnect`: the retry window state machine.
//! - `publisher`: the task tying all of the above together.
//! - `lapin_link` / `consumer`: the real broker client.

pub mod chunk;
pub mod connection;
pub mod consumer;
pub mod lapin_link;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod reconnect;

pub use connection::{BrokerEvent, BrokerLink, ConnectionState, Connector, EventSink, LinkId};
pub use consumer::{ConsumedMessage, Consumer};
pub use lapin_link::{LapinConnector, LapinLink};
pub use message::{MessageBuilder, OutboundMessage, Payload, PublishOptions};
pub use publisher::{Lifecycle, Publisher, PublisherStatus};
pub use queue::MessageQueue;
pub use reconnect::{ReconnectPhase, ReconnectPolicy, Reconnector};

#[cfg(test)]
pub(crate) mod fake;
