//! The `error` module defines the error types used within the `amqp-logger` crate.
//!
//! Broker failures are carried as rendered strings rather than the client
//! library's own error values so that every variant is `Clone`: the same
//! failure is logged, written to a crash note and, once reconnection gives
//! up, broadcast to every subscriber.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The step of the connect handshake that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connection,
    Channel,
    ConfirmSelect,
    Exchange,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectStage::Connection => "connection",
            ConnectStage::Channel => "channel",
            ConnectStage::ConfirmSelect => "confirm-select",
            ConnectStage::Exchange => "exchange",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the publishing pipeline.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// Broker unreachable, authentication refused or exchange assertion failed.
    #[error("AMQP connect failed at {stage} stage: {reason}")]
    Connect { stage: ConnectStage, reason: String },

    /// Mid-session protocol violation or a broker initiated channel close.
    #[error("AMQP channel error: {0}")]
    Channel(String),

    /// `end()` or `close()` was already requested.
    #[error("publisher is closed")]
    Closed,

    #[error("failed to encode payload: {0}")]
    Serialize(String),
}

impl PublishError {
    pub fn connect(stage: ConnectStage, reason: impl fmt::Display) -> Self {
        PublishError::Connect {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialize(err.to_string())
    }
}

/// Why reconnection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustReason {
    /// The retry window elapsed without a successful connect.
    Timeout,
    /// `retry_timeout_secs` is zero.
    Disabled,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustReason::Timeout => f.write_str("AMQP log transport reconnect timeout"),
            ExhaustReason::Disabled => f.write_str("AMQP log transport reconnect disabled"),
        }
    }
}

/// Terminal failure event emitted when the broker is considered gone.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason} after {attempts} attempt(s): {last_error}")]
pub struct ReconnectExhausted {
    pub reason: ExhaustReason,
    pub attempts: u32,
    pub last_error: String,
    pub retry_timeout: Duration,
    pub retry_delay: Duration,
}

/// A level or facility name that is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown log level '{0}'")]
    Level(String),
    #[error("unknown syslog facility '{0}'")]
    Facility(String),
    #[error("unknown payload format '{0}'")]
    Format(String),
}
