//! The `event` module defines the log events handed to transports.
//!
//! A [`LogEvent`] is produced once by the [`Logger`](crate::logger::Logger) and is
//! read-only from then on: every transport receives the same shared reference.

mod facility;
mod level;

pub use facility::Facility;
pub use level::Level;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the event layout understood by the transports.
pub const EVENT_VERSION: &str = "1.0.0";

/// One argument attached to a log call.
///
/// Errors are tagged explicitly where the arguments are produced, so the JSON
/// payload can promote them to `log_message`/`log_name` without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogArg {
    Error { name: String, message: String },
    Value(serde_json::Value),
}

impl LogArg {
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        LogArg::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The argument as a plain JSON value.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            LogArg::Error { name, message } => {
                serde_json::json!({ "name": name, "message": message })
            }
            LogArg::Value(value) => value.clone(),
        }
    }
}

impl From<serde_json::Value> for LogArg {
    fn from(value: serde_json::Value) -> Self {
        LogArg::Value(value)
    }
}

/// A log event as emitted by the logging facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub version: String,
    pub created: DateTime<Utc>,
    pub host: String,
    pub level: Level,
    /// Rendered message, redaction already applied upstream.
    pub message: String,
    pub data: Vec<LogArg>,
    /// Short correlation id used to tag chunks of a split message.
    pub eid: Option<String>,
}

impl LogEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            version: EVENT_VERSION.to_string(),
            created: Utc::now(),
            host: local_hostname(),
            level,
            message: message.into(),
            data: Vec::new(),
            eid: None,
        }
    }

    pub fn with_data(mut self, data: Vec<LogArg>) -> Self {
        self.data = data;
        self
    }

    pub fn with_eid(mut self, eid: impl Into<String>) -> Self {
        self.eid = Some(eid.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// Host name of this machine, or `localhost` when it cannot be determined.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
