use std::io::Write;

use chrono::SecondsFormat;
use futures_util::future::{self, BoxFuture};
use serde_json::Value;

use super::transport::Transport;
use crate::config::ConsoleSettings;
use crate::event::{Level, LogArg, LogEvent};

/// Writes events as single lines to stdout or stderr.
#[derive(Debug, Clone)]
pub struct ConsoleTransport {
    level: Level,
    timestamp: bool,
    stderr: bool,
}

impl ConsoleTransport {
    pub fn new(settings: &ConsoleSettings) -> Self {
        Self {
            level: settings.level,
            timestamp: settings.timestamp,
            stderr: settings.stderr,
        }
    }

    /// `[<time>] [LEVEL] message <data as JSON>`
    pub fn render(&self, event: &LogEvent) -> String {
        let mut line = String::new();
        if self.timestamp {
            line.push_str(&format!(
                "[{}] ",
                event.created.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
        }
        line.push_str(&format!("[{}] {}", event.level, event.message));
        if !event.data.is_empty() {
            let data = Value::Array(event.data.iter().map(LogArg::to_value).collect());
            line.push(' ');
            line.push_str(&data.to_string());
        }
        line
    }
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &'static str {
        "console"
    }

    fn min_level(&self) -> Level {
        self.level
    }

    fn log(&self, event: &LogEvent) {
        let line = self.render(event);
        let written = if self.stderr {
            writeln!(std::io::stderr().lock(), "{line}")
        } else {
            writeln!(std::io::stdout().lock(), "{line}")
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "console transport write failed");
        }
    }

    fn end(&self) -> BoxFuture<'_, ()> {
        Box::pin(future::ready(()))
    }
}
