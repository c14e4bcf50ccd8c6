//! The `logger` module is the application-facing facade.
//!
//! A [`Logger`] owns the transports that are switched on in [`Settings`] and
//! fans every event out to those whose level admits it.

mod amqp;
mod console;
mod transport;

pub use amqp::AmqpTransport;
pub use console::ConsoleTransport;
pub use transport::Transport;

use futures_util::future::join_all;
use tracing::debug;

use crate::amqp::Publisher;
use crate::config::Settings;
use crate::event::{Level, LogArg, LogEvent};
use crate::utils::error::PublishError;

pub struct Logger {
    transports: Vec<Box<dyn Transport>>,
}

impl Logger {
    /// Opens every enabled transport. Fails if the broker cannot be reached.
    pub async fn open(settings: &Settings) -> Result<Self, PublishError> {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();
        if settings.console.enable {
            transports.push(Box::new(ConsoleTransport::new(&settings.console)));
        }
        if settings.amqp.enable {
            let publisher = Publisher::connect(&settings.amqp).await?;
            transports.push(Box::new(AmqpTransport::new(publisher, settings.amqp.level)));
        }
        Ok(Self::with_transports(transports))
    }

    pub fn with_transports(transports: Vec<Box<dyn Transport>>) -> Self {
        debug!(
            transports = ?transports.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "logger opened"
        );
        Self { transports }
    }

    pub fn transports(&self) -> impl Iterator<Item = &dyn Transport> {
        self.transports.iter().map(|t| t.as_ref())
    }

    pub fn log(&self, level: Level, message: impl Into<String>, data: Vec<LogArg>) {
        self.log_event(&LogEvent::new(level, message).with_data(data));
    }

    pub fn log_event(&self, event: &LogEvent) {
        for transport in &self.transports {
            if transport.filter(event) {
                transport.log(event);
            }
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message, Vec::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message, Vec::new());
    }

    pub fn notice(&self, message: impl Into<String>) {
        self.log(Level::Notice, message, Vec::new());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message, Vec::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message, Vec::new());
    }

    pub fn crit(&self, message: impl Into<String>) {
        self.log(Level::Crit, message, Vec::new());
    }

    /// Ends every transport, waiting for queued events to be delivered.
    pub async fn close(self) {
        join_all(self.transports.iter().map(|t| t.end())).await;
    }
}

#[cfg(test)]
mod tests;
