use futures_util::future::BoxFuture;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use super::transport::Transport;
use crate::amqp::{Connector, LapinConnector, Publisher};
use crate::event::{Level, LogEvent};

/// Forwards events to the AMQP publishing pipeline.
pub struct AmqpTransport<C: Connector = LapinConnector> {
    publisher: Publisher<C>,
    level: Level,
}

impl<C: Connector> AmqpTransport<C> {
    /// Must be called from within a tokio runtime: a task is spawned that
    /// reports the pipeline giving up on the broker.
    pub fn new(publisher: Publisher<C>, level: Level) -> Self {
        let mut failures = publisher.failures();
        tokio::spawn(async move {
            loop {
                match failures.recv().await {
                    Ok(exhausted) => error!(
                        attempts = exhausted.attempts,
                        last_error = %exhausted.last_error,
                        "{}",
                        exhausted.reason
                    ),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { publisher, level }
    }

    pub fn publisher(&self) -> &Publisher<C> {
        &self.publisher
    }
}

impl<C: Connector> Transport for AmqpTransport<C> {
    fn name(&self) -> &'static str {
        "amqp"
    }

    fn min_level(&self) -> Level {
        self.level
    }

    fn log(&self, event: &LogEvent) {
        if let Err(e) = self.publisher.publish(event) {
            warn!(error = %e, "dropping log event");
        }
    }

    fn end(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.publisher.end())
    }
}
