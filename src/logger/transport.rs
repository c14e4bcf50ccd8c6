use futures_util::future::BoxFuture;

use crate::event::{Level, LogEvent};

/// A destination for log events.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn min_level(&self) -> Level;

    /// Whether `event` should reach [`log`](Transport::log).
    fn filter(&self, event: &LogEvent) -> bool {
        event.level >= self.min_level()
    }

    /// Must not block on I/O to a remote peer.
    fn log(&self, event: &LogEvent);

    /// Flushes and releases the transport.
    fn end(&self) -> BoxFuture<'_, ()>;
}
