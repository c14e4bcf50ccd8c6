//! The broker connection seam.
//!
//! A [`Connector`] performs the connect handshake and yields a [`BrokerLink`],
//! the single connection + confirm channel pair through which every publish
//! goes. Links report asynchronous happenings (flow control, errors, a
//! writable buffer) through an [`EventSink`], tagged with their [`LinkId`] so
//! that events from a replaced link can be told apart and ignored.
//!
//! [`ConnectionState`] is the publisher's view of the live link.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::message::OutboundMessage;
use super::queue::MessageQueue;
use crate::utils::error::PublishError;

/// Opaque identity of one established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Something the broker, or the link's own I/O, reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Connection level flow control engaged.
    Blocked,
    /// Connection level flow control released.
    Unblocked,
    /// The write buffer has room again after refusing a message.
    Writable,
    /// The connection failed.
    ConnectionError(String),
    /// The channel was closed by the broker or failed mid-session.
    ChannelClosed(String),
    /// The peer closed the connection without reporting an error.
    Closed,
}

/// Where links deliver their [`BrokerEvent`]s.
#[derive(Clone)]
pub struct EventSink {
    emit: Arc<dyn Fn(LinkId, BrokerEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(emit: F) -> Self
    where
        F: Fn(LinkId, BrokerEvent) + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, link: LinkId, event: BrokerEvent) {
        (self.emit)(link, event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// One established connection with a publisher-confirms channel.
pub trait BrokerLink: Send + 'static {
    fn id(&self) -> LinkId;

    /// Offers one message to the transport.
    ///
    /// Returns `false` when the write buffer is saturated; the message was not
    /// taken and must stay queued. The link emits [`BrokerEvent::Writable`]
    /// once there is room again.
    fn try_publish(&mut self, message: &OutboundMessage) -> bool;

    /// Stops the link and hands back every accepted message the broker has
    /// not confirmed, oldest first.
    fn recover(&mut self) -> Vec<OutboundMessage>;

    /// Waits until every accepted message has been written and confirmed.
    fn wait_for_confirms(&mut self) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Closes channel then connection. Best effort: failures are logged, never
    /// returned, and a channel the peer already closed is skipped.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens links: connection, confirm channel, exchange assertion.
pub trait Connector: Send + Sync + 'static {
    type Link: BrokerLink;

    /// On failure nothing is left open.
    fn connect(
        &self,
        events: EventSink,
    ) -> impl Future<Output = Result<Self::Link, PublishError>> + Send;
}

/// The publisher's single live link and its flow-control flag.
///
/// Starts empty and not flowing, is populated wholesale by [`install`] after a
/// successful handshake and is emptied again by [`take`] on any close or error.
///
/// [`install`]: ConnectionState::install
/// [`take`]: ConnectionState::take
#[derive(Debug)]
pub struct ConnectionState<L> {
    link: Option<L>,
    is_flowing: bool,
}

impl<L> Default for ConnectionState<L> {
    fn default() -> Self {
        Self {
            link: None,
            is_flowing: false,
        }
    }
}

impl<L: BrokerLink> ConnectionState<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, link: L) {
        self.link = Some(link);
        self.is_flowing = true;
    }

    /// Removes the link, leaving the state empty and not flowing.
    pub fn take(&mut self) -> Option<L> {
        self.is_flowing = false;
        self.link.take()
    }

    pub fn link_id(&self) -> Option<LinkId> {
        self.link.as_ref().map(BrokerLink::id)
    }

    pub fn is_current(&self, id: LinkId) -> bool {
        self.link_id() == Some(id)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_flowing(&self) -> bool {
        self.is_flowing
    }

    pub fn set_flowing(&mut self, flowing: bool) {
        self.is_flowing = flowing && self.link.is_some();
    }

    /// Offers one message to the live link; `false` without a link.
    pub fn publish(&mut self, message: &OutboundMessage) -> bool {
        match self.link.as_mut() {
            Some(link) => link.try_publish(message),
            None => false,
        }
    }

    /// A drain pass gated on connection level flow control.
    pub fn drain(&mut self, queue: &mut MessageQueue) -> bool {
        if !self.is_flowing {
            return queue.is_empty();
        }
        self.flush(queue)
    }

    /// A drain pass that ignores flow control but still stops on backpressure.
    pub fn flush(&mut self, queue: &mut MessageQueue) -> bool {
        match self.link.as_mut() {
            Some(link) => queue.drain(|message| link.try_publish(message)),
            None => queue.is_empty(),
        }
    }
}
