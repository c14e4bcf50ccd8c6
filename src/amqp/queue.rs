//! The in-memory FIFO of messages waiting for the broker.

use std::collections::VecDeque;

use super::message::OutboundMessage;

/// Pending outbound messages, delivered in insertion order.
///
/// A message leaves the queue only once the transport has accepted it, or when
/// the whole queue is discarded on shutdown. The queue is unbounded: while the
/// broker is blocked or unreachable it simply grows.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<OutboundMessage>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail.
    pub fn enqueue(&mut self, message: OutboundMessage) {
        self.messages.push_back(message);
    }

    /// Puts `messages` back at the head, keeping their order ahead of
    /// everything already queued.
    pub fn requeue_front(&mut self, messages: Vec<OutboundMessage>) {
        for message in messages.into_iter().rev() {
            self.messages.push_front(message);
        }
    }

    /// Hands messages to `try_send` from the head until it refuses one or the
    /// queue is empty.
    ///
    /// A refused message stays at the head. Returns whether the queue ended
    /// empty. Taking `&mut self` keeps drain passes from overlapping.
    pub fn drain<F>(&mut self, mut try_send: F) -> bool
    where
        F: FnMut(&OutboundMessage) -> bool,
    {
        while let Some(head) = self.messages.front() {
            if !try_send(head) {
                return false;
            }
            self.messages.pop_front();
        }
        true
    }

    /// Drops every pending message, returning how many were lost.
    pub fn discard(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }
}
