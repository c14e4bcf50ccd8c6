//! In-memory broker used by the pipeline tests.

use std::future::{Future, ready};
use std::sync::{Arc, Mutex, MutexGuard};

use super::connection::{BrokerEvent, BrokerLink, Connector, EventSink, LinkId};
use super::message::OutboundMessage;
use crate::utils::error::{ConnectStage, PublishError};

struct BrokerState {
    accepting: bool,
    holding: bool,
    held: Vec<(LinkId, OutboundMessage)>,
    delivered: Vec<OutboundMessage>,
    connects: u32,
    fail_connects: u32,
    sinks: Vec<(LinkId, EventSink)>,
    closed_links: Vec<LinkId>,
    next_id: u64,
}

#[derive(Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                accepting: true,
                holding: false,
                held: Vec::new(),
                delivered: Vec::new(),
                connects: 0,
                fail_connects: 0,
                sinks: Vec::new(),
                closed_links: Vec::new(),
                next_id: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            broker: self.clone(),
        }
    }

    /// While `false` every link refuses writes, as with a full buffer.
    pub fn set_accepting(&self, accepting: bool) {
        self.state().accepting = accepting;
    }

    /// While `true` accepted writes stay unconfirmed inside their link until
    /// it waits for confirms, like a socket buffer the broker has not read.
    pub fn set_holding(&self, holding: bool) {
        self.state().holding = holding;
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.state().delivered.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn closed_links(&self) -> Vec<LinkId> {
        self.state().closed_links.clone()
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.state().fail_connects = count;
    }

    /// Reports `event` from the most recently opened link.
    pub fn emit(&self, event: BrokerEvent) {
        let latest = self.state().sinks.last().cloned();
        if let Some((id, sink)) = latest {
            sink.emit(id, event);
        }
    }

    /// Reports `event` from a specific, possibly replaced, link.
    pub fn emit_from(&self, id: LinkId, event: BrokerEvent) {
        let sink = self
            .state()
            .sinks
            .iter()
            .find(|(link, _)| *link == id)
            .map(|(_, sink)| sink.clone());
        if let Some(sink) = sink {
            sink.emit(id, event);
        }
    }

    fn open_link(&self, events: EventSink) -> Result<FakeLink, PublishError> {
        let mut state = self.state();
        state.connects += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(PublishError::connect(
                ConnectStage::Connection,
                "connection refused",
            ));
        }
        state.next_id += 1;
        let id = LinkId(state.next_id);
        state.sinks.push((id, events));
        Ok(FakeLink {
            id,
            broker: self.clone(),
        })
    }
}

pub struct FakeConnector {
    broker: FakeBroker,
}

impl Connector for FakeConnector {
    type Link = FakeLink;

    fn connect(
        &self,
        events: EventSink,
    ) -> impl Future<Output = Result<FakeLink, PublishError>> + Send {
        ready(self.broker.open_link(events))
    }
}

pub struct FakeLink {
    id: LinkId,
    broker: FakeBroker,
}

impl BrokerLink for FakeLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn try_publish(&mut self, message: &OutboundMessage) -> bool {
        let mut state = self.broker.state();
        if !state.accepting {
            return false;
        }
        if state.holding {
            state.held.push((self.id, message.clone()));
        } else {
            state.delivered.push(message.clone());
        }
        true
    }

    fn recover(&mut self) -> Vec<OutboundMessage> {
        let mut state = self.broker.state();
        let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut state.held)
            .into_iter()
            .partition(|(id, _)| *id == self.id);
        state.held = others;
        mine.into_iter().map(|(_, message)| message).collect()
    }

    fn wait_for_confirms(&mut self) -> impl Future<Output = Result<(), PublishError>> + Send {
        let confirmed = self.recover();
        self.broker.state().delivered.extend(confirmed);
        ready(Ok(()))
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        self.broker.state().closed_links.push(self.id);
        ready(())
    }
}
