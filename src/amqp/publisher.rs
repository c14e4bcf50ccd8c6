//! The publishing pipeline.
//!
//! A [`Publisher`] is a cheap handle onto a single pipeline task which owns the
//! message queue, the live broker link and the reconnect state. Everything
//! that touches that state arrives as a [`Signal`] on one unbounded channel:
//! publishes, lifecycle requests, broker events and the outcome of reconnect
//! attempts. The task handles them strictly one at a time, in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connection::{BrokerEvent, BrokerLink, ConnectionState, Connector, EventSink, LinkId};
use super::lapin_link::LapinConnector;
use super::message::{MessageBuilder, OutboundMessage};
use super::queue::MessageQueue;
use super::reconnect::{Decision, ReconnectPhase, ReconnectPolicy, Reconnector};
use crate::config::AmqpSettings;
use crate::diagnostics::CrashNotes;
use crate::event::LogEvent;
use crate::utils::error::{PublishError, ReconnectExhausted};

const FAILURE_CAPACITY: usize = 16;

/// Where the pipeline is in its shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    /// `end()` requested: flushing the queue, then waiting for confirms.
    Flushing,
    /// `close()` requested: tearing the link down.
    Closing,
    Closed,
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherStatus {
    pub queued: usize,
    pub flowing: bool,
    pub link: Option<LinkId>,
    pub phase: ReconnectPhase,
    pub attempts: u32,
    pub lifecycle: Lifecycle,
}

enum Signal<L> {
    Enqueue(Vec<OutboundMessage>),
    Status(oneshot::Sender<PublisherStatus>),
    End(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
    Broker(LinkId, BrokerEvent),
    Attempted(Result<L, PublishError>),
    Finished(Result<(), PublishError>),
}

/// Handle onto the publishing pipeline.
pub struct Publisher<C: Connector = LapinConnector> {
    signals: mpsc::UnboundedSender<Signal<C::Link>>,
    builder: Arc<MessageBuilder>,
    closed: Arc<AtomicBool>,
    failures: broadcast::Sender<ReconnectExhausted>,
}

impl<C: Connector> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            signals: self.signals.clone(),
            builder: self.builder.clone(),
            closed: self.closed.clone(),
            failures: self.failures.clone(),
        }
    }
}

impl Publisher<LapinConnector> {
    /// Connects to the broker described by `settings`.
    pub async fn connect(settings: &AmqpSettings) -> Result<Self, PublishError> {
        Self::with_connector(settings, LapinConnector::new(settings.clone())).await
    }
}

impl<C: Connector> Publisher<C> {
    /// Performs the initial handshake through `connector` and starts the
    /// pipeline task. The initial connect is not retried.
    pub async fn with_connector(settings: &AmqpSettings, connector: C) -> Result<Self, PublishError> {
        Self::start(settings, MessageBuilder::from_settings(settings), connector).await
    }

    /// Like [`with_connector`](Self::with_connector) with a custom builder.
    pub async fn with_builder(
        settings: &AmqpSettings,
        builder: MessageBuilder,
        connector: C,
    ) -> Result<Self, PublishError> {
        Self::start(settings, builder, connector).await
    }

    async fn start(settings: &AmqpSettings, builder: MessageBuilder, connector: C) -> Result<Self, PublishError> {
        let notes = CrashNotes::new(&settings.crash_note_dir, builder.process());
        let (signals, inbox) = mpsc::unbounded_channel();
        let sink = event_sink(&signals);

        let link = match connector.connect(sink.clone()).await {
            Ok(link) => link,
            Err(e) => {
                notes.record("AMQP initial connect failed", Some(&e));
                return Err(e);
            }
        };
        info!(link = %link.id(), url = %redact(&settings.url), exchange = %settings.exchange_name, "connected to AMQP broker");

        let mut conn = ConnectionState::new();
        conn.install(link);

        let (failures, _) = broadcast::channel(FAILURE_CAPACITY);
        let pipeline = Pipeline {
            connector: Arc::new(connector),
            queue: MessageQueue::new(),
            conn,
            reconnector: Reconnector::new(ReconnectPolicy::from(&settings.reconnect)),
            pending_attempt: None,
            last_error: String::new(),
            lifecycle: Lifecycle::Running,
            waiters: Vec::new(),
            notes,
            sink,
            signals: signals.downgrade(),
            failures: failures.clone(),
        };
        tokio::spawn(pipeline.run(inbox));

        Ok(Self {
            signals,
            builder: Arc::new(builder),
            closed: Arc::new(AtomicBool::new(false)),
            failures,
        })
    }

    /// Queues `event` for the broker, returning how many messages it became.
    ///
    /// Events below the configured level are dropped and count as zero. Never
    /// waits for the broker.
    pub fn publish(&self, event: &LogEvent) -> Result<usize, PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }
        if !self.builder.accepts(event.level) {
            return Ok(0);
        }
        let messages = self.builder.build(event);
        let count = messages.len();
        self.send(Signal::Enqueue(messages))?;
        Ok(count)
    }

    /// Queues an already built message.
    pub fn enqueue(&self, message: OutboundMessage) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }
        self.send(Signal::Enqueue(vec![message]))
    }

    /// Flushes everything queued, waits for the broker to confirm it and
    /// closes the connection. Later calls wait for the same shutdown.
    pub async fn end(&self) {
        self.closed.store(true, Ordering::Release);
        let (tx, rx) = oneshot::channel();
        if self.send(Signal::End(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Closes the connection now, discarding whatever is still queued.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let (tx, rx) = oneshot::channel();
        if self.send(Signal::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn status(&self) -> Result<PublisherStatus, PublishError> {
        let (tx, rx) = oneshot::channel();
        self.send(Signal::Status(tx))?;
        rx.await.map_err(|_| PublishError::Closed)
    }

    /// Subscribes to the terminal reconnect failure.
    pub fn failures(&self) -> broadcast::Receiver<ReconnectExhausted> {
        self.failures.subscribe()
    }

    pub fn builder(&self) -> &MessageBuilder {
        &self.builder
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send(&self, signal: Signal<C::Link>) -> Result<(), PublishError> {
        self.signals.send(signal).map_err(|_| PublishError::Closed)
    }
}

fn event_sink<L: BrokerLink>(signals: &mpsc::UnboundedSender<Signal<L>>) -> EventSink {
    let weak = signals.downgrade();
    EventSink::new(move |link, event| {
        if let Some(signals) = weak.upgrade() {
            let _ = signals.send(Signal::Broker(link, event));
        }
    })
}

/// Strips credentials from an AMQP URL before it is logged.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}***{}", &url[..scheme + 3], &url[at..]),
        _ => url.to_string(),
    }
}

struct Pipeline<C: Connector> {
    connector: Arc<C>,
    queue: MessageQueue,
    conn: ConnectionState<C::Link>,
    reconnector: Reconnector,
    pending_attempt: Option<JoinHandle<()>>,
    last_error: String,
    lifecycle: Lifecycle,
    waiters: Vec<oneshot::Sender<()>>,
    notes: CrashNotes,
    sink: EventSink,
    signals: mpsc::WeakUnboundedSender<Signal<C::Link>>,
    failures: broadcast::Sender<ReconnectExhausted>,
}

impl<C: Connector> Pipeline<C> {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Signal<C::Link>>) {
        while let Some(signal) = inbox.recv().await {
            match signal {
                Signal::Enqueue(messages) => self.on_enqueue(messages),
                Signal::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Signal::End(waiter) => self.on_end(waiter),
                Signal::Close(waiter) => self.on_close(waiter),
                Signal::Broker(link, event) => self.on_broker(link, event),
                Signal::Attempted(result) => self.on_attempted(result),
                Signal::Finished(result) => {
                    if let Err(e) = result {
                        warn!(error = %e, "AMQP shutdown did not complete cleanly");
                        self.notes.record("AMQP shutdown failed", Some(&e));
                    }
                    self.finish();
                }
            }
        }

        // Every handle is gone.
        self.cancel_attempt();
        if let Some(link) = self.conn.take() {
            link.close().await;
        }
        debug!("publisher pipeline stopped");
    }

    fn status(&self) -> PublisherStatus {
        PublisherStatus {
            queued: self.queue.len(),
            flowing: self.conn.is_flowing(),
            link: self.conn.link_id(),
            phase: self.reconnector.phase(),
            attempts: self.reconnector.attempts(),
            lifecycle: self.lifecycle,
        }
    }

    fn on_enqueue(&mut self, messages: Vec<OutboundMessage>) {
        if matches!(self.lifecycle, Lifecycle::Closing | Lifecycle::Closed) {
            debug!(count = messages.len(), "dropping messages published during close");
            return;
        }
        for message in messages {
            self.queue.enqueue(message);
        }
        self.pump();
    }

    fn on_broker(&mut self, link: LinkId, event: BrokerEvent) {
        if !self.conn.is_current(link) {
            debug!(%link, ?event, "ignoring event from a replaced link");
            return;
        }
        match event {
            BrokerEvent::Blocked => {
                warn!(%link, "AMQP broker blocked the connection");
                self.conn.set_flowing(false);
            }
            BrokerEvent::Unblocked => {
                info!(%link, "AMQP broker unblocked the connection");
                self.conn.set_flowing(true);
                self.pump();
            }
            BrokerEvent::Writable => self.pump(),
            BrokerEvent::ConnectionError(reason) => {
                self.fail(format!("AMQP connection error: {reason}"))
            }
            BrokerEvent::ChannelClosed(reason) => {
                self.fail(format!("AMQP channel closed: {reason}"))
            }
            BrokerEvent::Closed => self.fail("AMQP connection closed by peer".to_string()),
        }
    }

    /// Moves queued messages to the link as far as the current phase allows.
    fn pump(&mut self) {
        match self.lifecycle {
            Lifecycle::Running => {
                self.conn.drain(&mut self.queue);
            }
            Lifecycle::Flushing => self.flush_step(),
            Lifecycle::Closing | Lifecycle::Closed => {}
        }
    }

    fn flush_step(&mut self) {
        if !self.conn.flush(&mut self.queue) {
            debug!(queued = self.queue.len(), "flush paused on backpressure");
            return;
        }
        let Some(mut link) = self.conn.take() else {
            self.finish();
            return;
        };
        let report = self.signals.upgrade();
        tokio::spawn(async move {
            let confirmed = link.wait_for_confirms().await;
            link.close().await;
            if let Some(report) = report {
                let _ = report.send(Signal::Finished(confirmed));
            }
        });
    }

    fn fail(&mut self, reason: String) {
        warn!(error = %reason, "AMQP link lost");
        self.notes.record("AMQP link lost", Some(&reason));
        self.last_error = reason;

        if let Some(mut link) = self.conn.take() {
            let unconfirmed = link.recover();
            if !unconfirmed.is_empty() {
                debug!(count = unconfirmed.len(), "requeueing unconfirmed messages");
                self.queue.requeue_front(unconfirmed);
            }
            tokio::spawn(link.close());
        }

        match self.lifecycle {
            Lifecycle::Running => self.schedule_reconnect(),
            Lifecycle::Flushing => {
                let lost = self.queue.discard();
                error!(lost, "AMQP link lost while flushing, giving up");
                if lost > 0 {
                    self.notes.record(
                        &format!("AMQP link lost while flushing, {lost} message(s) lost"),
                        None,
                    );
                }
                self.finish();
            }
            Lifecycle::Closing | Lifecycle::Closed => {}
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.reconnector.on_failure(Instant::now(), &self.last_error) {
            Decision::Retry { delay, attempt } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling AMQP reconnect");
                let Some(report) = self.signals.upgrade() else {
                    return;
                };
                let connector = self.connector.clone();
                let sink = self.sink.clone();
                self.pending_attempt = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let result = connector.connect(sink).await;
                    let _ = report.send(Signal::Attempted(result));
                }));
            }
            Decision::AlreadyPending | Decision::Ignore => {}
            Decision::Exhausted(exhausted) => self.exhausted(exhausted),
        }
    }

    fn on_attempted(&mut self, result: Result<C::Link, PublishError>) {
        self.pending_attempt = None;
        self.reconnector.attempt_finished();

        if self.lifecycle != Lifecycle::Running {
            if let Ok(link) = result {
                tokio::spawn(link.close());
            }
            return;
        }

        match result {
            Ok(link) => {
                info!(link = %link.id(), queued = self.queue.len(), "reconnected to AMQP broker");
                self.reconnector.on_connected();
                self.conn.install(link);
                self.pump();
            }
            Err(e) => {
                warn!(error = %e, attempts = self.reconnector.attempts(), "AMQP reconnect attempt failed");
                self.notes.record("AMQP reconnect attempt failed", Some(&e));
                self.last_error = e.to_string();
                self.schedule_reconnect();
            }
        }
    }

    fn exhausted(&mut self, exhausted: ReconnectExhausted) {
        self.cancel_attempt();
        error!(
            attempts = exhausted.attempts,
            queued = self.queue.len(),
            "{exhausted}"
        );
        self.notes.record("AMQP log transport gave up", Some(&exhausted));
        let _ = self.failures.send(exhausted);
    }

    fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.pending_attempt.take() {
            attempt.abort();
        }
        self.reconnector.cancel();
    }

    fn on_end(&mut self, waiter: oneshot::Sender<()>) {
        match self.lifecycle {
            Lifecycle::Closed => {
                let _ = waiter.send(());
            }
            Lifecycle::Flushing | Lifecycle::Closing => self.waiters.push(waiter),
            Lifecycle::Running => {
                self.waiters.push(waiter);
                self.lifecycle = Lifecycle::Flushing;
                self.cancel_attempt();
                self.conn.set_flowing(false);

                if !self.conn.is_connected() {
                    let lost = self.queue.discard();
                    if lost > 0 {
                        warn!(lost, "ending without a broker connection");
                        self.notes.record(
                            &format!("AMQP ended while disconnected, {lost} message(s) lost"),
                            None,
                        );
                    }
                    self.finish();
                    return;
                }
                debug!(queued = self.queue.len(), "flushing AMQP queue");
                self.flush_step();
            }
        }
    }

    fn on_close(&mut self, waiter: oneshot::Sender<()>) {
        match self.lifecycle {
            Lifecycle::Closed => {
                let _ = waiter.send(());
            }
            Lifecycle::Closing => self.waiters.push(waiter),
            Lifecycle::Running | Lifecycle::Flushing => {
                self.waiters.push(waiter);
                self.lifecycle = Lifecycle::Closing;
                self.cancel_attempt();

                let lost = self.queue.discard();
                if lost > 0 {
                    warn!(lost, "closing with undelivered messages");
                }

                let Some(link) = self.conn.take() else {
                    self.finish();
                    return;
                };
                let report = self.signals.upgrade();
                tokio::spawn(async move {
                    link.close().await;
                    if let Some(report) = report {
                        let _ = report.send(Signal::Finished(Ok(())));
                    }
                });
            }
        }
    }

    fn finish(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        self.lifecycle = Lifecycle::Closed;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("AMQP publisher closed");
    }
}
