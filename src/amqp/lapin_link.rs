//! [`Connector`] and [`BrokerLink`] over a real AMQP 0-9-1 broker.
//!
//! Each link owns one connection and one confirm-mode channel. Accepted
//! messages are handed to a writer task through a buffer of `write_buffer`
//! messages; a full buffer is the backpressure signal. A message stays in the
//! buffer until the broker confirms it, so nothing accepted is lost with the
//! connection.
//! A watcher task turns connection and channel status changes into
//! [`BrokerEvent`]s.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::connection::{BrokerEvent, BrokerLink, Connector, EventSink, LinkId};
use super::message::{OutboundMessage, PublishOptions};
use crate::config::AmqpSettings;
use crate::utils::error::{ConnectStage, PublishError};

const STATUS_POLL: Duration = Duration::from_millis(200);
const CLOSE_REPLY_CODE: u16 = 200;

/// Opens links to the broker named in [`AmqpSettings::url`].
#[derive(Debug)]
pub struct LapinConnector {
    settings: AmqpSettings,
    next_id: AtomicU64,
}

impl LapinConnector {
    pub fn new(settings: AmqpSettings) -> Self {
        Self {
            settings,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Connector for LapinConnector {
    type Link = LapinLink;

    async fn connect(&self, events: EventSink) -> Result<LapinLink, PublishError> {
        let id = LinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let settings = &self.settings;

        let connection = Connection::connect(&settings.url, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::connect(ConnectStage::Connection, e))?;

        let channel = match open_channel(&connection, settings).await {
            Ok(channel) => channel,
            Err(e) => {
                shutdown_connection(&connection).await;
                return Err(e);
            }
        };

        let on_error = events.clone();
        connection.on_error(move |err| {
            on_error.emit(id, BrokerEvent::ConnectionError(err.to_string()));
        });

        let buffer = Arc::new(Mutex::new(WriteBuffer::new(settings.write_buffer)));
        let wake = Arc::new(Notify::new());

        let writer = tokio::spawn(write_loop(
            id,
            channel.clone(),
            settings.exchange_name.clone(),
            buffer.clone(),
            wake.clone(),
            events.clone(),
        ));
        let watcher = tokio::spawn(watch_status(
            id,
            connection.status().clone(),
            channel.clone(),
            events,
        ));

        debug!(link = %id, exchange = %settings.exchange_name, "AMQP link established");

        Ok(LapinLink {
            id,
            connection,
            channel,
            buffer,
            wake,
            writer: Some(writer),
            watcher,
        })
    }
}

async fn open_channel(connection: &Connection, settings: &AmqpSettings) -> Result<Channel, PublishError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| PublishError::connect(ConnectStage::Channel, e))?;

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| PublishError::connect(ConnectStage::ConfirmSelect, e))?;

    let options = ExchangeDeclareOptions {
        durable: settings.exchange.durable,
        auto_delete: settings.exchange.auto_delete,
        internal: settings.exchange.internal,
        ..Default::default()
    };
    channel
        .exchange_declare(
            &settings.exchange_name,
            ExchangeKind::Topic,
            options,
            FieldTable::default(),
        )
        .await
        .map_err(|e| PublishError::connect(ConnectStage::Exchange, e))?;

    Ok(channel)
}

/// Messages accepted by [`LapinLink::try_publish`] that the broker has not
/// confirmed yet.
///
/// `pending` is waiting for the writer, `unconfirmed` has been written and is
/// keyed by write order. Both are handed back by [`BrokerLink::recover`].
#[derive(Debug)]
struct WriteBuffer {
    pending: VecDeque<OutboundMessage>,
    unconfirmed: BTreeMap<u64, OutboundMessage>,
    next_seq: u64,
    capacity: usize,
    saturated: bool,
    finishing: bool,
    stopped: bool,
}

impl WriteBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            unconfirmed: BTreeMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            saturated: false,
            finishing: false,
            stopped: false,
        }
    }
}

fn lock(buffer: &Mutex<WriteBuffer>) -> MutexGuard<'_, WriteBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live connection plus confirm channel.
pub struct LapinLink {
    id: LinkId,
    connection: Connection,
    channel: Channel,
    buffer: Arc<Mutex<WriteBuffer>>,
    wake: Arc<Notify>,
    writer: Option<JoinHandle<Result<(), PublishError>>>,
    watcher: JoinHandle<()>,
}

impl BrokerLink for LapinLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn try_publish(&mut self, message: &OutboundMessage) -> bool {
        let mut buffer = lock(&self.buffer);
        if buffer.stopped || buffer.finishing {
            return false;
        }
        if buffer.pending.len() >= buffer.capacity {
            buffer.saturated = true;
            return false;
        }
        buffer.pending.push_back(message.clone());
        drop(buffer);
        self.wake.notify_one();
        true
    }

    fn recover(&mut self) -> Vec<OutboundMessage> {
        let mut buffer = lock(&self.buffer);
        buffer.stopped = true;
        let mut recovered: Vec<OutboundMessage> =
            std::mem::take(&mut buffer.unconfirmed).into_values().collect();
        recovered.extend(buffer.pending.drain(..));
        drop(buffer);
        self.wake.notify_one();
        recovered
    }

    async fn wait_for_confirms(&mut self) -> Result<(), PublishError> {
        lock(&self.buffer).finishing = true;
        self.wake.notify_one();
        match self.writer.take() {
            Some(writer) => writer
                .await
                .map_err(|e| PublishError::Channel(format!("writer task failed: {e}")))?,
            None => Ok(()),
        }
    }

    async fn close(mut self) {
        self.watcher.abort();
        lock(&self.buffer).stopped = true;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }

        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(CLOSE_REPLY_CODE, "closing").await {
                warn!(link = %self.id, error = %e, "failed to close AMQP channel");
            }
        }
        shutdown_connection(&self.connection).await;
        debug!(link = %self.id, "AMQP link closed");
    }
}

async fn shutdown_connection(connection: &Connection) {
    if connection.status().connected() {
        if let Err(e) = connection.close(CLOSE_REPLY_CODE, "closing").await {
            warn!(error = %e, "failed to close AMQP connection");
        }
    }
}

enum Step {
    Publish {
        seq: u64,
        message: OutboundMessage,
        writable: bool,
    },
    Idle,
    Done,
    Stop,
}

fn next_step(buffer: &Mutex<WriteBuffer>) -> Step {
    let mut buffer = lock(buffer);
    if buffer.stopped {
        return Step::Stop;
    }
    match buffer.pending.pop_front() {
        Some(message) => {
            let seq = buffer.next_seq;
            buffer.next_seq += 1;
            buffer.unconfirmed.insert(seq, message.clone());
            let writable = std::mem::take(&mut buffer.saturated);
            Step::Publish {
                seq,
                message,
                writable,
            }
        }
        None if buffer.finishing => Step::Done,
        None => Step::Idle,
    }
}

/// Publishes everything handed over by [`LapinLink::try_publish`] and settles
/// the broker's confirms. Ends once finishing was requested and every confirm
/// is in, or as soon as the link is stopped.
async fn write_loop(
    id: LinkId,
    channel: Channel,
    exchange: String,
    buffer: Arc<Mutex<WriteBuffer>>,
    wake: Arc<Notify>,
    events: EventSink,
) -> Result<(), PublishError> {
    let mut confirms = FuturesUnordered::new();
    let mut nacked = 0usize;

    loop {
        match next_step(&buffer) {
            Step::Stop => return Ok(()),
            Step::Done => break,
            Step::Idle => {
                tokio::select! {
                    _ = wake.notified() => {}
                    Some((seq, confirmed)) = confirms.next(), if !confirms.is_empty() => {
                        nacked += settle(id, &buffer, seq, confirmed, &events)?;
                    }
                }
            }
            Step::Publish {
                seq,
                message,
                writable,
            } => {
                if writable {
                    events.emit(id, BrokerEvent::Writable);
                }
                let published = channel
                    .basic_publish(
                        &exchange,
                        &message.routing_key,
                        BasicPublishOptions::default(),
                        &message.body(),
                        properties(&message.options),
                    )
                    .await;
                match published {
                    Ok(confirm) => confirms.push(async move { (seq, confirm.await) }),
                    Err(e) => {
                        let reason = e.to_string();
                        events.emit(id, BrokerEvent::ChannelClosed(reason.clone()));
                        return Err(PublishError::Channel(reason));
                    }
                }
            }
        }
    }

    while let Some((seq, confirmed)) = confirms.next().await {
        nacked += settle(id, &buffer, seq, confirmed, &events)?;
    }

    if nacked > 0 {
        return Err(PublishError::Channel(format!(
            "broker rejected {nacked} message(s)"
        )));
    }
    Ok(())
}

/// An acked message leaves the buffer; a nacked one stays so a later
/// [`BrokerLink::recover`] re-sends it.
fn settle(
    id: LinkId,
    buffer: &Mutex<WriteBuffer>,
    seq: u64,
    confirmed: lapin::Result<Confirmation>,
    events: &EventSink,
) -> Result<usize, PublishError> {
    match confirmed {
        Ok(Confirmation::Nack(_)) => {
            warn!(link = %id, "broker nacked a log message");
            Ok(1)
        }
        Ok(_) => {
            lock(buffer).unconfirmed.remove(&seq);
            Ok(0)
        }
        Err(e) => {
            let reason = e.to_string();
            events.emit(id, BrokerEvent::ChannelClosed(reason.clone()));
            Err(PublishError::Channel(reason))
        }
    }
}

/// Polls connection and channel status, reporting flow control and loss.
async fn watch_status(
    id: LinkId,
    status: lapin::ConnectionStatus,
    channel: Channel,
    events: EventSink,
) {
    let mut blocked = false;
    let mut ticker = tokio::time::interval(STATUS_POLL);
    loop {
        ticker.tick().await;

        if status.closed() || status.errored() {
            events.emit(id, BrokerEvent::Closed);
            return;
        }
        if !channel.status().connected() {
            events.emit(id, BrokerEvent::ChannelClosed("channel closed by broker".into()));
            return;
        }

        let now_blocked = status.blocked();
        if now_blocked != blocked {
            blocked = now_blocked;
            let event = if blocked {
                BrokerEvent::Blocked
            } else {
                BrokerEvent::Unblocked
            };
            events.emit(id, event);
        }
    }
}

fn properties(options: &PublishOptions) -> BasicProperties {
    let mut headers = FieldTable::default();
    for (name, value) in &options.headers {
        headers.insert(
            ShortString::from(name.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }

    BasicProperties::default()
        .with_message_id(ShortString::from(options.message_id.to_string()))
        .with_correlation_id(ShortString::from(options.correlation_id.to_string()))
        .with_timestamp(options.timestamp.max(0) as u64)
        .with_delivery_mode(if options.persistent { 2 } else { 1 })
        .with_content_type(ShortString::from(options.content_type.clone()))
        .with_content_encoding(ShortString::from(options.content_encoding.clone()))
        .with_headers(headers)
}
