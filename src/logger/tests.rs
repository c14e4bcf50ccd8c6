use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use futures_util::future::{self, BoxFuture};
use serde_json::json;
use tempfile::TempDir;

use super::{AmqpTransport, ConsoleTransport, Logger, Transport};
use crate::amqp::Publisher;
use crate::amqp::fake::FakeBroker;
use crate::config::{AmqpSettings, ConsoleSettings};
use crate::event::{Level, LogArg, LogEvent};

#[derive(Clone, Default)]
struct Recorder {
    level: Option<Level>,
    seen: Arc<Mutex<Vec<LogEvent>>>,
    ended: Arc<Mutex<bool>>,
}

impl Transport for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn min_level(&self) -> Level {
        self.level.unwrap_or(Level::Silly)
    }

    fn log(&self, event: &LogEvent) {
        self.seen.lock().unwrap().push(event.clone());
    }

    fn end(&self) -> BoxFuture<'_, ()> {
        *self.ended.lock().unwrap() = true;
        Box::pin(future::ready(()))
    }
}

#[test]
fn test_console_render_without_timestamp() {
    let console = ConsoleTransport::new(&ConsoleSettings::default());
    let event = LogEvent::new(Level::Warn, "disk almost full");
    assert_eq!(console.render(&event), "[WARN] disk almost full");
}

#[test]
fn test_console_render_with_timestamp_and_data() {
    let console = ConsoleTransport::new(&ConsoleSettings {
        timestamp: true,
        ..ConsoleSettings::default()
    });
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let event = LogEvent::new(Level::Info, "request")
        .with_created(created)
        .with_data(vec![LogArg::Value(json!({"status": 200}))]);
    assert_eq!(
        console.render(&event),
        "[2024-05-01T12:30:00.000Z] [INFO] request [{\"status\":200}]"
    );
}

#[tokio::test]
async fn test_logger_applies_each_transport_level() {
    let verbose = Recorder::default();
    let quiet = Recorder {
        level: Some(Level::Error),
        ..Recorder::default()
    };
    let transports: Vec<Box<dyn Transport>> =
        vec![Box::new(verbose.clone()), Box::new(quiet.clone())];
    let logger = Logger::with_transports(transports);

    logger.debug("trace me");
    logger.error("broken");
    logger.log(Level::Emerg, "", vec![LogArg::error("Panic", "gone")]);

    assert_eq!(verbose.seen.lock().unwrap().len(), 3);
    let quiet_seen: Vec<Level> = quiet.seen.lock().unwrap().iter().map(|e| e.level).collect();
    assert_eq!(quiet_seen, vec![Level::Error, Level::Emerg]);

    logger.close().await;
    assert!(*verbose.ended.lock().unwrap());
    assert!(*quiet.ended.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_amqp_transport_delivers_on_close() {
    let notes = TempDir::new().expect("tempdir");
    let settings = AmqpSettings {
        crash_note_dir: notes.path().to_path_buf(),
        ..AmqpSettings::default()
    };
    let broker = FakeBroker::new();
    broker.set_accepting(false);
    let publisher = Publisher::with_connector(&settings, broker.connector())
        .await
        .expect("connect");

    let transport = AmqpTransport::new(publisher.clone(), settings.level);
    let transports: Vec<Box<dyn Transport>> = vec![Box::new(transport)];
    let logger = Logger::with_transports(transports);
    logger.info("one");
    logger.debug("filtered out");
    logger.warn("two");

    let status = publisher.status().await.expect("status");
    assert_eq!(status.queued, 2);

    broker.set_accepting(true);
    let closing = tokio::spawn(logger.close());
    broker.emit(crate::amqp::BrokerEvent::Writable);
    closing.await.expect("close");

    assert_eq!(broker.delivered().len(), 2);
    assert!(publisher.is_closed());
}
