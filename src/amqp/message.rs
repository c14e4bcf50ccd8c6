//! Outbound message layout and the translation of [`LogEvent`]s into it.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::chunk::{chunkify, short_eid};
use crate::config::{AmqpSettings, Format};
use crate::diagnostics::process_name;
use crate::event::{Facility, Level, LogArg, LogEvent};
use crate::utils::error::PublishError;

/// Version of the header layout.
pub const HEADER_VERSION: &str = "1.0.0";

/// Body of a message, kept structured until it is written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    /// UTF-8 bytes of the payload as they go on the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Json(value) => value.to_string().into_bytes(),
            Payload::Binary(bytes) => bytes.clone(),
        }
    }

    /// Interprets a received body according to its content type.
    ///
    /// JSON types are parsed, `application/octet-stream` stays binary and
    /// anything else is treated as (lossy) UTF-8 text.
    pub fn decode(content_type: &str, body: &[u8]) -> Result<Payload, PublishError> {
        match content_type {
            "application/json" | "text/json" => Ok(Payload::Json(serde_json::from_slice(body)?)),
            "application/octet-stream" => Ok(Payload::Binary(body.to_vec())),
            _ => Ok(Payload::Text(String::from_utf8_lossy(body).into_owned())),
        }
    }
}

/// AMQP basic properties attached to every message.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    /// Unix epoch seconds.
    pub timestamp: i64,
    pub persistent: bool,
    pub content_type: String,
    pub content_encoding: String,
    pub headers: BTreeMap<String, String>,
}

impl PublishOptions {
    pub fn new(content_type: &str, timestamp: i64, headers: BTreeMap<String, String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            timestamp,
            persistent: true,
            content_type: content_type.to_string(),
            content_encoding: "utf8".to_string(),
            headers,
        }
    }
}

/// A message waiting in the queue for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub payload: Payload,
    pub routing_key: String,
    pub options: PublishOptions,
}

impl OutboundMessage {
    /// A persistent JSON message with fresh ids and the current time.
    pub fn json(routing_key: impl Into<String>, value: Value) -> Self {
        Self {
            payload: Payload::Json(value),
            routing_key: routing_key.into(),
            options: PublishOptions::new(
                Format::Json.content_type(),
                chrono::Utc::now().timestamp(),
                BTreeMap::new(),
            ),
        }
    }

    pub fn body(&self) -> Vec<u8> {
        self.payload.encode()
    }
}

/// Turns log events into outbound messages for one process and configuration.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    process: String,
    pid: u32,
    level: Level,
    facility: Facility,
    route_key_prefix: String,
    format: Format,
    environment: String,
    chunk_size: Option<usize>,
}

impl MessageBuilder {
    pub fn from_settings(settings: &AmqpSettings) -> Self {
        Self {
            process: process_name(),
            pid: std::process::id(),
            level: settings.level,
            facility: settings.facility,
            route_key_prefix: settings.route_key_prefix.clone(),
            format: settings.format,
            environment: settings.environment.clone(),
            chunk_size: settings.chunk_size,
        }
    }

    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = process.into();
        self
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Whether an event of `level` is forwarded at all.
    pub fn accepts(&self, level: Level) -> bool {
        level >= self.level
    }

    pub fn routing_key(&self, level: Level) -> String {
        format!(
            "{}.{}.{}.{}",
            self.route_key_prefix, self.process, self.facility, level
        )
    }

    pub fn headers(&self, event: &LogEvent) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Version".to_string(), HEADER_VERSION.to_string()),
            ("Host".to_string(), event.host.clone()),
            ("Process".to_string(), self.process.clone()),
            ("Level".to_string(), event.level.to_string()),
            ("Facility".to_string(), self.facility.to_string()),
            (
                "Created".to_string(),
                event.created.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("Node-Env".to_string(), self.environment.clone()),
        ])
    }

    /// One message per chunk for text payloads, exactly one for JSON.
    pub fn build(&self, event: &LogEvent) -> Vec<OutboundMessage> {
        let headers = self.headers(event);
        let routing_key = self.routing_key(event.level);
        // Unix seconds, rounded to the nearest second.
        let timestamp = (event.created.timestamp_millis() + 500).div_euclid(1000);
        let content_type = self.format.content_type();

        let payloads = match self.format {
            Format::Text => {
                let texts = match self.chunk_size {
                    Some(size) if event.message.len() > size => {
                        let eid = event.eid.clone().unwrap_or_else(short_eid);
                        chunkify(&event.message, &eid, size)
                    }
                    _ => vec![event.message.clone()],
                };
                texts
                    .into_iter()
                    .map(|text| Payload::Text(self.text_line(&headers, &text)))
                    .collect()
            }
            Format::Json => vec![Payload::Json(json_payload(event, &headers))],
        };

        payloads
            .into_iter()
            .map(|payload| OutboundMessage {
                payload,
                routing_key: routing_key.clone(),
                options: PublishOptions::new(content_type, timestamp, headers.clone()),
            })
            .collect()
    }

    fn text_line(&self, headers: &BTreeMap<String, String>, message: &str) -> String {
        let field = |name: &str| headers.get(name).map(String::as_str).unwrap_or_default();
        format!(
            "{} {} {}[{}]: {}",
            field("Created"),
            field("Host"),
            self.process,
            self.pid,
            message
        )
    }
}

/// Builds the `application/json` body.
///
/// Consumers such as Splunk neither keep AMQP headers nor search inside JSON
/// arrays, so the headers are repeated under `log_metadata` and arrays are
/// turned into objects keyed by index.
fn json_payload(event: &LogEvent, headers: &BTreeMap<String, String>) -> Value {
    let mut payload = Map::new();
    let mut data = event.data.as_slice();

    let mut log_message = if event.message.is_empty() {
        Value::Null
    } else {
        Value::String(event.message.clone())
    };

    if event.message.is_empty() {
        if let Some((LogArg::Error { name, message }, rest)) = data.split_first() {
            log_message = Value::String(message.clone());
            payload.insert("log_name".to_string(), Value::String(name.clone()));
            data = rest;
        }
    }

    payload.insert("log_message".to_string(), log_message);
    let details = Value::Array(data.iter().map(LogArg::to_value).collect());
    payload.insert("log_details".to_string(), arrays_to_objects(details));
    payload.insert("log_metadata".to_string(), json!(headers));
    Value::Object(payload)
}

/// Recursively replaces arrays by objects keyed `"0"`, `"1"`, ...
pub fn arrays_to_objects(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), arrays_to_objects(item)))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, arrays_to_objects(item)))
                .collect(),
        ),
        other => other,
    }
}
