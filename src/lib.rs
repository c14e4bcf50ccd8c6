//! # amqp-logger
//!
//! `amqp-logger` ships structured log events to an AMQP 0-9-1 topic exchange
//! with at-least-once delivery. Events are queued in memory, written through a
//! publisher-confirms channel and held back while the broker applies flow
//! control or the connection is being re-established.
//!
//! ## Core Modules
//!
//! - `amqp`: The publishing pipeline: message layout, queue, connection state, reconnection.
//! - `config`: Loads settings from files and environment variables.
//! - `diagnostics`: Best-effort crash notes written when the broker misbehaves.
//! - `event`: Log levels, syslog facilities and the `LogEvent` record.
//! - `logger`: The facade applications log through, fanning out to transports.
//! - `utils`: Shared error types and the crate's own tracing setup.

pub mod amqp;
pub mod config;
pub mod diagnostics;
pub mod event;
pub mod logger;
pub mod utils;
