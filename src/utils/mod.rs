//! The `utils` module provides definitions shared across the `amqp-logger` crate.
//!
//! It centralizes the error types every other module returns and the
//! initialization of the crate's own diagnostic logging.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
