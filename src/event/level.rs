//! Log severity names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::ParseError;

/// Severity of a [`LogEvent`](super::LogEvent), ordered from least to most severe.
///
/// The names double as the `Level` header and the last segment of the routing key,
/// so they are kept in their upper-case wire spelling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Silly,
    Debug,
    Verbose,
    Info,
    Notice,
    Warn,
    Error,
    Crit,
    Alert,
    Emerg,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Silly => "SILLY",
            Level::Debug => "DEBUG",
            Level::Verbose => "VERBOSE",
            Level::Info => "INFO",
            Level::Notice => "NOTICE",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Crit => "CRIT",
            Level::Alert => "ALERT",
            Level::Emerg => "EMERG",
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ParseError;

    /// Case-insensitive; `WARNING` and `ERR` are accepted as synonyms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_uppercase().as_str() {
            "SILLY" => Level::Silly,
            "DEBUG" => Level::Debug,
            "VERBOSE" => Level::Verbose,
            "INFO" => Level::Info,
            "NOTICE" => Level::Notice,
            "WARN" | "WARNING" => Level::Warn,
            "ERROR" | "ERR" => Level::Error,
            "CRIT" | "CRITICAL" => Level::Crit,
            "ALERT" => Level::Alert,
            "EMERG" => Level::Emerg,
            _ => return Err(ParseError::Level(s.to_string())),
        };
        Ok(level)
    }
}

impl TryFrom<String> for Level {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, ParseError> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}
