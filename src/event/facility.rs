//! syslog facility names.
//!
//! The facility is only a tag here: it ends up in the `Facility` header and in
//! the routing key, so only the names matter, not the `<syslog.h>` codes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::ParseError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Facility {
    /// kernel messages
    Kern,
    /// random user-level messages
    User,
    /// mail system
    Mail,
    /// system daemons
    Daemon,
    /// security/authorization messages
    Auth,
    /// messages generated internally by syslogd
    Syslog,
    /// line printer subsystem
    Lpr,
    /// network news subsystem
    News,
    /// UUCP subsystem
    Uucp,
    /// clock daemon
    Cron,
    /// security/authorization messages (private)
    AuthPriv,
    /// ftp daemon
    Ftp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl Default for Facility {
    fn default() -> Self {
        Facility::Local0
    }
}

impl Facility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facility::Kern => "KERN",
            Facility::User => "USER",
            Facility::Mail => "MAIL",
            Facility::Daemon => "DAEMON",
            Facility::Auth => "AUTH",
            Facility::Syslog => "SYSLOG",
            Facility::Lpr => "LPR",
            Facility::News => "NEWS",
            Facility::Uucp => "UUCP",
            Facility::Cron => "CRON",
            Facility::AuthPriv => "AUTHPRIV",
            Facility::Ftp => "FTP",
            Facility::Local0 => "LOCAL0",
            Facility::Local1 => "LOCAL1",
            Facility::Local2 => "LOCAL2",
            Facility::Local3 => "LOCAL3",
            Facility::Local4 => "LOCAL4",
            Facility::Local5 => "LOCAL5",
            Facility::Local6 => "LOCAL6",
            Facility::Local7 => "LOCAL7",
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facility {
    type Err = ParseError;

    /// Accepts the name with or without a `LOG_` prefix, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("LOG_").unwrap_or(&upper);
        let facility = match name {
            "KERN" => Facility::Kern,
            "USER" => Facility::User,
            "MAIL" => Facility::Mail,
            "DAEMON" => Facility::Daemon,
            "AUTH" => Facility::Auth,
            "SYSLOG" => Facility::Syslog,
            "LPR" => Facility::Lpr,
            "NEWS" => Facility::News,
            "UUCP" => Facility::Uucp,
            "CRON" => Facility::Cron,
            "AUTHPRIV" => Facility::AuthPriv,
            "FTP" => Facility::Ftp,
            "LOCAL0" => Facility::Local0,
            "LOCAL1" => Facility::Local1,
            "LOCAL2" => Facility::Local2,
            "LOCAL3" => Facility::Local3,
            "LOCAL4" => Facility::Local4,
            "LOCAL5" => Facility::Local5,
            "LOCAL6" => Facility::Local6,
            "LOCAL7" => Facility::Local7,
            _ => return Err(ParseError::Facility(s.to_string())),
        };
        Ok(facility)
    }
}

impl TryFrom<String> for Facility {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Facility> for String {
    fn from(facility: Facility) -> Self {
        facility.as_str().to_string()
    }
}
