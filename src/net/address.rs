//! Proxy address type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Host/port pair identifying one proxy.
///
/// Used as the key of every roster map, so it is cheap to clone and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid proxy address '{input}': {reason}")]
pub struct AddressParseError {
    input: String,
    reason: &'static str,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| AddressParseError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            // [v6]:port
            let (host, tail) = rest.split_once(']').ok_or_else(|| err("unterminated '['"))?;
            let port = tail.strip_prefix(':').ok_or_else(|| err("missing port"))?;
            (host, port)
        } else {
            trimmed.rsplit_once(':').ok_or_else(|| err("missing port"))?
        };

        if host.is_empty() {
            return Err(err("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| err("port is not a number"))?;

        Ok(Address::new(host, port))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        let addr: Address = "proxy-1.dc-a.example:9013".parse().unwrap();
        assert_eq!(addr.host(), "proxy-1.dc-a.example");
        assert_eq!(addr.port(), 9013);
        assert_eq!(addr.to_string(), "proxy-1.dc-a.example:9013");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let addr: Address = "[::1]:9013".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:9013");
    }

    #[test]
    fn rejects_garbage() {
        assert!("no-port".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("host:http".parse::<Address>().is_err());
        assert!("[::1".parse::<Address>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let addr = Address::new("10.0.0.7", 9013);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.7:9013\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
