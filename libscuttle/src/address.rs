//! Multiserver addresses
//!
//! Peers advertise themselves as `net:<host>:<port>~shs:<base64 public key>`.
//! Only the TCP transport with the secret handshake is understood.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::identity::FeedId;

/// Parsed `net:host:port~shs:key` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MultiserverAddress {
    /// Hostname or IP address (IPv6 without brackets)
    pub host: String,

    /// TCP port number
    pub port: u16,

    /// Long-term public key of the peer
    pub key: FeedId,
}

impl MultiserverAddress {
    pub fn new(host: impl Into<String>, port: u16, key: FeedId) -> Self {
        Self {
            host: host.into(),
            port,
            key,
        }
    }

    /// Parse a multiserver address string
    pub fn parse(address: &str) -> Result<Self, DecodeError> {
        let invalid = |reason: String| DecodeError::Address(reason);

        let (connection, auth) = address.split_once('~').ok_or_else(|| {
            invalid(format!(
                "expected 'net:host:port~shs:key', got '{}'",
                address
            ))
        })?;

        let rest = connection.strip_prefix("net:").ok_or_else(|| {
            invalid(format!(
                "unsupported transport in '{}': only 'net' (TCP/IP) is supported",
                connection
            ))
        })?;

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid(format!("expected 'net:host:port', got '{}'", connection)))?;
        if host.is_empty() {
            return Err(invalid("host cannot be empty".to_string()));
        }
        let port = port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
            invalid(format!(
                "invalid port number '{}': must be between 1 and 65535",
                port
            ))
        })?;

        let key = auth.strip_prefix("shs:").ok_or_else(|| {
            invalid(format!(
                "unsupported auth method in '{}': only 'shs' (Secret Handshake) is supported",
                auth
            ))
        })?;
        let key = FeedId::from_base64(key)
            .map_err(|_| invalid(format!("invalid public key '{}'", key)))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Ok(Self::new(host, port, key))
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for MultiserverAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "net:{}:{}~shs:{}",
            self.host,
            self.port,
            self.key.to_base64()
        )
    }
}

impl FromStr for MultiserverAddress {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MultiserverAddress {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MultiserverAddress> for String {
    fn from(address: MultiserverAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "I/4cyN/jPBbDsikbHzAEvmaYlaJK33lW3UhWjNXjyrU=";

    #[test]
    fn test_address_parsing() {
        let address = MultiserverAddress::parse(&format!("net:hermies.club:8008~shs:{}", KEY))
            .unwrap();

        assert_eq!(address.host, "hermies.club");
        assert_eq!(address.port, 8008);
        assert_eq!(address.key.to_base64(), KEY);
        assert_eq!(address.socket_addr(), "hermies.club:8008");
    }

    #[test]
    fn test_address_to_string_roundtrip() {
        let text = format!("net:192.168.1.4:8008~shs:{}", KEY);
        let address: MultiserverAddress = text.parse().unwrap();
        assert_eq!(address.to_string(), text);
    }

    #[test]
    fn test_address_ipv6() {
        let address = MultiserverAddress::parse(&format!("net:::1:8008~shs:{}", KEY)).unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.socket_addr(), "[::1]:8008");
    }

    #[test]
    fn test_address_parsing_invalid() {
        for bad in [
            "invalid-address".to_string(),
            format!("ws:hermies.club:8008~shs:{}", KEY),
            format!("net:hermies.club:8008~noauth:{}", KEY),
            format!("net:hermies.club~shs:{}", KEY),
            format!("net::8008~shs:{}", KEY),
            format!("net:hermies.club:0~shs:{}", KEY),
            format!("net:hermies.club:70000~shs:{}", KEY),
            "net:hermies.club:8008~shs:AAAA".to_string(),
        ] {
            assert!(
                matches!(MultiserverAddress::parse(&bad), Err(DecodeError::Address(_))),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_address_serde() {
        let text = format!("net:localhost:8008~shs:{}", KEY);
        let json = serde_json::to_string(&text).unwrap();
        let address: MultiserverAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&address).unwrap(), json);
    }
}
