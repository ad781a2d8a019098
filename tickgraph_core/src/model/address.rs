//! Transport address grammar: `uart:<device-path>` | `ip:<host>[:<port>]` | `local`
//!
//! `memory:<name>` additionally addresses the in-process [`MemoryNetwork`]
//! used for simulation and tests.
//!
//! [`MemoryNetwork`]: crate::communication::transport::memory::MemoryNetwork

use crate::error::{TickError, TickResult};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportAddress {
    /// Serial device, e.g. `uart:/dev/ttyUSB0`
    Uart { device: String },
    /// Host name or literal with optional port, e.g. `ip:10.42.0.60` or `ip:esp32.local:7070`
    Ip { host: String, port: Option<u16> },
    /// Run the remote model in-process
    Local,
    /// Named in-process channel
    Memory { name: String },
}

impl TransportAddress {
    pub fn parse(raw: &str) -> TickResult<Self> {
        let invalid = |reason: &str| TickError::InvalidAddress {
            address: raw.to_string(),
            reason: reason.to_string(),
        };

        let raw_trimmed = raw.trim();
        if raw_trimmed == "local" {
            return Ok(Self::Local);
        }
        let (scheme, rest) = raw_trimmed
            .split_once(':')
            .ok_or_else(|| invalid("expected 'uart:<device>', 'ip:<host>' or 'local'"))?;
        if rest.is_empty() {
            return Err(invalid("address body is empty"));
        }

        match scheme {
            "uart" => Ok(Self::Uart {
                device: rest.to_string(),
            }),
            "ip" => {
                // Bracketed IPv6 literal: ip:[::1]:7070
                if let Some(stripped) = rest.strip_prefix('[') {
                    let end = stripped
                        .find(']')
                        .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
                    let host = &stripped[..end];
                    let port = match &stripped[end + 1..] {
                        "" => None,
                        p => Some(parse_port(p.trim_start_matches(':')).map_err(|r| invalid(&r))?),
                    };
                    return Ok(Self::Ip {
                        host: host.to_string(),
                        port,
                    });
                }
                match rest.rsplit_once(':') {
                    Some((host, port)) if !host.contains(':') => {
                        if host.is_empty() {
                            return Err(invalid("host is empty"));
                        }
                        Ok(Self::Ip {
                            host: host.to_string(),
                            port: Some(parse_port(port).map_err(|r| invalid(&r))?),
                        })
                    }
                    // Bare IPv6 literal without port
                    Some(_) => Ok(Self::Ip {
                        host: rest.to_string(),
                        port: None,
                    }),
                    None => Ok(Self::Ip {
                        host: rest.to_string(),
                        port: None,
                    }),
                }
            }
            "memory" => Ok(Self::Memory {
                name: rest.to_string(),
            }),
            other => Err(invalid(&format!("unknown transport scheme '{}'", other))),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Uart { .. } => "uart",
            Self::Ip { .. } => "ip",
            Self::Local => "local",
            Self::Memory { .. } => "memory",
        }
    }
}

/// Port 0 parses; it only makes sense for a listener, which then binds an
/// ephemeral port.
fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse::<u16>()
        .map_err(|_| format!("invalid port '{}'", raw))
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uart { device } => write!(f, "uart:{}", device),
            Self::Ip { host, port } => {
                let host = if host.contains(':') {
                    format!("[{}]", host)
                } else {
                    host.clone()
                };
                match port {
                    Some(port) => write!(f, "ip:{}:{}", host, port),
                    None => write!(f, "ip:{}", host),
                }
            }
            Self::Local => write!(f, "local"),
            Self::Memory { name } => write!(f, "memory:{}", name),
        }
    }
}

impl FromStr for TransportAddress {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportAddress::parse(s)
    }
}
