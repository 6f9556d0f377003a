use crate::types::{PeerAddress, PeerId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("'{0}' is not a valid period (expected seconds or a value like 500ms, 2s, 1m)")]
    InvalidPeriod(String),
    #[error("period must be greater than zero")]
    ZeroPeriod,
    #[error("'{0}' is not a valid peer address (expected id=host:port)")]
    InvalidPeerAddr(String),
}

/// Static settings the node core runs with. Built once at startup.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub id: PeerId,
    pub listen_host: String,
    pub listen_port: u16,
    pub discovery_interval: Duration,
    pub message_interval: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl NodeConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

/// Parse a period given either as whole seconds (`"5"`) or with a unit suffix
/// (`"250ms"`, `"5s"`, `"2m"`, `"1h"`).
pub fn parse_period(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidPeriod(s.to_string());

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let period = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };

    if period.is_zero() {
        return Err(ConfigError::ZeroPeriod);
    }
    Ok(period)
}

/// Parse one `id=host:port` override.
pub fn parse_peer_addr(s: &str) -> Result<(PeerId, PeerAddress), ConfigError> {
    let invalid = || ConfigError::InvalidPeerAddr(s.to_string());

    let (id, addr) = s.trim().split_once('=').ok_or_else(invalid)?;
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if id.is_empty() || host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;

    Ok((PeerId::new(id), PeerAddress::new(host, port)))
}
