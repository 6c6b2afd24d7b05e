use crate::storage::Id160;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// A cluster member: its id and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub id: Id160,
    pub addr: SocketAddr,
}

impl PeerAddress {
    pub fn new(id: Id160, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", &self.id.to_hex()[..8], self.addr)
    }
}

/// Parses `<hex id>@<socket addr>`
impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| format!("expected <id>@<addr>, got {}", s))?;
        let id = Id160::from_hex(id).map_err(|e| e.to_string())?;
        let addr = addr
            .parse()
            .map_err(|e| format!("invalid address {}: {}", addr, e))?;
        Ok(Self { id, addr })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub bind_addr: SocketAddr,
    /// Timeout for one request/response exchange
    pub request_timeout: Duration,
    pub max_idle_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub max_concurrent_streams: u32,
    /// Largest frame read from a stream
    pub max_frame_size: usize,
    /// Accept any server certificate (INSECURE)
    pub insecure_skip_verify: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            request_timeout: Duration::from_secs(10),
            max_idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
            max_concurrent_streams: 100,
            max_frame_size: 16 * 1024 * 1024,
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub requests_sent: u64,
    pub requests_served: u64,
    pub failures: u64,
    pub active_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_address() {
        let id = Id160::from_u64(5);
        let peer: PeerAddress = format!("{}@127.0.0.1:7700", id).parse().unwrap();
        assert_eq!(peer.id, id);
        assert_eq!(peer.addr, "127.0.0.1:7700".parse().unwrap());

        assert!("127.0.0.1:7700".parse::<PeerAddress>().is_err());
        assert!(format!("{}@nowhere", id).parse::<PeerAddress>().is_err());
        assert!("xyz@127.0.0.1:7700".parse::<PeerAddress>().is_err());
    }
}
