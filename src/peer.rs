//! # Peer Endpoints
//!
//! Peers are discovered through the tracker, which answers an announce
//! with a JSON document:
//!
//! ```json
//! {"peers": [{"id": "peer1", "ip": "127.0.0.1", "port": 8096}]}
//! ```
//!
//! The `id` is informational and only used for logging; the address pair
//! is what the worker dials.

use serde::Deserialize;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A peer endpoint as reported by the tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    /// Tracker-assigned identifier, for logging only
    #[serde(default)]
    pub id: String,
    /// IP address of the peer
    pub ip: IpAddr,
    /// TCP port the peer listens on
    pub port: u16,
}

impl Peer {
    /// The socket address to dial.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
