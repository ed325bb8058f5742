//! Common types for the archer environment abstraction.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Unique identifier for an archer node.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Everything a node needs to dial another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    /// The peer's identity
    pub id: NodeId,

    /// Listening address (None for in-memory transports)
    pub addr: Option<SocketAddr>,
}

impl PeerInfo {
    /// Peer reachable without a socket address.
    pub fn local(id: NodeId) -> Self {
        Self { id, addr: None }
    }

    /// Peer reachable at `addr`.
    pub fn at(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr: Some(addr),
        }
    }
}

impl std::fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{}@{}", self.id, addr),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Named inbound channel, identifying which neighbour a stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Sent by my left neighbour, travelling right
    FromLeft,

    /// Sent by my right neighbour, travelling left
    FromRight,
}

impl Channel {
    /// Both channels, in registration order.
    pub const ALL: [Channel; 2] = [Channel::FromLeft, Channel::FromRight];

    /// Wire name of the channel.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::FromLeft => "/fromleft",
            Channel::FromRight => "/fromright",
        }
    }

    /// Index into per-channel tables.
    pub fn index(&self) -> usize {
        match self {
            Channel::FromLeft => 0,
            Channel::FromRight => 1,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "/fromleft" => Ok(Channel::FromLeft),
            "/fromright" => Ok(Channel::FromRight),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}
