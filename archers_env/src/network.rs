//! Peer transport abstraction for archers.

use crate::error::EnvError;
use crate::stream::{InboundStream, OutboundStream};
use crate::types::{Channel, NodeId, PeerInfo};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Abstraction for point-to-point streams between archers.
///
/// # Implementations
///
/// - **Production**: [`TcpTransport`](crate::TcpTransport), one TCP
///   connection per stream
/// - **Simulation**: channel-based with fault injection (`archers_sim`)
///
/// # Stream Flow
///
/// ```text
/// Archer A                   Transport                  Archer B
///   |-- connect(B) ------------>|                          |
///   |                           |<---- listen(/fromleft) --|
///   |-- open_stream(B, ch) ---->|                          |
///   |-- write + close --------->|-- InboundStream -------->|
/// ```
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Returns the identity and address other nodes dial.
    fn local_info(&self) -> PeerInfo;

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId {
        self.local_info().id
    }

    /// Establishes a connection to a peer.
    ///
    /// # Returns
    /// * `Ok(())` - The peer answered; streams may now be opened to it
    /// * `Err(EnvError::ConnectionFailed | NodeUnreachable)` - Dial failed
    async fn connect(&self, peer: &PeerInfo) -> Result<(), EnvError>;

    /// Registers the single listener for an inbound channel.
    ///
    /// # Returns
    /// * `Ok(receiver)` - Every stream delivered on `channel` from now on
    /// * `Err(EnvError::HandlerExists)` - The channel already has a listener
    fn listen(&self, channel: Channel) -> Result<mpsc::Receiver<InboundStream>, EnvError>;

    /// Opens a write stream to a connected peer on the given channel.
    async fn open_stream(&self, peer: NodeId, channel: Channel) -> Result<OutboundStream, EnvError>;
}

/// Creates a fresh transport for each node of a chain.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    type Transport: PeerTransport;

    /// Creates the transport for the node at `index`.
    async fn create(&self, index: usize) -> Result<Arc<Self::Transport>, EnvError>;
}
