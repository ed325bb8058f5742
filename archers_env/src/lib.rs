//! Archer Environment Abstraction Layer
//!
//! This crate provides the transport and clock abstraction that lets an
//! archer line run over a real network (TCP) or inside an in-memory
//! simulation without changing the relay logic.
//!
//! # Core Concept: Channels per Direction
//!
//! Every archer knows at most two peers. Messages are told apart by the
//! channel they arrive on rather than by their content:
//! - `/fromleft`: the sender is my left neighbour
//! - `/fromright`: the sender is my right neighbour
//!
//! A stream is opened per message, written once and closed. Closing is what
//! delivers it to the listener on the far side.
//!
//! # Transports
//!
//! - [`TcpTransport`]: one TCP connection per stream (production)
//! - [`MemoryTransport`]: in-process queues (tests, simulation)
//!
//! # Example
//!
//! ```ignore
//! use archers_env::{Channel, PeerTransport};
//!
//! async fn echo<Net: PeerTransport>(net: &Net) -> Result<(), archers_env::EnvError> {
//!     let mut inbound = net.listen(Channel::FromLeft)?;
//!     while let Some(stream) = inbound.recv().await {
//!         let mut out = net.open_stream(stream.sender(), Channel::FromRight).await?;
//!         out.write(stream.read());
//!         out.close().await?;
//!     }
//!     Ok(())
//! }
//! ```

mod context;
mod error;
mod memory_impl;
mod network;
mod stream;
mod tcp_impl;
mod tokio_impl;
mod types;

pub use context::ArcherContext;
pub use error::EnvError;
pub use memory_impl::{MemoryNetwork, MemoryTransport};
pub use network::{PeerTransport, TransportProvider};
pub use stream::{InboundStream, OutboundStream, QueueSink, StreamSink};
pub use tcp_impl::{TcpProvider, TcpTransport};
pub use tokio_impl::TokioContext;
pub use types::{Channel, NodeId, PeerInfo};
