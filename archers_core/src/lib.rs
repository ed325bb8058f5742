//! Archers Core - a line of archers that fire in a staggered volley.
//!
//! N archers stand in a line. Each one knows only its left and right
//! neighbour. A counter is relayed from the head to the tail and back, and
//! every archer fires after waiting as many units as the counter it holds:
//!
//! 1. **Chain Builder** (`chain`): wires the line, handshake by handshake
//! 2. **Relay State Machine** (`relay`): pure step per inbound message
//! 3. **Fire Scheduler** (`fire`): the timed terminal action
//! 4. **Archer Runtime** (`archer`): listeners that drive the state machine
//!    over an `archers_env::PeerTransport`
//!
//! # Usage
//!
//! ```ignore
//! use archers_core::{ArcherConfig, Chain};
//! use archers_env::{MemoryNetwork, TokioContext};
//!
//! let ctx = TokioContext::shared();
//! let config = ArcherConfig::default().with_start(ctx.now());
//! let chain = Chain::build(ctx, &MemoryNetwork::new(), config, 5).await?;
//!
//! let mut running = chain.launch();
//! running.start().await?;
//! let fires = running.collect_fires(running.round_trip_estimate()).await;
//! ```

pub mod archer;
pub mod chain;
pub mod fire;
pub mod message;
pub mod relay;

// Re-export key types for convenience
pub use archer::{Archer, ArcherConfig, ArcherHandle};
pub use chain::{Chain, ChainError, Link, RunningChain};
pub use fire::{FireEvent, FireScheduler, FireSink};
pub use message::{CodecError, Message};
pub use relay::{originate, relay, Position, RelayError, RelayStep, Side};
