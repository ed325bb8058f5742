//! Chain Builder - wires N archers into a line.
//!
//! Archers are created front to back. Each new archer shakes hands with the
//! previous one in both directions before the next is created, so a returned
//! [`Chain`] always has bidirectionally consistent links:
//!
//! ```text
//!  step 1:  [0]
//!  step 2:  [0] <-> [1]
//!  step 3:  [0] <-> [1] <-> [2]
//! ```
//!
//! Any failed handshake aborts the build; a partial line is never returned.

use crate::archer::{Archer, ArcherConfig, ArcherHandle};
use crate::fire::FireEvent;
use crate::relay::{RelayError, Side};
use archers_env::{ArcherContext, EnvError, NodeId, PeerTransport, TransportProvider};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Errors while building a line.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("A line needs at least one archer")]
    EmptyChain,

    /// The transport for archer `index` could not be created
    #[error("Archer {index}: transport setup failed: {source}")]
    Transport {
        index: usize,
        #[source]
        source: EnvError,
    },

    /// Archer `index` failed to link to its neighbour on `side`
    #[error("Archer {index}: handshake with {side} neighbour {peer} failed: {source}")]
    Handshake {
        index: usize,
        side: Side,
        peer: NodeId,
        #[source]
        source: EnvError,
    },
}

/// Neighbour references of one archer, for topology checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub id: NodeId,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

/// A fully wired line that has not started listening yet.
pub struct Chain<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    archers: Vec<Archer<Ctx, Net>>,
    config: ArcherConfig,
}

impl<Ctx, Net> Chain<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    /// Builds a line of `len` archers, one fresh transport each.
    pub async fn build<P>(context: Arc<Ctx>, provider: &P, config: ArcherConfig, len: usize) -> Result<Self, ChainError>
    where
        P: TransportProvider<Transport = Net>,
    {
        if len == 0 {
            return Err(ChainError::EmptyChain);
        }

        let mut archers: Vec<Archer<Ctx, Net>> = Vec::with_capacity(len);
        for index in 0..len {
            let transport = provider
                .create(index)
                .await
                .map_err(|source| ChainError::Transport { index, source })?;
            let mut archer = Archer::new(Arc::clone(&context), transport, config);

            if let Some(prev) = archers.last_mut() {
                let prev_info = prev.info();
                archer
                    .connect_left(&prev_info)
                    .await
                    .map_err(|source| ChainError::Handshake {
                        index,
                        side: Side::Left,
                        peer: prev_info.id,
                        source,
                    })?;

                let info = archer.info();
                prev.connect_right(&info)
                    .await
                    .map_err(|source| ChainError::Handshake {
                        index: index - 1,
                        side: Side::Right,
                        peer: info.id,
                        source,
                    })?;
            }

            info!("Archer {} joined the line at position {}", archer.id(), index + 1);
            archers.push(archer);
        }

        Ok(Self { archers, config })
    }

    pub fn len(&self) -> usize {
        self.archers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archers.is_empty()
    }

    /// Neighbour references, head first.
    pub fn topology(&self) -> Vec<Link> {
        self.archers
            .iter()
            .map(|a| Link {
                id: a.id(),
                left: a.left(),
                right: a.right(),
            })
            .collect()
    }

    /// Starts every archer's listeners. Fire events are collected by the
    /// returned [`RunningChain`].
    pub fn launch(self) -> RunningChain<Ctx, Net> {
        let (tx, fires) = mpsc::unbounded_channel();
        let archers = self
            .archers
            .into_iter()
            .map(|a| a.launch(tx.clone()))
            .collect();

        RunningChain {
            archers,
            config: self.config,
            fires,
        }
    }
}

/// A line whose archers are listening.
pub struct RunningChain<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    archers: Vec<ArcherHandle<Ctx, Net>>,
    config: ArcherConfig,
    fires: mpsc::UnboundedReceiver<FireEvent>,
}

impl<Ctx, Net> RunningChain<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    pub fn len(&self) -> usize {
        self.archers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archers.is_empty()
    }

    pub fn archers(&self) -> &[ArcherHandle<Ctx, Net>] {
        &self.archers
    }

    /// 1-indexed position of `id` in the line.
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.archers.iter().position(|a| a.id() == id).map(|i| i + 1)
    }

    /// Injects the first message at the head of the line.
    pub async fn start(&self) -> Result<(), RelayError> {
        match self.archers.first() {
            Some(head) => head.start().await,
            None => Ok(()),
        }
    }

    /// Upper bound on the time from `start` until the last archer fires.
    ///
    /// `2N - 1` paced hops plus `N` units. Archer `j` fires after
    /// `(2N - j)` hops and `j` units (the head after `2N - 2` hops and one
    /// unit), so no archer fires later than this.
    pub fn round_trip_estimate(&self) -> Duration {
        let n = self.archers.len() as u32;
        self.config.hop_delay.saturating_mul(n.saturating_mul(2).saturating_sub(1))
            + self.config.fire_unit.saturating_mul(n)
    }

    /// Collects fire events until every archer has fired or `within` elapses.
    pub async fn collect_fires(&mut self, within: Duration) -> Vec<FireEvent> {
        self.collect_fires_with(within, |_| {}).await
    }

    /// Like [`collect_fires`](Self::collect_fires), calling `on_fire` as each event arrives.
    pub async fn collect_fires_with<F>(&mut self, within: Duration, mut on_fire: F) -> Vec<FireEvent>
    where
        F: FnMut(&FireEvent),
    {
        let deadline = Instant::now() + within;
        let mut events = Vec::with_capacity(self.archers.len());

        while events.len() < self.archers.len() {
            match tokio::time::timeout_at(deadline, self.fires.recv()).await {
                Ok(Some(event)) => {
                    on_fire(&event);
                    events.push(event);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Gave up after {:?}: {}/{} archers fired",
                        within,
                        events.len(),
                        self.archers.len()
                    );
                    break;
                }
            }
        }
        events
    }
}
