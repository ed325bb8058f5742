//! Simulated network transport with fault injection.

use archers_env::{
    Channel, EnvError, InboundStream, MemoryNetwork, MemoryTransport, NodeId, OutboundStream, PeerInfo,
    PeerTransport, StreamSink, TransportProvider,
};
use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Bytes that replace the payload on a corrupted link.
const GARBLED: &[u8] = b"\x00\x7fgarbled";

/// In-memory network whose nodes get reproducible IDs and whose links can
/// be cut, made lossy, or made to corrupt traffic.
#[derive(Clone)]
pub struct SimNetwork {
    seed: u64,
    memory: MemoryNetwork,
    controller: Arc<SimNetworkController>,
}

impl SimNetwork {
    /// Creates a network where node `i` is `NodeId::from_seed(seed + i)`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            memory: MemoryNetwork::seeded(seed),
            controller: Arc::new(SimNetworkController::new(seed)),
        }
    }

    /// ID the node at `index` will get.
    pub fn node_id(&self, index: usize) -> NodeId {
        NodeId::from_seed(self.seed.wrapping_add(index as u64))
    }

    /// Fault injection handle.
    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }
}

#[async_trait]
impl TransportProvider for SimNetwork {
    type Transport = SimEndpoint;

    async fn create(&self, index: usize) -> Result<Arc<SimEndpoint>, EnvError> {
        Ok(Arc::new(SimEndpoint {
            inner: self.memory.create(index).await?,
            controller: Arc::clone(&self.controller),
        }))
    }
}

/// Simulated network interface for one archer.
pub struct SimEndpoint {
    inner: Arc<MemoryTransport>,
    controller: Arc<SimNetworkController>,
}

#[async_trait]
impl PeerTransport for SimEndpoint {
    fn local_info(&self) -> PeerInfo {
        self.inner.local_info()
    }

    async fn connect(&self, peer: &PeerInfo) -> Result<(), EnvError> {
        if !self.controller.can_communicate(self.local_id(), peer.id) {
            return Err(EnvError::unreachable(peer));
        }
        self.inner.connect(peer).await
    }

    fn listen(&self, channel: Channel) -> Result<mpsc::Receiver<InboundStream>, EnvError> {
        self.inner.listen(channel)
    }

    async fn open_stream(&self, peer: NodeId, channel: Channel) -> Result<OutboundStream, EnvError> {
        let from = self.local_id();
        if !self.controller.can_communicate(from, peer) || self.controller.is_cut(from, peer) {
            return Err(EnvError::unreachable(peer));
        }
        let sink = LinkSink {
            from,
            to: peer,
            inner: self.inner.sink_for(peer, channel)?,
            controller: Arc::clone(&self.controller),
        };
        Ok(OutboundStream::new(from, peer, channel, Box::new(sink)))
    }
}

/// Applies link faults to a stream on its way out.
struct LinkSink {
    from: NodeId,
    to: NodeId,
    inner: Box<dyn StreamSink>,
    controller: Arc<SimNetworkController>,
}

#[async_trait]
impl StreamSink for LinkSink {
    async fn deliver(self: Box<Self>, stream: InboundStream) -> Result<(), EnvError> {
        let LinkSink {
            from,
            to,
            inner,
            controller,
        } = *self;

        if controller.should_drop(from, to) {
            controller.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Link {} -> {} dropped stream", from, to);
            return Ok(());
        }

        let stream = if controller.is_corrupted(from, to) {
            controller.stats.corrupted.fetch_add(1, Ordering::Relaxed);
            debug!("Link {} -> {} corrupted stream", from, to);
            stream.with_payload(GARBLED.to_vec())
        } else {
            stream
        };

        inner.deliver(stream).await?;
        controller.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Counters kept by the controller.
#[derive(Debug, Default)]
struct LinkStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    corrupted: AtomicU64,
}

/// Snapshot of stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
    pub corrupted: u64,
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Per-link stream loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(NodeId, NodeId), f64>>,

    /// Links that replace every payload with garbage
    corrupted: Mutex<HashSet<(NodeId, NodeId)>>,

    /// One-way links on which streams can no longer be opened
    cut: Mutex<HashSet<(NodeId, NodeId)>>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<NodeId>, Vec<NodeId>)>>,

    /// Loss decisions
    rng: Mutex<ChaCha8Rng>,

    stats: LinkStats,
}

impl SimNetworkController {
    /// Creates a new network controller.
    pub fn new(seed: u64) -> Self {
        Self {
            link_loss: Mutex::new(HashMap::new()),
            corrupted: Mutex::new(HashSet::new()),
            cut: Mutex::new(HashSet::new()),
            partitions: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            stats: LinkStats::default(),
        }
    }

    /// Sets stream loss rate for a link.
    pub fn set_loss(&self, from: NodeId, to: NodeId, loss_rate: f64) {
        let mut losses = self.link_loss.lock().unwrap();
        losses.insert((from, to), loss_rate.clamp(0.0, 1.0));
    }

    /// Gets the loss rate for a link (default 0.0).
    pub fn get_loss(&self, from: NodeId, to: NodeId) -> f64 {
        let losses = self.link_loss.lock().unwrap();
        *losses.get(&(from, to)).unwrap_or(&0.0)
    }

    /// Makes every stream from `from` to `to` arrive undecodable.
    pub fn corrupt_link(&self, from: NodeId, to: NodeId) {
        self.corrupted.lock().unwrap().insert((from, to));
    }

    pub fn is_corrupted(&self, from: NodeId, to: NodeId) -> bool {
        self.corrupted.lock().unwrap().contains(&(from, to))
    }

    /// Makes opening a stream from `from` to `to` fail. `connect` and the
    /// reverse direction are unaffected.
    pub fn cut_link(&self, from: NodeId, to: NodeId) {
        self.cut.lock().unwrap().insert((from, to));
    }

    pub fn is_cut(&self, from: NodeId, to: NodeId) -> bool {
        self.cut.lock().unwrap().contains(&(from, to))
    }

    /// Creates a network partition between two groups.
    pub fn partition(&self, group_a: Vec<NodeId>, group_b: Vec<NodeId>) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions.push((group_a, group_b));
    }

    /// Heals all partitions and clears loss, corruption and cut links.
    pub fn heal_all(&self) {
        self.partitions.lock().unwrap().clear();
        self.cut.lock().unwrap().clear();
        self.link_loss.lock().unwrap().clear();
        self.corrupted.lock().unwrap().clear();
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let partitions = self.partitions.lock().unwrap();

        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);

            // Partitioned if one is in A and other in B (or vice versa)
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }

        true
    }

    /// Rolls the dice for one stream on a lossy link.
    pub fn should_drop(&self, from: NodeId, to: NodeId) -> bool {
        let rate = self.get_loss(from, to);
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.rng.lock().unwrap().gen::<f64>() < rate
    }

    /// Current stream counters.
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            corrupted: self.stats.corrupted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::new(0);

        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);
        let c = NodeId::from_seed(3);

        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(a, c));
        assert!(controller.can_communicate(b, c));

        // Partition: {a} vs {b, c}
        controller.partition(vec![a], vec![b, c]);

        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        assert!(controller.can_communicate(b, c));

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_network_controller_loss() {
        let controller = SimNetworkController::new(7);
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);

        assert_eq!(controller.get_loss(a, b), 0.0);
        assert!(!controller.should_drop(a, b));

        controller.set_loss(a, b, 3.0);
        assert_eq!(controller.get_loss(a, b), 1.0);
        assert!(controller.should_drop(a, b));

        // Reverse direction is separate
        assert!(!controller.should_drop(b, a));
    }

    #[test]
    fn test_partial_loss_is_seeded() {
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);
        let rolls = |seed| {
            let controller = SimNetworkController::new(seed);
            controller.set_loss(a, b, 0.5);
            (0..64).map(|_| controller.should_drop(a, b)).collect::<Vec<_>>()
        };
        let first = rolls(42);
        assert_eq!(first, rolls(42));
        assert!(first.iter().any(|d| *d));
        assert!(first.iter().any(|d| !*d));
    }

    #[tokio::test]
    async fn test_corrupted_link_garbles_payload() {
        let net = SimNetwork::new(0);
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();
        net.controller().corrupt_link(a.local_id(), b.local_id());

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(br#"{"data":1}"#);
        out.close().await.unwrap();

        let stream = inbound.recv().await.unwrap();
        assert_eq!(stream.read(), GARBLED);
        assert_eq!(net.controller().stats().corrupted, 1);
        assert_eq!(net.controller().stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_partition_blocks_connect() {
        let net = SimNetwork::new(0);
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        assert_eq!(a.local_id(), net.node_id(0));
        assert_eq!(b.local_id(), net.node_id(1));

        net.controller().partition(vec![net.node_id(0)], vec![net.node_id(1)]);
        let err = a.connect(&b.local_info()).await.unwrap_err();
        assert!(matches!(err, EnvError::NodeUnreachable(_)));
    }

    #[tokio::test]
    async fn test_cut_link_fails_one_direction() {
        let net = SimNetwork::new(0);
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        a.connect(&b.local_info()).await.unwrap();
        b.connect(&a.local_info()).await.unwrap();
        net.controller().cut_link(b.local_id(), a.local_id());

        let err = b.open_stream(a.local_id(), Channel::FromRight).await.unwrap_err();
        assert!(matches!(err, EnvError::NodeUnreachable(_)));
        assert!(a.open_stream(b.local_id(), Channel::FromLeft).await.is_ok());

        net.controller().heal_all();
        assert!(b.open_stream(a.local_id(), Channel::FromRight).await.is_ok());
    }

    #[tokio::test]
    async fn test_lossy_link_drops_stream() {
        let net = SimNetwork::new(0);
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();
        net.controller().set_loss(a.local_id(), b.local_id(), 1.0);

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(br#"{"data":1}"#);
        out.close().await.unwrap();

        assert!(inbound.try_recv().is_err());
        assert_eq!(net.controller().stats().dropped, 1);
    }
}
