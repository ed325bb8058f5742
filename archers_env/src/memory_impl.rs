//! In-process transport: every node lives in one shared registry.

use crate::error::EnvError;
use crate::network::{PeerTransport, TransportProvider};
use crate::stream::{InboundStream, OutboundStream, QueueSink, StreamSink};
use crate::types::{Channel, NodeId, PeerInfo};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Queue depth per channel listener.
const LISTENER_QUEUE: usize = 64;

type Listeners = Arc<Mutex<[Option<mpsc::Sender<InboundStream>>; 2]>>;

/// Registry of in-process nodes. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<Mutex<HashMap<NodeId, Listeners>>>,

    /// When set, node `i` gets `NodeId::from_seed(seed + i)`
    seed: Option<u64>,
}

impl MemoryNetwork {
    /// Creates a registry handing out random node IDs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry handing out reproducible node IDs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            nodes: Arc::default(),
            seed: Some(seed),
        }
    }

    /// Registers a node under `id` and returns its transport.
    pub fn endpoint(&self, id: NodeId) -> Arc<MemoryTransport> {
        let listeners: Listeners = Arc::new(Mutex::new([None, None]));
        self.nodes.lock().unwrap().insert(id, Arc::clone(&listeners));
        Arc::new(MemoryTransport {
            id,
            network: self.clone(),
            connected: Mutex::new(HashSet::new()),
            listeners,
        })
    }

    /// Removes a node; later dials to it fail.
    pub fn remove(&self, id: NodeId) {
        self.nodes.lock().unwrap().remove(&id);
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.lock().unwrap().contains_key(&id)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    fn id_for(&self, index: usize) -> NodeId {
        match self.seed {
            Some(seed) => NodeId::from_seed(seed.wrapping_add(index as u64)),
            None => NodeId::new(),
        }
    }

    fn listener(&self, peer: NodeId, channel: Channel) -> Option<mpsc::Sender<InboundStream>> {
        let listeners = self.nodes.lock().unwrap().get(&peer).cloned()?;
        let tx = listeners.lock().unwrap()[channel.index()].clone();
        tx
    }
}

#[async_trait]
impl TransportProvider for MemoryNetwork {
    type Transport = MemoryTransport;

    async fn create(&self, index: usize) -> Result<Arc<MemoryTransport>, EnvError> {
        Ok(self.endpoint(self.id_for(index)))
    }
}

/// A node registered in a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: NodeId,
    network: MemoryNetwork,
    connected: Mutex<HashSet<NodeId>>,
    listeners: Listeners,
}

impl MemoryTransport {
    /// Returns the sink a stream to `peer` on `channel` should be closed into.
    ///
    /// Fails if `peer` was never connected. A peer without a listener on
    /// `channel` gets a sink that discards the stream.
    pub fn sink_for(&self, peer: NodeId, channel: Channel) -> Result<Box<dyn StreamSink>, EnvError> {
        if !self.connected.lock().unwrap().contains(&peer) {
            return Err(EnvError::NotConnected(peer.to_string()));
        }
        if !self.network.contains(peer) {
            return Err(EnvError::unreachable(peer));
        }
        match self.network.listener(peer, channel) {
            Some(tx) => Ok(Box::new(QueueSink::new(tx))),
            None => Ok(Box::new(DiscardSink { peer })),
        }
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn local_info(&self) -> PeerInfo {
        PeerInfo::local(self.id)
    }

    async fn connect(&self, peer: &PeerInfo) -> Result<(), EnvError> {
        if !self.network.contains(peer.id) {
            return Err(EnvError::connection(peer, "no such node"));
        }
        self.connected.lock().unwrap().insert(peer.id);
        Ok(())
    }

    fn listen(&self, channel: Channel) -> Result<mpsc::Receiver<InboundStream>, EnvError> {
        let mut listeners = self.listeners.lock().unwrap();
        let slot = &mut listeners[channel.index()];
        if slot.is_some() {
            return Err(EnvError::HandlerExists(channel.to_string()));
        }
        let (tx, rx) = mpsc::channel(LISTENER_QUEUE);
        *slot = Some(tx);
        Ok(rx)
    }

    async fn open_stream(&self, peer: NodeId, channel: Channel) -> Result<OutboundStream, EnvError> {
        let sink = self.sink_for(peer, channel)?;
        Ok(OutboundStream::new(self.id, peer, channel, sink))
    }
}

/// Sink for peers with no listener on the channel.
struct DiscardSink {
    peer: NodeId,
}

#[async_trait]
impl StreamSink for DiscardSink {
    async fn deliver(self: Box<Self>, stream: InboundStream) -> Result<(), EnvError> {
        warn!(
            "No handler for {} on {}, discarding stream from {}",
            stream.channel(),
            self.peer,
            stream.sender()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_stream_delivery() {
        let net = MemoryNetwork::seeded(10);
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        assert_eq!(a.local_id(), NodeId::from_seed(10));
        assert_eq!(b.local_id(), NodeId::from_seed(11));

        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(b"hello");
        out.close().await.unwrap();

        let stream = inbound.recv().await.unwrap();
        assert_eq!(stream.sender(), a.local_id());
        assert_eq!(stream.read(), b"hello");
    }

    #[tokio::test]
    async fn test_connect_unknown_node_fails() {
        let net = MemoryNetwork::new();
        let a = net.create(0).await.unwrap();
        let err = a.connect(&PeerInfo::local(NodeId::new())).await.unwrap_err();
        assert!(matches!(err, EnvError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_open_stream_without_connect_fails() {
        let net = MemoryNetwork::new();
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        let err = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap_err();
        assert!(matches!(err, EnvError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_stream_to_channel_without_listener_is_discarded() {
        let net = MemoryNetwork::new();
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        a.connect(&b.local_info()).await.unwrap();

        let mut out = a.open_stream(b.local_id(), Channel::FromRight).await.unwrap();
        out.write(b"lost");
        assert!(out.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_removed_node_is_unreachable() {
        let net = MemoryNetwork::new();
        let a = net.create(0).await.unwrap();
        let b = net.create(1).await.unwrap();
        a.connect(&b.local_info()).await.unwrap();
        assert_eq!(net.node_count(), 2);

        net.remove(b.local_id());
        let err = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap_err();
        assert!(matches!(err, EnvError::NodeUnreachable(_)));
    }
}
