//! Production transport: one TCP connection per stream.
//!
//! Every node binds its own listener. A stream is a single connection that
//! starts with a header line naming the channel and the sender, followed by
//! the payload up to EOF:
//!
//! ```text
//! /fromleft 5f0c9a3e-8d1b-4c2e-9f6a-0b7d4e1c2a33\n
//! {"data":1}
//! ```
//!
//! Nothing is written until the stream is closed, so a stream dropped
//! without `close` reaches the peer as an empty connection and is ignored.
//! Streams that cannot be read in full never reach the archer; the
//! receiving transport logs them at `error` level and drops them.

use crate::error::EnvError;
use crate::network::{PeerTransport, TransportProvider};
use crate::stream::{InboundStream, OutboundStream, StreamSink};
use crate::types::{Channel, NodeId, PeerInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Upper bound on a single stream payload.
const MAX_STREAM_BYTES: u64 = 64 * 1024;

/// Queue depth per channel listener.
const LISTENER_QUEUE: usize = 64;

type Listeners = Arc<Mutex<[Option<mpsc::Sender<InboundStream>>; 2]>>;

/// A node reachable over TCP.
pub struct TcpTransport {
    /// This node's identity and listening address
    info: PeerInfo,

    /// Addresses of peers that answered `connect`
    peers: Mutex<HashMap<NodeId, SocketAddr>>,

    /// Registered listeners, indexed by `Channel::index`
    listeners: Listeners,

    /// Accept loop, aborted on drop
    accept_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Binds a listener on `addr` (port 0 picks a free port) and starts accepting.
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>, EnvError> {
        Self::bind_as(NodeId::new(), addr).await
    }

    /// Like [`bind`](Self::bind) with a caller-chosen identity.
    pub async fn bind_as(id: NodeId, addr: SocketAddr) -> Result<Arc<Self>, EnvError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let listeners: Listeners = Arc::new(Mutex::new([None, None]));

        let accept_task = tokio::spawn(accept_loop(id, listener, Arc::clone(&listeners)));
        debug!("Node {} listening on {}", id, local_addr);

        Ok(Arc::new(Self {
            info: PeerInfo::at(id, local_addr),
            peers: Mutex::new(HashMap::new()),
            listeners,
            accept_task,
        }))
    }

    fn peer_addr(&self, peer: NodeId) -> Option<SocketAddr> {
        self.peers.lock().unwrap().get(&peer).copied()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    fn local_info(&self) -> PeerInfo {
        self.info
    }

    async fn connect(&self, peer: &PeerInfo) -> Result<(), EnvError> {
        let addr = peer
            .addr
            .ok_or_else(|| EnvError::unreachable(format!("{} has no address", peer.id)))?;

        // Dial once to prove the peer is there; the probe closes without a header.
        let probe = TcpStream::connect(addr)
            .await
            .map_err(|e| EnvError::connection(peer, e.to_string()))?;
        drop(probe);

        self.peers.lock().unwrap().insert(peer.id, addr);
        debug!("Node {} connected to {}", self.info.id, peer);
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
        let addr = self
            .peer_addr(peer)
            .ok_or_else(|| EnvError::NotConnected(peer.to_string()))?;

        let socket = TcpStream::connect(addr)
            .await
            .map_err(|e| EnvError::connection(peer, e.to_string()))?;

        Ok(OutboundStream::new(
            self.info.id,
            peer,
            channel,
            Box::new(TcpSink { socket }),
        ))
    }
}

/// Write half of an open TCP stream.
struct TcpSink {
    socket: TcpStream,
}

#[async_trait]
impl StreamSink for TcpSink {
    async fn deliver(self: Box<Self>, stream: InboundStream) -> Result<(), EnvError> {
        let mut socket = self.socket;
        let header = format!("{} {}\n", stream.channel().name(), stream.sender().as_uuid());
        socket.write_all(header.as_bytes()).await?;
        socket.write_all(stream.read()).await?;
        socket.shutdown().await?;
        Ok(())
    }
}

async fn accept_loop(id: NodeId, listener: TcpListener, listeners: Listeners) {
    loop {
        match listener.accept().await {
            Ok((socket, remote)) => {
                let listeners = Arc::clone(&listeners);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, listeners).await {
                        error!("Node {} dropped stream from {}: {}", id, remote, e);
                    }
                });
            }
            Err(e) => {
                warn!("Node {} accept failed: {}", id, e);
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, listeners: Listeners) -> Result<(), EnvError> {
    let mut reader = BufReader::new(socket);
    let mut header = String::new();
    if reader.read_line(&mut header).await? == 0 {
        // Connectivity probe, or a stream dropped before close
        return Ok(());
    }

    let (channel, sender) = parse_header(header.trim_end())?;

    let mut payload = Vec::new();
    reader.take(MAX_STREAM_BYTES + 1).read_to_end(&mut payload).await?;
    if payload.len() as u64 > MAX_STREAM_BYTES {
        return Err(EnvError::closed(format!(
            "stream on {} from {} exceeds {} bytes",
            channel, sender, MAX_STREAM_BYTES
        )));
    }

    let tx = listeners.lock().unwrap()[channel.index()].clone();
    match tx {
        Some(tx) => tx
            .send(InboundStream::new(sender, channel, payload))
            .await
            .map_err(|_| EnvError::closed(format!("listener for {} gone", channel))),
        None => {
            warn!("No handler for {}, discarding stream from {}", channel, sender);
            Ok(())
        }
    }
}

fn parse_header(line: &str) -> Result<(Channel, NodeId), EnvError> {
    let bad = || EnvError::closed(format!("malformed stream header: {:?}", line));
    let (channel, sender) = line.split_once(' ').ok_or_else(bad)?;
    let channel = channel.parse::<Channel>().map_err(|_| bad())?;
    let sender = sender.parse::<NodeId>().map_err(|_| bad())?;
    Ok((channel, sender))
}

/// Binds one fresh TCP transport per node.
#[derive(Debug, Clone)]
pub struct TcpProvider {
    /// Interface every node listens on
    bind_ip: IpAddr,
}

impl TcpProvider {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }
}

impl Default for TcpProvider {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[async_trait]
impl TransportProvider for TcpProvider {
    type Transport = TcpTransport;

    async fn create(&self, _index: usize) -> Result<Arc<TcpTransport>, EnvError> {
        TcpTransport::bind(SocketAddr::new(self.bind_ip, 0)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let id = NodeId::from_seed(3);
        let line = format!("/fromright {}", id.as_uuid());
        let (channel, sender) = parse_header(&line).unwrap();
        assert_eq!(channel, Channel::FromRight);
        assert_eq!(sender, id);

        assert!(parse_header("/fromright").is_err());
        assert!(parse_header("/up 5f0c9a3e-8d1b-4c2e-9f6a-0b7d4e1c2a33").is_err());
    }

    #[tokio::test]
    async fn test_stream_roundtrip_over_tcp() {
        let provider = TcpProvider::default();
        let a = provider.create(0).await.unwrap();
        let b = provider.create(1).await.unwrap();

        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(b"{\"data\":1}");
        out.close().await.unwrap();

        let stream = inbound.recv().await.unwrap();
        assert_eq!(stream.sender(), a.local_id());
        assert_eq!(stream.channel(), Channel::FromLeft);
        assert_eq!(stream.read(), b"{\"data\":1}");
    }

    #[tokio::test]
    async fn test_dropped_stream_delivers_nothing() {
        let provider = TcpProvider::default();
        let a = provider.create(0).await.unwrap();
        let b = provider.create(1).await.unwrap();

        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();

        let mut abandoned = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        abandoned.write(b"{\"data\":7}");
        drop(abandoned);

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(b"{\"data\":1}");
        out.close().await.unwrap();

        // Only the closed stream arrives
        let stream = inbound.recv().await.unwrap();
        assert_eq!(stream.read(), b"{\"data\":1}");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_stream_is_rejected() {
        let provider = TcpProvider::default();
        let a = provider.create(0).await.unwrap();
        let b = provider.create(1).await.unwrap();

        let mut inbound = b.listen(Channel::FromLeft).unwrap();
        a.connect(&b.local_info()).await.unwrap();

        let mut big = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        big.write(&vec![b' '; MAX_STREAM_BYTES as usize + 1]);
        big.close().await.unwrap();

        let mut out = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap();
        out.write(b"{\"data\":1}");
        out.close().await.unwrap();

        let stream = inbound.recv().await.unwrap();
        assert_eq!(stream.read(), b"{\"data\":1}");
    }

    #[tokio::test]
    async fn test_open_stream_requires_connect() {
        let provider = TcpProvider::default();
        let a = provider.create(0).await.unwrap();
        let b = provider.create(1).await.unwrap();

        let err = a.open_stream(b.local_id(), Channel::FromLeft).await.unwrap_err();
        assert!(matches!(err, EnvError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_connect_to_missing_peer_fails() {
        let provider = TcpProvider::default();
        let a = provider.create(0).await.unwrap();

        // Bind then drop to get a port nobody listens on
        let gone = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let info = PeerInfo::at(NodeId::new(), gone.local_addr().unwrap());
        drop(gone);

        assert!(a.connect(&info).await.is_err());
        assert!(a.connect(&PeerInfo::local(NodeId::new())).await.is_err());
    }

    #[tokio::test]
    async fn test_single_listener_per_channel() {
        let a = TcpProvider::default().create(0).await.unwrap();
        let _rx = a.listen(Channel::FromRight).unwrap();
        assert!(matches!(
            a.listen(Channel::FromRight),
            Err(EnvError::HandlerExists(_))
        ));
        assert!(a.listen(Channel::FromLeft).is_ok());
    }
}
