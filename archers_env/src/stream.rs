//! One-shot message streams between neighbouring nodes.
//!
//! ```text
//! Archer A                                       Archer B
//!   |-- open_stream(B, /fromleft) -> OutboundStream
//!   |-- write(bytes)
//!   |-- close() ------ StreamSink::deliver ------->| listener(/fromleft)
//!   |                                              |-- read() -> bytes
//! ```

use crate::error::EnvError;
use crate::types::{Channel, NodeId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Carries a finished stream to the remote listener.
///
/// Each transport supplies its own sink: a queue for in-memory transports,
/// a socket for TCP.
#[async_trait]
pub trait StreamSink: Send {
    /// Hands the closed stream to the far side.
    async fn deliver(self: Box<Self>, stream: InboundStream) -> Result<(), EnvError>;
}

/// Sink that pushes streams straight into a listener queue.
pub struct QueueSink {
    tx: mpsc::Sender<InboundStream>,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<InboundStream>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl StreamSink for QueueSink {
    async fn deliver(self: Box<Self>, stream: InboundStream) -> Result<(), EnvError> {
        let peer = stream.sender();
        self.tx
            .send(stream)
            .await
            .map_err(|_| EnvError::closed(format!("listener gone (stream from {})", peer)))
    }
}

/// Write side of a stream. Nothing is delivered until [`close`](Self::close).
pub struct OutboundStream {
    sender: NodeId,
    peer: NodeId,
    channel: Channel,
    buf: Vec<u8>,
    sink: Box<dyn StreamSink>,
}

impl OutboundStream {
    /// Creates a stream from `sender` to `peer` on `channel`.
    pub fn new(sender: NodeId, peer: NodeId, channel: Channel, sink: Box<dyn StreamSink>) -> Self {
        Self {
            sender,
            peer,
            channel,
            buf: Vec::new(),
            sink,
        }
    }

    /// Appends bytes to the stream.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Closes the stream, delivering everything written so far.
    pub async fn close(self) -> Result<(), EnvError> {
        let inbound = InboundStream::new(self.sender, self.channel, self.buf);
        self.sink.deliver(inbound).await
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl std::fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundStream")
            .field("sender", &self.sender)
            .field("peer", &self.peer)
            .field("channel", &self.channel)
            .field("len", &self.buf.len())
            .finish()
    }
}

/// Read side of a delivered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundStream {
    sender: NodeId,
    channel: Channel,
    payload: Vec<u8>,
}

impl InboundStream {
    pub fn new(sender: NodeId, channel: Channel, payload: Vec<u8>) -> Self {
        Self {
            sender,
            channel,
            payload,
        }
    }

    /// Node that opened the stream.
    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Reads the stream to its end.
    pub fn read(&self) -> &[u8] {
        &self.payload
    }

    /// Replaces the payload (used by links that tamper with traffic).
    pub fn with_payload(self, payload: Vec<u8>) -> Self {
        Self { payload, ..self }
    }
}
