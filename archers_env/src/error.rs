//! Error types for the archer environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Dialing a peer failed
    #[error("Connection to {peer} failed: {reason}")]
    ConnectionFailed { peer: String, reason: String },

    /// Target node is unreachable (simulated partition, unknown address)
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    /// A stream was opened to a peer that was never connected
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// A listener is already registered for this channel
    #[error("Handler already registered for channel {0}")]
    HandlerExists(String),

    /// The remote side went away before the stream was delivered
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Creates a connection error.
    pub fn connection(peer: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            peer: peer.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an unreachable error.
    pub fn unreachable(node: impl std::fmt::Display) -> Self {
        Self::NodeUnreachable(node.to_string())
    }

    /// Creates a stream-closed error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::StreamClosed(msg.into())
    }
}
