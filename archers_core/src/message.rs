//! The relayed counter and its wire encoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counter carried along the line.
///
/// On the wire this is `{"data":<n>}`. The value is the 1-indexed position of
/// the archer that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "data")]
    pub value: i64,
}

/// Errors while encoding or decoding a [`Message`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Message {
    /// Value injected by the head of the line.
    pub const ORIGIN: Message = Message { value: 1 };

    pub fn new(value: i64) -> Self {
        Self { value }
    }

    /// The message one hop further right.
    pub fn incremented(self) -> Self {
        Self::new(self.value.saturating_add(1))
    }

    /// The message one hop further left.
    pub fn decremented(self) -> Self {
        Self::new(self.value.saturating_sub(1))
    }

    /// Serializes to compact JSON.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a message read from a stream.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
