//! Binary protocol for the live stroke feed.
//!
//! Wire format (bincode-encoded, one WebSocket binary frame per message):
//! ```text
//! ┌──────────┬───────────┬──────────┬────────────────────────────┐
//! │ kind     │ page_id   │ seq      │ payload                    │
//! │ 1 byte   │ string    │ varint   │ JSON row (StrokeInserted)  │
//! └──────────┴───────────┴──────────┴────────────────────────────┘
//! ```
//!
//! The payload of `StrokeInserted` is the canonical row as JSON so the feed
//! carries exactly the same record the write endpoint returns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use inkwall_core::{CanonicalStroke, PageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Client → server: start receiving inserts for `page_id`
    Subscribe = 1,
    /// Server → client: subscription is live
    Subscribed = 2,
    /// Client → server: stop receiving inserts
    Unsubscribe = 3,
    /// Server → client: a stroke was accepted
    StrokeInserted = 4,
    Ping = 5,
    Pong = 6,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    pub kind: MessageKind,
    pub page_id: PageId,
    /// Acceptance sequence number for `StrokeInserted`, 0 otherwise
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl FeedMessage {
    fn control(kind: MessageKind, page_id: PageId) -> Self {
        Self {
            kind,
            page_id,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn subscribe(page_id: PageId) -> Self {
        Self::control(MessageKind::Subscribe, page_id)
    }

    pub fn subscribed(page_id: PageId) -> Self {
        Self::control(MessageKind::Subscribed, page_id)
    }

    pub fn unsubscribe(page_id: PageId) -> Self {
        Self::control(MessageKind::Unsubscribe, page_id)
    }

    pub fn ping() -> Self {
        Self::control(MessageKind::Ping, PageId::default())
    }

    pub fn pong() -> Self {
        Self::control(MessageKind::Pong, PageId::default())
    }

    /// Insert event for an accepted stroke.
    pub fn stroke_inserted(seq: u64, stroke: &CanonicalStroke) -> Result<Self, ProtocolError> {
        let payload =
            serde_json::to_vec(stroke).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::StrokeInserted,
            page_id: stroke.page_id().clone(),
            seq,
            payload,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the canonical row carried by a `StrokeInserted` message.
    pub fn stroke(&self) -> Result<CanonicalStroke, ProtocolError> {
        if self.kind != MessageKind::StrokeInserted {
            return Err(ProtocolError::InvalidMessageType);
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid message type")]
    InvalidMessageType,
    #[error("connection closed")]
    ConnectionClosed,
}
