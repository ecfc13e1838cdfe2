//! Sync protocol types and wire codec.
//!
//! A [`SyncMessage`] carries exactly one [`TableUpdate`] plus the metadata
//! the coordinator needs to order and merge it:
//!
//! ```text
//! ┌─────────┬──────────┬────────────┬─────────┐
//! │ version │ group_id │ message_id │ update  │
//! │ u64     │ 16 bytes │ 16 bytes   │ variable│
//! └─────────┴──────────┴────────────┴─────────┘
//! ```
//!
//! `version` is the sender's baseline (its last synced version) on send; the
//! coordinator rewrites it to the assigned version before broadcasting an
//! acceptance. Messages sharing a `group_id` form a dependency group: if one
//! member is rejected, the coordinator drops the rest.
//!
//! The reference deployment is in-process and passes messages by value; the
//! bincode codec exists so messages survive a real transport unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::update::{TableUpdate, UpdateError};

/// Client identity with display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { peer_id: Uuid::new_v4(), name: name.into() }
    }

    /// Create with an explicit peer id (for testing).
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self { peer_id, name: name.into() }
    }
}

/// One edit in flight between a client and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Baseline version on send; the assigned version after acceptance.
    pub version: u64,
    /// Dependency group this message belongs to.
    pub group_id: Uuid,
    /// Globally unique message id.
    pub message_id: Uuid,
    /// The edit itself.
    pub update: TableUpdate,
}

impl SyncMessage {
    /// Wrap an update with a fresh message id.
    pub fn new(version: u64, group_id: Uuid, update: TableUpdate) -> Self {
        Self { version, group_id, message_id: Uuid::new_v4(), update }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }
}

/// Events a client records for its host application, drained via
/// `SyncClient::take_events`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Received a full snapshot from the coordinator.
    Synced { version: u64 },
    /// An edit was accepted and applied to the mirror. Fires for every
    /// accepted broadcast, not only this client's own edits.
    Accepted { message_id: Uuid, version: u64 },
    /// An edit was rejected; its dependency group is now poisoned.
    Rejected { message_id: Uuid, group_id: Uuid },
}

/// Protocol errors. Merge conflicts are not protocol errors; they travel as
/// `rejected` broadcasts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    /// An `accepted` broadcast arrived out of order. Fatal for the client:
    /// its mirror can no longer be trusted and it must resync.
    #[error("accepted version {got} does not follow client version {current}")]
    OutOfOrder { current: u64, got: u64 },
    /// A server-validated update failed to replay on the mirror. Fatal for
    /// the client; by construction this indicates a diverged mirror.
    #[error("accepted update failed to replay on mirror: {0}")]
    ReplayDiverged(#[from] UpdateError),
    #[error("outbox full ({capacity} messages)")]
    OutboxFull { capacity: usize },
    #[error("server is at capacity ({max_clients} clients)")]
    ServerFull { max_clients: usize },
}
