//! Queued write operations.

use crate::{Timestamp, WriteKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single write waiting in the batch queue.
///
/// Operations are immutable once enqueued; a failed batch is requeued with
/// the very same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Timestamp-sortable identifier, used in logs.
    pub id: Uuid,
    pub kind: WriteKind,
    /// Document path in the backing store, e.g. `users/42`.
    pub target_key: String,
    /// Document body for `Set`/`Update`; `None` for `Delete`.
    pub payload: Option<Value>,
    pub enqueued_at: Timestamp,
}

impl BatchOperation {
    pub fn new(
        kind: WriteKind,
        target_key: impl Into<String>,
        payload: Option<Value>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            target_key: target_key.into(),
            payload,
            enqueued_at,
        }
    }

    pub fn set(target_key: impl Into<String>, payload: Value, enqueued_at: Timestamp) -> Self {
        Self::new(WriteKind::Set, target_key, Some(payload), enqueued_at)
    }

    pub fn update(target_key: impl Into<String>, payload: Value, enqueued_at: Timestamp) -> Self {
        Self::new(WriteKind::Update, target_key, Some(payload), enqueued_at)
    }

    pub fn delete(target_key: impl Into<String>, enqueued_at: Timestamp) -> Self {
        Self::new(WriteKind::Delete, target_key, None, enqueued_at)
    }
}
