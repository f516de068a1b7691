//! Per-stream sequence cursors shared by every projection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use thiserror::Error;

use stockroom_core::AggregateId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("event does not belong to stream {0}")]
    StreamMismatch(AggregateId),

    /// An event arrived ahead of its predecessor; the caller should catch up
    /// from the store.
    #[error("sequence gap (last={last}, found={found})")]
    Gap { last: u64, found: u64 },

    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),
}

/// What to do with an incoming event given the stream cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCheck {
    Apply,
    /// Already applied (at-least-once redelivery); ignore.
    Duplicate,
}

/// Last applied sequence number per aggregate stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

/// Write access to the cursor map, held for the duration of one apply so
/// concurrent deliveries for the same stream serialize.
pub struct CursorGuard<'a> {
    map: Option<RwLockWriteGuard<'a, HashMap<AggregateId, u64>>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> CursorGuard<'_> {
        CursorGuard {
            map: self.inner.write().ok(),
        }
    }

    pub fn last(&self, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&aggregate_id).copied())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.inner.write() {
            m.clear();
        }
    }
}

impl CursorGuard<'_> {
    /// Sequence numbers start at 1 and must arrive without gaps.
    pub fn check(&self, aggregate_id: AggregateId, seq: u64) -> Result<CursorCheck, ProjectionError> {
        let last = self
            .map
            .as_ref()
            .and_then(|m| m.get(&aggregate_id).copied())
            .unwrap_or(0);

        if seq <= last {
            return Ok(CursorCheck::Duplicate);
        }
        if seq != last + 1 {
            return Err(ProjectionError::Gap { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&mut self, aggregate_id: AggregateId, seq: u64) {
        if let Some(m) = self.map.as_mut() {
            m.insert(aggregate_id, seq);
        }
    }
}
