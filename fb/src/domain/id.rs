//! Bridge-scoped identifiers
//!
//! Every counter lives inside one Bridge, so ids are only unique within the
//! composite request that allocated them.

use serde::{Deserialize, Serialize};

/// Id of one submitted request, allocated in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Get the raw counter value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Id of a reservation registered ahead of a deferred submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub u64);

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rsv-{}", self.0)
    }
}

/// Caller-chosen coordinate under which an aggregation result is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationId(pub u64);

impl AggregationId {
    /// Shift the id by a task index (race winners are stored at `id + index`)
    pub fn offset(self, index: usize) -> Self {
        Self(self.0 + index as u64)
    }
}

impl std::fmt::Display for AggregationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agg-{}", self.0)
    }
}

impl From<u64> for AggregationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<usize> for AggregationId {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}
