//! Bridge metrics for observability

use serde::Serialize;

/// Snapshot of one bridge's bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeMetrics {
    pub pending_requests: usize,
    pub open_reservations: usize,
    pub barrier_waiters: usize,
    pub submitted: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub tasks_spawned: u64,
    pub task_failures: u64,
}
