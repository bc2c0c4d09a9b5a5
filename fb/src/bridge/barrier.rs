//! Finalization barrier
//!
//! Producers park on `finalize` once their part of the composite request is
//! done. `release` wakes the parked producers by descending priority.

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::core::Bridge;
use super::response::BarrierFuture;
use crate::domain::Exchange;
use crate::error::BridgeError;

impl<E: Exchange> Bridge<E> {
    /// Park until the next `release`, grouped under `priority`
    ///
    /// Higher priorities are released first; waiters sharing a priority are
    /// released in registration order.
    pub fn finalize(&self, priority: i32) -> BarrierFuture {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if state.closed {
            debug!(bridge = %self.id(), priority, "Bridge::finalize: bridge already shut down");
            return BarrierFuture::failed(BridgeError::Aborted);
        }
        state.barrier.entry(priority).or_default().push(tx);
        drop(state);

        debug!(bridge = %self.id(), priority, "Bridge::finalize: parked");
        BarrierFuture::waiting(rx)
    }

    /// Release every parked finalizer, highest priority first
    ///
    /// Returns how many waiters were signalled. Waiters parked after this
    /// call wait for the next release.
    pub fn release(&self) -> usize {
        let groups = std::mem::take(&mut self.lock().barrier);
        info!(bridge = %self.id(), groups = groups.len(), "Bridge::release: called");

        let mut released = 0;
        for (priority, waiters) in groups.into_iter().rev() {
            debug!(bridge = %self.id(), priority, waiters = waiters.len(), "Bridge::release: releasing group");
            for tx in waiters {
                if tx.send(()).is_ok() {
                    released += 1;
                }
            }
        }
        released
    }
}
