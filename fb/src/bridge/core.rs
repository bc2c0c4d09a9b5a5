//! Bridge - request/response hub for one composite request
//!
//! Owns every pending request of one composite-request lifecycle: the
//! submitted payloads, the suspended continuation of each submitter, the
//! reservations for deferred submissions, the finalization barrier and the
//! aggregation results. It knows nothing about the producer hierarchy.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::Shared as SharedFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregate::AggregateResults;
use super::config::{BridgeConfig, FailurePolicy};
use super::metrics::BridgeMetrics;
use super::response::ResponseFuture;
use crate::domain::{AggregationId, Exchange, Payload, RequestId, ReservationId};
use crate::error::BridgeError;

/// Synchronous rejection handler registered with a request
///
/// Runs inside `reject` before the error reaches the suspended call. An
/// error it returns propagates to the caller of `reject`.
pub type RejectHook = Box<dyn FnOnce(&BridgeError) -> Result<(), BridgeError> + Send + 'static>;

/// Resolver/rejecter pair of one suspended request
struct PendingRequest<E: Exchange> {
    tx: oneshot::Sender<Result<E::Answer, BridgeError>>,
    on_reject: Option<RejectHook>,
}

/// One-shot signal fired when the reserved request is submitted
///
/// The receiving side is shared so every collector observes the same signal.
struct Reservation {
    tx: oneshot::Sender<RequestId>,
    arrived: SharedFuture<oneshot::Receiver<RequestId>>,
}

pub(super) struct BridgeState<E: Exchange> {
    next_request_id: u64,
    next_reservation_id: u64,
    requests: BTreeMap<RequestId, Payload<E::Item>>,
    pending: BTreeMap<RequestId, PendingRequest<E>>,
    reservations: BTreeMap<ReservationId, Reservation>,
    pub(super) aggregates: AggregateResults<E::Output>,
    pub(super) barrier: BTreeMap<i32, Vec<oneshot::Sender<()>>>,
    pub(super) tasks: Vec<(AggregationId, JoinHandle<Result<(), BridgeError>>)>,
    pub(super) metrics: BridgeMetrics,
    pub(super) closed: bool,
}

impl<E: Exchange> BridgeState<E> {
    fn new() -> Self {
        Self {
            next_request_id: 0,
            next_reservation_id: 0,
            requests: BTreeMap::new(),
            pending: BTreeMap::new(),
            reservations: BTreeMap::new(),
            aggregates: AggregateResults::new(),
            barrier: BTreeMap::new(),
            tasks: Vec::new(),
            metrics: BridgeMetrics::default(),
            closed: false,
        }
    }
}

struct Shared<E: Exchange> {
    id: Uuid,
    config: BridgeConfig,
    state: Mutex<BridgeState<E>>,
}

/// Request/response hub for one composite request
///
/// Cheap to clone; all clones share the same bookkeeping. The state lock is
/// never held across an await point or while producer code runs.
pub struct Bridge<E: Exchange> {
    shared: Arc<Shared<E>>,
}

impl<E: Exchange> Clone for Bridge<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Exchange> std::fmt::Debug for Bridge<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.shared.id)
            .field("label", &self.shared.config.label)
            .finish()
    }
}

impl<E: Exchange> Default for Bridge<E> {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl<E: Exchange> Bridge<E> {
    /// Create a new bridge with the given configuration
    pub fn new(config: BridgeConfig) -> Self {
        let id = Uuid::now_v7();
        debug!(bridge = %id, label = %config.label, policy = %config.failure_policy, "Bridge::new: called");
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                state: Mutex::new(BridgeState::new()),
            }),
        }
    }

    /// Create a bridge configured from a YAML file
    ///
    /// Without a path the usual config locations are searched, falling back
    /// to defaults.
    pub fn from_config_file(path: Option<&Path>) -> eyre::Result<Self> {
        let config = BridgeConfig::load(path)?;
        Ok(Self::new(config))
    }

    /// Instance id used in log lines
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, BridgeState<E>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next request id to be allocated
    pub(super) fn request_counter(&self) -> u64 {
        self.lock().next_request_id
    }

    /// Submit a request and get the future of its answer
    ///
    /// The request is registered before this returns, so ids follow call
    /// order. If `reservation` names an open reservation, it is fulfilled.
    pub fn submit_request(&self, payload: Payload<E::Item>, reservation: Option<ReservationId>) -> ResponseFuture<E> {
        self.register(payload, reservation, None)
    }

    /// Submit a request with a synchronous rejection handler
    pub fn submit_request_with<F>(
        &self,
        payload: Payload<E::Item>,
        reservation: Option<ReservationId>,
        on_reject: F,
    ) -> ResponseFuture<E>
    where
        F: FnOnce(&BridgeError) -> Result<(), BridgeError> + Send + 'static,
    {
        self.register(payload, reservation, Some(Box::new(on_reject)))
    }

    pub(crate) fn register(
        &self,
        payload: Payload<E::Item>,
        reservation: Option<ReservationId>,
        on_reject: Option<RejectHook>,
    ) -> ResponseFuture<E> {
        let (tx, rx) = oneshot::channel();
        let entries = payload.len();

        let mut state = self.lock();
        if state.closed {
            warn!(bridge = %self.shared.id, "Bridge::submit_request: bridge already shut down");
            return ResponseFuture::failed(BridgeError::Aborted);
        }

        let id = RequestId(state.next_request_id);
        state.next_request_id += 1;
        state.requests.insert(id, payload);
        state.pending.insert(id, PendingRequest { tx, on_reject });
        state.metrics.submitted += 1;

        if let Some(reservation) = reservation {
            match state.reservations.remove(&reservation) {
                Some(slot) => {
                    let _ = slot.tx.send(id);
                    debug!(bridge = %self.shared.id, %reservation, request = %id, "Bridge::submit_request: reservation fulfilled");
                }
                None => {
                    debug!(bridge = %self.shared.id, %reservation, "Bridge::submit_request: no open reservation");
                }
            }
        }
        drop(state);

        debug!(bridge = %self.shared.id, request = %id, entries, "Bridge::submit_request: registered");
        ResponseFuture::waiting(id, rx)
    }

    /// Reserve a slot for a request that will be submitted later
    ///
    /// `collect_all` will not return until the reserved request arrives.
    pub fn reserve(&self) -> ReservationId {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = ReservationId(state.next_reservation_id);
        state.next_reservation_id += 1;
        state.reservations.insert(
            id,
            Reservation {
                tx,
                arrived: rx.shared(),
            },
        );
        drop(state);

        debug!(bridge = %self.shared.id, reservation = %id, "Bridge::reserve: called");
        id
    }

    /// Wait for every open reservation, then return all submitted payloads
    ///
    /// Reservations are awaited in registration order. A reservation whose
    /// producer never submits blocks this call forever. Reservations added
    /// after this call starts are not awaited. Any number of collectors may
    /// wait at the same time; each one waits for every open reservation.
    pub async fn collect_all(&self) -> Result<BTreeMap<RequestId, Payload<E::Item>>, BridgeError> {
        let waiting: Vec<(ReservationId, SharedFuture<oneshot::Receiver<RequestId>>)> = self
            .lock()
            .reservations
            .iter()
            .map(|(id, slot)| (*id, slot.arrived.clone()))
            .collect();

        debug!(bridge = %self.shared.id, reservations = waiting.len(), "Bridge::collect_all: waiting for reservations");
        for (reservation, rx) in waiting {
            match rx.await {
                Ok(request) => {
                    debug!(bridge = %self.shared.id, %reservation, %request, "Bridge::collect_all: reservation arrived");
                }
                Err(_) => {
                    warn!(bridge = %self.shared.id, %reservation, "Bridge::collect_all: reservation dropped");
                    return Err(BridgeError::Aborted);
                }
            }
        }

        let collected = self.lock().requests.clone();
        debug!(bridge = %self.shared.id, requests = collected.len(), "Bridge::collect_all: collected");
        Ok(collected)
    }

    /// Deliver the answer for a request
    pub fn resolve(&self, id: RequestId, answer: E::Answer) -> Result<(), BridgeError> {
        let pending = {
            let mut state = self.lock();
            let pending = state.pending.remove(&id);
            if pending.is_some() {
                state.requests.remove(&id);
                state.metrics.resolved += 1;
            }
            pending
        };

        let Some(pending) = pending else {
            warn!(bridge = %self.shared.id, request = %id, "Bridge::resolve: unknown id");
            return Err(BridgeError::UnknownId(id));
        };

        if pending.tx.send(Ok(answer)).is_err() {
            debug!(bridge = %self.shared.id, request = %id, "Bridge::resolve: submitter is gone");
        } else {
            debug!(bridge = %self.shared.id, request = %id, "Bridge::resolve: resolved");
        }
        Ok(())
    }

    /// Reject a request, failing if no handler is registered for it
    pub fn reject(&self, id: RequestId, error: BridgeError) -> Result<(), BridgeError> {
        if self.try_reject(id, error)? {
            Ok(())
        } else {
            Err(BridgeError::UnknownId(id))
        }
    }

    /// Reject a request if a handler is registered for it
    ///
    /// Returns whether a handler existed. The rejection handler runs first;
    /// its error is returned after the suspended call has been rejected,
    /// with exactly one `Propagated` layer removed.
    pub fn try_reject(&self, id: RequestId, error: BridgeError) -> Result<bool, BridgeError> {
        let pending = {
            let mut state = self.lock();
            let pending = state.pending.remove(&id);
            if pending.is_some() {
                state.requests.remove(&id);
                state.metrics.rejected += 1;
            }
            pending
        };

        let Some(pending) = pending else {
            return Ok(false);
        };

        debug!(bridge = %self.shared.id, request = %id, %error, "Bridge::try_reject: rejecting");
        let hook_result = match pending.on_reject {
            Some(hook) => hook(&error),
            None => Ok(()),
        };
        let _ = pending.tx.send(Err(error));

        match hook_result {
            Ok(()) => Ok(true),
            Err(BridgeError::Propagated(inner)) => Err(*inner),
            Err(raised) => Err(raised),
        }
    }

    /// Reject every registered request, stopping at the first that raises
    ///
    /// Requests after the failing one stay pending.
    pub fn reject_all(&self, error: BridgeError) -> Result<(), BridgeError> {
        let ids: Vec<RequestId> = self.lock().pending.keys().copied().collect();
        info!(bridge = %self.shared.id, count = ids.len(), %error, "Bridge::reject_all: called");

        for id in ids {
            if let Err(raised) = self.try_reject(id, error.clone()) {
                warn!(bridge = %self.shared.id, request = %id, %raised, "Bridge::reject_all: rejection raised, stopping");
                return Err(raised);
            }
        }
        Ok(())
    }

    /// Abort every request id ever allocated, whatever their handlers do
    ///
    /// Every id from 0 up to the request counter is attempted exactly once
    /// with the `Aborted` sentinel. A handler that hands the sentinel back is
    /// ignored; any other handler error stops the sweep and is returned.
    pub fn abort_all(&self) -> Result<(), BridgeError> {
        let upper = self.lock().next_request_id;
        info!(bridge = %self.shared.id, upper, "Bridge::abort_all: called");

        let mut aborted = 0usize;
        for raw in 0..upper {
            match self.try_reject(RequestId(raw), BridgeError::Aborted) {
                Ok(true) => aborted += 1,
                Ok(false) => {}
                Err(BridgeError::Aborted) => {
                    aborted += 1;
                    debug!(bridge = %self.shared.id, request = raw, "Bridge::abort_all: sentinel bounced back");
                }
                Err(fault) => {
                    warn!(bridge = %self.shared.id, request = raw, %fault, "Bridge::abort_all: handler fault");
                    return Err(fault);
                }
            }
        }

        debug!(bridge = %self.shared.id, aborted, "Bridge::abort_all: done");
        Ok(())
    }

    /// Broadcast a failure to every pending request per the failure policy
    pub fn fail_pending(&self, cause: impl Into<eyre::Report>) -> Result<(), BridgeError> {
        match self.shared.config.failure_policy {
            FailurePolicy::FailFast => self.reject_all(BridgeError::rejected(cause)),
            FailurePolicy::BestEffort => {
                let cause: eyre::Report = cause.into();
                debug!(bridge = %self.shared.id, %cause, "Bridge::fail_pending: aborting");
                self.abort_all()
            }
        }
    }

    /// Number of requests still waiting for an answer
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Ids still waiting for an answer, in submission order
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.lock().pending.keys().copied().collect()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.lock().pending.contains_key(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Get a snapshot of the bridge metrics
    pub fn metrics(&self) -> BridgeMetrics {
        let state = self.lock();
        BridgeMetrics {
            pending_requests: state.pending.len(),
            open_reservations: state.reservations.len(),
            barrier_waiters: state.barrier.values().map(Vec::len).sum(),
            ..state.metrics.clone()
        }
    }

    /// Tear the bridge down
    ///
    /// Every pending request, reservation and barrier waiter resumes with
    /// `Aborted`, running aggregation tasks are aborted, and later
    /// submissions fail immediately.
    pub fn shutdown(&self) {
        let (pending, reservations, barrier, tasks) = {
            let mut state = self.lock();
            state.closed = true;
            state.requests.clear();
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.reservations),
                std::mem::take(&mut state.barrier),
                std::mem::take(&mut state.tasks),
            )
        };

        info!(
            bridge = %self.shared.id,
            label = %self.shared.config.label,
            pending = pending.len(),
            reservations = reservations.len(),
            tasks = tasks.len(),
            "Bridge::shutdown: tearing down"
        );

        drop(pending);
        drop(reservations);
        drop(barrier);
        for (_, handle) in tasks {
            handle.abort();
        }
    }
}
