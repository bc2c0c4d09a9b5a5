//! Per-producer bridge state
//!
//! A slot moves through `unbound -> bound -> requested -> disposed`. It
//! refuses reuse after dispose and a second submission, so one logical
//! producer can never register two requests.

use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::bridge::{BarrierFuture, Bridge, RejectHook, ResponseFuture};
use crate::domain::{Exchange, Payload, ReservationId};
use crate::error::BridgeError;

struct SlotState<E: Exchange> {
    bridge: Option<Bridge<E>>,
    disposed: bool,
    requested: bool,
    reservation: Option<ReservationId>,
}

/// Bridge-facing state embedded in every producer
pub struct ProducerSlot<E: Exchange> {
    state: Mutex<SlotState<E>>,
}

impl<E: Exchange> Default for ProducerSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Exchange> std::fmt::Debug for ProducerSlot<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProducerSlot")
            .field("bound", &state.bridge.is_some())
            .field("disposed", &state.disposed)
            .field("requested", &state.requested)
            .field("reservation", &state.reservation)
            .finish()
    }
}

impl<E: Exchange> ProducerSlot<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                bridge: None,
                disposed: false,
                requested: false,
                reservation: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the slot to a bridge
    pub fn bind(&self, bridge: &Bridge<E>) -> Result<(), BridgeError> {
        let mut state = self.lock();
        if state.disposed {
            warn!(bridge = %bridge.id(), "ProducerSlot::bind: slot already disposed");
            return Err(BridgeError::Reuse("bind called after dispose".to_string()));
        }
        state.bridge = Some(bridge.clone());
        debug!(bridge = %bridge.id(), "ProducerSlot::bind: bound");
        Ok(())
    }

    /// Mark the slot disposed and release the bridge
    ///
    /// Returns true on the first call only.
    pub fn dispose(&self) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.disposed = true;
        state.reservation = None;
        if let Some(bridge) = state.bridge.take() {
            debug!(bridge = %bridge.id(), requested = state.requested, "ProducerSlot::dispose: released bridge");
        }
        true
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bridge.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn has_requested(&self) -> bool {
        self.lock().requested
    }

    fn bridge(&self) -> Result<Bridge<E>, BridgeError> {
        let state = self.lock();
        if state.disposed {
            return Err(BridgeError::Reuse("producer used after dispose".to_string()));
        }
        state.bridge.clone().ok_or(BridgeError::Unbound)
    }

    /// Announce that this producer will submit its request later
    ///
    /// The collection step will wait for the submission. Failing to submit
    /// after reserving blocks the collection forever, so reserving after the
    /// submission is refused.
    pub fn reserve(&self) -> Result<ReservationId, BridgeError> {
        let bridge = self.bridge()?;
        let mut state = self.lock();
        if state.requested {
            warn!(bridge = %bridge.id(), "ProducerSlot::reserve: called after submit_request");
            return Err(BridgeError::InvalidState(
                "reserve called after submit_request; the reservation could never be fulfilled".to_string(),
            ));
        }
        if state.reservation.is_some() {
            warn!(bridge = %bridge.id(), "ProducerSlot::reserve: called twice");
            return Err(BridgeError::InvalidState(
                "reserve called twice; this is not allowed to prevent deadlocks".to_string(),
            ));
        }
        let reservation = bridge.reserve();
        state.reservation = Some(reservation);
        Ok(reservation)
    }

    /// Submit this producer's request
    ///
    /// Fails with `InvalidValue` pointing at the caller when the payload is
    /// malformed or a request was already submitted.
    #[track_caller]
    pub fn submit_request(&self, payload: Payload<E::Item>) -> ResponseFuture<E> {
        self.submit(payload, None)
    }

    /// Submit this producer's request with a synchronous rejection handler
    #[track_caller]
    pub fn submit_request_with<F>(&self, payload: Payload<E::Item>, on_reject: F) -> ResponseFuture<E>
    where
        F: FnOnce(&BridgeError) -> Result<(), BridgeError> + Send + 'static,
    {
        self.submit(payload, Some(Box::new(on_reject)))
    }

    #[track_caller]
    fn submit(&self, payload: Payload<E::Item>, on_reject: Option<RejectHook>) -> ResponseFuture<E> {
        let location = Location::caller();
        let bridge = match self.bridge() {
            Ok(bridge) => bridge,
            Err(err) => return ResponseFuture::failed(err),
        };

        let reservation = {
            let mut state = self.lock();
            let already = state.requested;
            state.requested = true;
            if already {
                warn!(bridge = %bridge.id(), %location, "ProducerSlot::submit_request: called twice");
                return ResponseFuture::failed(BridgeError::InvalidValue {
                    message: "submit_request called twice; this is not allowed to prevent deadlocks".to_string(),
                    location,
                });
            }
            state.reservation
        };

        if let Err(err) = payload.validate() {
            warn!(bridge = %bridge.id(), %location, %err, "ProducerSlot::submit_request: invalid payload");
            let message = match err {
                BridgeError::InvalidPayload(message) => message,
                other => other.to_string(),
            };
            return ResponseFuture::failed(BridgeError::InvalidValue { message, location });
        }

        bridge.register(payload, reservation, on_reject)
    }

    /// Park until the bridge releases its finalizers
    pub fn finalize(&self) -> BarrierFuture {
        self.finalize_with_priority(0)
    }

    /// Park until release, ahead of every lower priority
    pub fn finalize_with_priority(&self, priority: i32) -> BarrierFuture {
        match self.bridge() {
            Ok(bridge) => bridge.finalize(priority),
            Err(err) => BarrierFuture::failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::domain::{JsonExchange, RequestId};
    use serde_json::json;

    fn bound() -> (Bridge<JsonExchange>, ProducerSlot<JsonExchange>) {
        let bridge = Bridge::new(BridgeConfig::default());
        let slot = ProducerSlot::new();
        slot.bind(&bridge).unwrap();
        (bridge, slot)
    }

    #[tokio::test]
    async fn test_submit_and_resolve() {
        let (bridge, slot) = bound();
        let fut = slot.submit_request(Payload::single(json!("name")));
        assert_eq!(fut.id(), Some(RequestId(0)));
        assert!(slot.has_requested());

        bridge.resolve(RequestId(0), json!("Alice")).unwrap();
        assert_eq!(fut.await.unwrap(), json!("Alice"));
    }

    #[tokio::test]
    async fn test_submit_twice_fails_without_registering() {
        let (bridge, slot) = bound();
        let _first = slot.submit_request(Payload::single(json!(1)));

        let line = line!() + 1;
        let second = slot.submit_request(Payload::single(json!(2)));
        assert_eq!(second.id(), None);
        match second.await {
            Err(BridgeError::InvalidValue { message, location }) => {
                assert!(message.contains("twice"));
                assert_eq!(location.file(), file!());
                assert_eq!(location.line(), line);
            }
            other => panic!("Wrong result: {:?}", other.map(|_| ())),
        }

        assert_eq!(bridge.pending_ids(), vec![RequestId(0)]);
        assert_eq!(bridge.metrics().submitted, 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_invalid_value() {
        let (bridge, slot) = bound();
        let payload = Payload::keyed(json!("a"), "k").and_keyed(json!("b"), "k");
        let err = slot.submit_request(payload).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidValue { .. }));
        assert_eq!(bridge.pending_count(), 0);

        // The attempt counts as the producer's one submission
        let again = slot.submit_request(Payload::single(json!("c"))).await.unwrap_err();
        assert!(again.to_string().contains("twice"));
    }

    #[tokio::test]
    async fn test_unbound_and_reuse() {
        let slot = ProducerSlot::<JsonExchange>::new();
        assert!(matches!(slot.submit_request(Payload::single(json!(1))).await, Err(BridgeError::Unbound)));

        let (bridge, slot) = bound();
        assert!(slot.dispose());
        assert!(!slot.dispose());
        assert!(!slot.is_bound());
        assert!(matches!(slot.bind(&bridge), Err(BridgeError::Reuse(_))));
        assert!(matches!(slot.submit_request(Payload::single(json!(1))).await, Err(BridgeError::Reuse(_))));
        assert!(matches!(slot.reserve(), Err(BridgeError::Reuse(_))));
        assert!(slot.finalize().await.unwrap_err().is_caller_bug());
    }

    #[tokio::test]
    async fn test_reservation_flows_into_submission() {
        let (bridge, slot) = bound();
        let reservation = slot.reserve().unwrap();
        assert_eq!(reservation, ReservationId(0));
        assert_eq!(bridge.metrics().open_reservations, 1);
        assert!(matches!(slot.reserve(), Err(BridgeError::InvalidState(_))));

        let _fut = slot.submit_request(Payload::single(json!("late")));
        assert_eq!(bridge.metrics().open_reservations, 0);
        assert_eq!(bridge.collect_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_after_submit_is_refused() {
        let (bridge, slot) = bound();
        let _fut = slot.submit_request(Payload::single(json!("early")));

        let err = slot.reserve().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState(_)));
        assert!(err.is_caller_bug());
        assert_eq!(bridge.metrics().open_reservations, 0);

        // Nothing is left for the collection to wait on
        assert_eq!(bridge.collect_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_through_slot() {
        let (bridge, slot) = bound();
        let parked = slot.finalize_with_priority(3);
        assert_eq!(bridge.release(), 1);
        parked.await.unwrap();
    }
}
