//! Bridge error types

use std::panic::Location;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::RequestId;

/// Errors raised by the bridge and the producer contract
///
/// Cloneable so one rejection can be delivered to every pending producer.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Invalid value: {message} (at {location})")]
    InvalidValue {
        message: String,
        location: &'static Location<'static>,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No pending handler for request {0}")]
    UnknownId(RequestId),

    #[error("Request rejected: {0}")]
    Rejected(Arc<eyre::Report>),

    #[error("Request aborted")]
    Aborted,

    #[error("Lost the race to another producer")]
    RaceLost,

    #[error("Producer used after dispose: {0}")]
    Reuse(String),

    #[error("Producer is not bound to a bridge")]
    Unbound,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Length mismatch: {keys} keys for {values} values")]
    LengthMismatch { keys: usize, values: usize },

    #[error("Doubly nested producers cannot be expanded: {0}")]
    NestingTooDeep(String),

    #[error("{0}")]
    Propagated(Box<BridgeError>),

    #[error("Aggregation task failed: {0}")]
    TaskFailed(String),
}

impl BridgeError {
    /// Build a rejection carrying an arbitrary cause
    pub fn rejected(cause: impl Into<eyre::Report>) -> Self {
        Self::Rejected(Arc::new(cause.into()))
    }

    /// Wrap an error in one propagation layer
    pub fn propagated(inner: BridgeError) -> Self {
        Self::Propagated(Box::new(inner))
    }

    /// Check if this is the abort sentinel
    pub fn is_aborted(&self) -> bool {
        matches!(self, BridgeError::Aborted)
    }

    /// Check if this is the race-lost signal
    pub fn is_race_lost(&self) -> bool {
        matches!(self, BridgeError::RaceLost)
    }

    /// Check if this is a rejection
    pub fn is_rejected(&self) -> bool {
        matches!(self, BridgeError::Rejected(_))
    }

    /// Check if this error always indicates a bug in the calling code
    pub fn is_caller_bug(&self) -> bool {
        match self {
            BridgeError::InvalidValue { .. } => true,
            BridgeError::InvalidPayload(_) => true,
            BridgeError::UnknownId(_) => true,
            BridgeError::Reuse(_) => true,
            BridgeError::Unbound => true,
            BridgeError::InvalidState(_) => true,
            BridgeError::LengthMismatch { .. } => true,
            BridgeError::NestingTooDeep(_) => true,
            BridgeError::Rejected(_) => false,
            BridgeError::Aborted => false,
            BridgeError::RaceLost => false,
            BridgeError::Propagated(inner) => inner.is_caller_bug(),
            BridgeError::TaskFailed(_) => false,
        }
    }

    /// Get the rejection cause if this is a rejection
    pub fn cause(&self) -> Option<&eyre::Report> {
        match self {
            BridgeError::Rejected(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_carries_cause() {
        let err = BridgeError::rejected(eyre::eyre!("form closed by user"));
        assert!(err.is_rejected());
        assert!(!err.is_aborted());
        assert_eq!(err.cause().unwrap().to_string(), "form closed by user");
        assert!(err.to_string().contains("form closed by user"));

        // Clones share the same cause
        let copy = err.clone();
        assert_eq!(copy.to_string(), err.to_string());
    }

    #[test]
    fn test_invalid_value_message_has_location() {
        let location = Location::caller();
        let err = BridgeError::InvalidValue {
            message: "duplicate key".to_string(),
            location,
        };

        let msg = err.to_string();
        assert!(msg.contains("duplicate key"));
        assert!(msg.contains("error.rs"));
    }

    #[test]
    fn test_is_caller_bug() {
        assert!(BridgeError::UnknownId(RequestId(1)).is_caller_bug());
        assert!(BridgeError::Unbound.is_caller_bug());
        assert!(BridgeError::LengthMismatch { keys: 1, values: 2 }.is_caller_bug());
        assert!(!BridgeError::Aborted.is_caller_bug());
        assert!(!BridgeError::RaceLost.is_caller_bug());
        assert!(!BridgeError::rejected(eyre::eyre!("x")).is_caller_bug());
        assert!(BridgeError::propagated(BridgeError::Unbound).is_caller_bug());
    }

    #[test]
    fn test_propagated_displays_inner() {
        let err = BridgeError::propagated(BridgeError::Aborted);
        assert_eq!(err.to_string(), "Request aborted");
    }
}
