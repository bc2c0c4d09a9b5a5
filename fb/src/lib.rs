//! FormBridge - scatter/gather coordination for composite requests
//!
//! Many independent asynchronous producers each contribute values to one
//! composite request. The request is sent once, and its single response is
//! split back so every producer receives its own answer.
//!
//! # Core Concepts
//!
//! - **Bridge**: id-indexed bookkeeping of every pending request, with
//!   reservations, a priority barrier and aggregation helpers
//! - **Producer**: a participant bound to one bridge through its `ProducerSlot`
//! - **Eager registration**: requests get their ids in call order, before
//!   anything is awaited
//! - **Failure broadcast**: a failed composite request rejects or aborts
//!   every producer that is still waiting
//!
//! # Modules
//!
//! - [`bridge`] - request/response hub, aggregation and barrier
//! - [`producer`] - producer contract and registration
//! - [`layout`] - flattening and splitting of the composite request
//! - [`domain`] - ids, keys, payloads and the exchanged value types
//! - [`error`] - error taxonomy

pub mod bridge;
pub mod domain;
pub mod error;
pub mod layout;
pub mod producer;

// Re-export commonly used types
pub use bridge::{
    Aggregate, AggregateResults, AggregateSlot, BarrierFuture, Bridge, BridgeConfig, BridgeMetrics, FailurePolicy,
    RejectHook, ResponseFuture, Task,
};
pub use domain::{AggregationId, Entry, Exchange, JsonExchange, Key, Payload, RequestId, ReservationId};
pub use error::BridgeError;
pub use layout::{CompositeLayout, Span};
pub use producer::{Discipline, Producer, ProducerItem, ProducerSet, ProducerSlot};
