//! Bridge between producers and the composite-request handler
//!
//! Producers submit requests and suspend; the handler collects every
//! payload, answers them, and releases the finalizers. Aggregation helpers
//! run producer tasks and store their outputs.

mod aggregate;
mod barrier;
mod config;
mod core;
mod metrics;
mod response;

pub use aggregate::{Aggregate, AggregateResults, AggregateSlot, Task};
pub use config::{BridgeConfig, FailurePolicy};
pub use self::core::{Bridge, RejectHook};
pub use metrics::BridgeMetrics;
pub use response::{BarrierFuture, ResponseFuture};
