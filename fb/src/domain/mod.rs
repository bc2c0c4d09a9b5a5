//! Domain types shared by the bridge and the producer contract

mod exchange;
mod id;
mod key;
mod payload;

pub use exchange::{Exchange, JsonExchange};
pub use id::{AggregationId, RequestId, ReservationId};
pub use key::Key;
pub use payload::{Entry, Payload};
