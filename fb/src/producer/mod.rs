//! Producer contract
//!
//! A producer contributes one request to a composite request. It embeds a
//! `ProducerSlot` and lists the tasks it wants run; each task typically
//! submits a payload through the slot and returns what it makes of the
//! answer. A `ProducerSet` binds a list of producers to a bridge and
//! registers their tasks.

mod set;
mod slot;

use std::future::Future;
use std::sync::Arc;

use crate::bridge::{Bridge, Task};
use crate::domain::Exchange;
use crate::error::BridgeError;

pub use set::{Discipline, ProducerSet};
pub use slot::ProducerSlot;

/// One option listed by a producer
pub enum ProducerItem<E: Exchange> {
    /// A task run directly by the bridge
    Task(Task<E>),
    /// A sub-producer whose tasks are registered as one group
    Nested(Arc<dyn Producer<E>>),
}

impl<E: Exchange> ProducerItem<E> {
    pub fn task<F>(task: F) -> Self
    where
        F: Future<Output = Result<E::Output, BridgeError>> + Send + 'static,
    {
        Self::Task(Box::pin(task))
    }

    pub fn nested<P: Producer<E>>(producer: Arc<P>) -> Self {
        Self::Nested(producer)
    }
}

impl<E: Exchange> std::fmt::Debug for ProducerItem<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(_) => write!(f, "Task"),
            Self::Nested(producer) => write!(f, "Nested({})", producer.name()),
        }
    }
}

/// Participant in a composite request
pub trait Producer<E: Exchange>: Send + Sync + 'static {
    /// The slot holding this producer's bridge state
    fn slot(&self) -> &ProducerSlot<E>;

    /// List the tasks and sub-producers to register, in display order
    ///
    /// Called once, after `bind`.
    fn options(self: Arc<Self>) -> Vec<ProducerItem<E>>;

    /// Cleanup hook run by the first `dispose`
    fn user_dispose(&self) {}

    /// Name used in log lines and errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn bind(&self, bridge: &Bridge<E>) -> Result<(), BridgeError> {
        self.slot().bind(bridge)
    }

    /// Release the bridge; `user_dispose` runs on the first call only
    fn dispose(&self) {
        if self.slot().dispose() {
            self.user_dispose();
        }
    }
}
