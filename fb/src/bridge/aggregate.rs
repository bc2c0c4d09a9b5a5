//! Aggregation helpers: run one, run all, race
//!
//! Each helper starts its tasks eagerly: every task is polled once, so it
//! registers its request before the helper returns, and is then spawned on
//! tokio. Outcomes are stored in the bridge's aggregation results. `join`
//! waits for every spawned task.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Range;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, join_all, select_all, try_join_all};
use futures::task::noop_waker;
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::core::Bridge;
use crate::domain::{AggregationId, Exchange, Key, RequestId};
use crate::error::BridgeError;

/// A producer task: runs until it has its answer and returns its output
pub type Task<E> = BoxFuture<'static, Result<<E as Exchange>::Output, BridgeError>>;

/// Result stored by `run_one` or `run_all` under one owner key
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate<R> {
    One(R),
    All(Vec<R>),
    Keyed(IndexMap<Key, R>),
}

impl<R> Aggregate<R> {
    pub fn as_one(&self) -> Option<&R> {
        match self {
            Self::One(output) => Some(output),
            _ => None,
        }
    }

    pub fn as_all(&self) -> Option<&[R]> {
        match self {
            Self::All(outputs) => Some(outputs),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&IndexMap<Key, R>> {
        match self {
            Self::Keyed(outputs) => Some(outputs),
            _ => None,
        }
    }
}

/// Everything stored under one aggregation id
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateSlot<R> {
    /// Results of `run_one`/`run_all`, by owner key in completion order
    Owned(IndexMap<Key, Aggregate<R>>),
    /// Output of a race winner
    Won(R),
}

impl<R> AggregateSlot<R> {
    pub fn owned(&self, owner: &Key) -> Option<&Aggregate<R>> {
        match self {
            Self::Owned(owners) => owners.get(owner),
            Self::Won(_) => None,
        }
    }

    pub fn won(&self) -> Option<&R> {
        match self {
            Self::Won(output) => Some(output),
            Self::Owned(_) => None,
        }
    }
}

/// Aggregation results by aggregation id
pub type AggregateResults<R> = BTreeMap<AggregationId, AggregateSlot<R>>;

/// Drive a task to its first suspension point
///
/// The spawned task polls it again with a real waker.
fn start<T: Send + 'static>(mut task: BoxFuture<'static, T>) -> BoxFuture<'static, T> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match task.as_mut().poll(&mut cx) {
        Poll::Ready(output) => Box::pin(future::ready(output)),
        Poll::Pending => task,
    }
}

impl<E: Exchange> Bridge<E> {
    /// Run one task and store its output at `[id][owner]`
    ///
    /// Must be called from within a tokio runtime.
    pub fn run_one<F>(&self, id: AggregationId, owner: impl Into<Key>, task: F)
    where
        F: Future<Output = Result<E::Output, BridgeError>> + Send + 'static,
    {
        let owner = owner.into();
        debug!(bridge = %self.id(), aggregation = %id, %owner, "Bridge::run_one: called");

        let task: Task<E> = Box::pin(task);
        let task = start(task);
        let bridge = self.clone();
        let handle = tokio::spawn(async move {
            let output = task.await?;
            bridge.store_owned(id, owner, Aggregate::One(output));
            Ok(())
        });
        self.track(id, handle);
    }

    /// Run tasks concurrently and store all outputs at `[id][owner]`
    ///
    /// With `keys`, the outputs are stored as a key to output mapping paired
    /// by position; the key count must match the task count or nothing is
    /// spawned. The first task failure cancels the rest of the group.
    pub fn run_all(
        &self,
        id: AggregationId,
        owner: impl Into<Key>,
        tasks: Vec<Task<E>>,
        keys: Option<Vec<Key>>,
    ) -> Result<(), BridgeError> {
        if let Some(keys) = &keys
            && keys.len() != tasks.len()
        {
            warn!(bridge = %self.id(), aggregation = %id, keys = keys.len(), tasks = tasks.len(), "Bridge::run_all: length mismatch");
            return Err(BridgeError::LengthMismatch {
                keys: keys.len(),
                values: tasks.len(),
            });
        }

        let owner = owner.into();
        debug!(bridge = %self.id(), aggregation = %id, %owner, tasks = tasks.len(), "Bridge::run_all: called");

        let tasks: Vec<Task<E>> = tasks.into_iter().map(start).collect();
        let bridge = self.clone();
        let handle = tokio::spawn(async move {
            let outputs = try_join_all(tasks).await?;
            let aggregate = match keys {
                Some(keys) => Aggregate::Keyed(keys.into_iter().zip(outputs).collect()),
                None => Aggregate::All(outputs),
            };
            bridge.store_owned(id, owner, aggregate);
            Ok(())
        });
        self.track(id, handle);
        Ok(())
    }

    /// Race tasks; the first to complete is stored at `id + index`
    ///
    /// Requests a task registers while it is started are attributed to it.
    /// Once a winner is picked, every loser's requests are rejected with
    /// `RaceLost` and the losers that registered one are drained; the others
    /// are dropped at their suspension point. A winner that fails makes the
    /// race task fail.
    pub fn run_race(&self, id: AggregationId, tasks: Vec<Task<E>>) {
        if tasks.is_empty() {
            debug!(bridge = %self.id(), aggregation = %id, "Bridge::run_race: nothing to race");
            return;
        }
        debug!(bridge = %self.id(), aggregation = %id, tasks = tasks.len(), "Bridge::run_race: called");

        let mut registered: Vec<Range<u64>> = Vec::with_capacity(tasks.len());
        let mut tasks: Vec<Task<E>> = tasks
            .into_iter()
            .map(|task| {
                let before = self.request_counter();
                let task = start(task);
                registered.push(before..self.request_counter());
                task
            })
            .collect();

        let bridge = self.clone();
        let handle = tokio::spawn(async move {
            let (outcome, winner, remaining) = select_all(tasks.iter_mut()).await;
            drop(remaining);
            debug!(bridge = %bridge.id(), aggregation = %id, winner, "Bridge::run_race: race decided");

            let fault = bridge.reject_losers(id, winner, &registered);
            let stored = outcome.map(|output| bridge.store_won(id.offset(winner), output));

            let losers: Vec<Task<E>> = tasks
                .into_iter()
                .zip(registered)
                .enumerate()
                .filter(|(index, (_, ids))| *index != winner && !ids.is_empty())
                .map(|(_, (task, _))| task)
                .collect();
            let drained = join_all(losers).await;
            let lost = drained.iter().filter(|result| matches!(result, Err(BridgeError::RaceLost))).count();
            debug!(bridge = %bridge.id(), aggregation = %id, drained = drained.len(), lost, "Bridge::run_race: losers drained");

            stored?;
            match fault {
                Some(fault) => Err(fault),
                None => Ok(()),
            }
        });
        self.track(id, handle);
    }

    /// Reject every request registered by a race loser with `RaceLost`
    ///
    /// A handler that hands `RaceLost` back is ignored; the first other
    /// handler error is returned once every loser has been signalled.
    fn reject_losers(&self, id: AggregationId, winner: usize, registered: &[Range<u64>]) -> Option<BridgeError> {
        let mut fault = None;
        let losers = registered
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != winner)
            .flat_map(|(_, ids)| ids.clone());

        for raw in losers {
            match self.try_reject(RequestId(raw), BridgeError::RaceLost) {
                Ok(_) | Err(BridgeError::RaceLost) => {}
                Err(err) => {
                    warn!(bridge = %self.id(), aggregation = %id, request = raw, %err, "Bridge::run_race: loser handler failed");
                    fault.get_or_insert(err);
                }
            }
        }
        fault
    }

    /// Wait for every aggregation task spawned so far
    ///
    /// Tasks are awaited in spawn order; the first failure is returned after
    /// all of them have finished.
    pub async fn join(&self) -> Result<(), BridgeError> {
        let tasks = std::mem::take(&mut self.lock().tasks);
        debug!(bridge = %self.id(), tasks = tasks.len(), "Bridge::join: called");

        let mut first_failure = None;
        for (id, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(BridgeError::Aborted),
                Err(e) => Err(BridgeError::TaskFailed(e.to_string())),
            };

            if let Err(err) = outcome {
                warn!(bridge = %self.id(), aggregation = %id, %err, "Bridge::join: aggregation task failed");
                self.lock().metrics.task_failures += 1;
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand over the aggregation results stored so far
    pub fn take_aggregate_results(&self) -> AggregateResults<E::Output> {
        std::mem::take(&mut self.lock().aggregates)
    }

    /// Aggregation ids that currently hold a result
    pub fn aggregate_ids(&self) -> Vec<AggregationId> {
        self.lock().aggregates.keys().copied().collect()
    }

    fn track(&self, id: AggregationId, handle: JoinHandle<Result<(), BridgeError>>) {
        let mut state = self.lock();
        if state.closed {
            debug!(bridge = %self.id(), aggregation = %id, "Bridge::track: bridge shut down, aborting task");
            handle.abort();
            return;
        }
        state.tasks.push((id, handle));
        state.metrics.tasks_spawned += 1;
    }

    fn store_owned(&self, id: AggregationId, owner: Key, aggregate: Aggregate<E::Output>) {
        let mut state = self.lock();
        let slot = state
            .aggregates
            .entry(id)
            .or_insert_with(|| AggregateSlot::Owned(IndexMap::new()));

        match slot {
            AggregateSlot::Owned(owners) => {
                owners.insert(owner, aggregate);
            }
            AggregateSlot::Won(_) => {
                warn!(aggregation = %id, "Bridge::store_owned: replacing a race result");
                let mut owners = IndexMap::new();
                owners.insert(owner, aggregate);
                *slot = AggregateSlot::Owned(owners);
            }
        }
    }

    fn store_won(&self, id: AggregationId, output: E::Output) {
        let mut state = self.lock();
        if state.aggregates.insert(id, AggregateSlot::Won(output)).is_some() {
            warn!(aggregation = %id, "Bridge::store_won: replaced an existing result");
        }
    }
}
