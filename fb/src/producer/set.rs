//! Registration of a producer list with one bridge

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Producer, ProducerItem};
use crate::bridge::{AggregateResults, Bridge, Task};
use crate::domain::{AggregationId, Exchange, Key};
use crate::error::BridgeError;

/// How the tasks of a producer list are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Discipline {
    /// Every task answers; results are stored per producer and option
    Collect,
    /// The first task to finish wins
    Race,
}

/// A producer task or one level of nested tasks, ready to spawn
enum Planned<E: Exchange> {
    One(AggregationId, Key, Task<E>),
    All(AggregationId, Key, Vec<Task<E>>, Vec<Key>),
}

/// Producers bound to one bridge
///
/// Every bound producer is disposed exactly once, when the set is finished
/// or dropped.
pub struct ProducerSet<E: Exchange> {
    bridge: Bridge<E>,
    discipline: Discipline,
    bound: Vec<Arc<dyn Producer<E>>>,
}

impl<E: Exchange> std::fmt::Debug for ProducerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSet")
            .field("bridge", &self.bridge)
            .field("discipline", &self.discipline)
            .field("bound", &self.bound.len())
            .finish()
    }
}

impl<E: Exchange> ProducerSet<E> {
    /// Bind the producers, expand their options and start their tasks
    ///
    /// Nothing is spawned unless every producer expands cleanly. A nested
    /// producer that lists another nested producer fails with
    /// `NestingTooDeep`; producers bound so far are disposed on failure.
    pub fn register(
        bridge: &Bridge<E>,
        discipline: Discipline,
        producers: Vec<Arc<dyn Producer<E>>>,
    ) -> Result<Self, BridgeError> {
        info!(bridge = %bridge.id(), ?discipline, producers = producers.len(), "ProducerSet::register: called");

        let mut set = Self {
            bridge: bridge.clone(),
            discipline,
            bound: Vec::new(),
        };

        match discipline {
            Discipline::Collect => {
                let plan = set.plan_collect(producers)?;
                for planned in plan {
                    match planned {
                        Planned::One(id, owner, task) => bridge.run_one(id, owner, task),
                        Planned::All(id, owner, tasks, keys) => bridge.run_all(id, owner, tasks, Some(keys))?,
                    }
                }
            }
            Discipline::Race => {
                let tasks = set.plan_race(producers)?;
                bridge.run_race(AggregationId(0), tasks);
            }
        }

        Ok(set)
    }

    fn plan_collect(&mut self, producers: Vec<Arc<dyn Producer<E>>>) -> Result<Vec<Planned<E>>, BridgeError> {
        let mut plan = Vec::new();
        for (index, producer) in producers.into_iter().enumerate() {
            let id = AggregationId::from(index);
            for (position, item) in self.expand(producer)?.into_iter().enumerate() {
                let owner = Key::from(position);
                match item {
                    ProducerItem::Task(task) => plan.push(Planned::One(id, owner, task)),
                    ProducerItem::Nested(nested) => {
                        let tasks = self.expand_nested(nested)?;
                        let keys = (0..tasks.len()).map(Key::from).collect();
                        plan.push(Planned::All(id, owner, tasks, keys));
                    }
                }
            }
        }
        Ok(plan)
    }

    fn plan_race(&mut self, producers: Vec<Arc<dyn Producer<E>>>) -> Result<Vec<Task<E>>, BridgeError> {
        let mut flat = Vec::new();
        for producer in producers {
            for item in self.expand(producer)? {
                match item {
                    ProducerItem::Task(task) => flat.push(task),
                    ProducerItem::Nested(nested) => flat.extend(self.expand_nested(nested)?),
                }
            }
        }
        Ok(flat)
    }

    fn expand(&mut self, producer: Arc<dyn Producer<E>>) -> Result<Vec<ProducerItem<E>>, BridgeError> {
        producer.bind(&self.bridge)?;
        self.bound.push(Arc::clone(&producer));
        let name = producer.name().to_string();
        let items = producer.options();
        debug!(bridge = %self.bridge.id(), producer = %name, options = items.len(), "ProducerSet::expand: expanded");
        Ok(items)
    }

    fn expand_nested(&mut self, producer: Arc<dyn Producer<E>>) -> Result<Vec<Task<E>>, BridgeError> {
        let name = producer.name().to_string();
        self.expand(producer)?
            .into_iter()
            .map(|item| match item {
                ProducerItem::Task(task) => Ok(task),
                ProducerItem::Nested(_) => {
                    warn!(bridge = %self.bridge.id(), producer = %name, "ProducerSet::expand_nested: nested too deep");
                    Err(BridgeError::NestingTooDeep(format!(
                        "{}::options(): doubly nested producers cannot be expanded",
                        name
                    )))
                }
            })
            .collect()
    }

    pub fn bridge(&self) -> &Bridge<E> {
        &self.bridge
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Number of producers bound so far, nested ones included
    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Wait for every task, dispose the producers and hand over the results
    pub async fn finish(mut self) -> Result<AggregateResults<E::Output>, BridgeError> {
        let joined = self.bridge.join().await;
        self.dispose();
        joined?;
        Ok(self.bridge.take_aggregate_results())
    }

    /// Dispose every bound producer
    pub fn dispose(&mut self) {
        if self.bound.is_empty() {
            return;
        }
        debug!(bridge = %self.bridge.id(), producers = self.bound.len(), "ProducerSet::dispose: called");
        for producer in self.bound.drain(..) {
            producer.dispose();
        }
    }
}

impl<E: Exchange> Drop for ProducerSet<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::domain::{JsonExchange, Payload, RequestId};
    use crate::producer::ProducerSlot;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Asks one question per label
    struct Asker {
        slot: ProducerSlot<JsonExchange>,
        labels: Vec<&'static str>,
        disposed: Arc<AtomicUsize>,
    }

    impl Asker {
        fn new(labels: Vec<&'static str>, disposed: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                slot: ProducerSlot::new(),
                labels,
                disposed: Arc::clone(disposed),
            })
        }
    }

    impl Producer<JsonExchange> for Asker {
        fn slot(&self) -> &ProducerSlot<JsonExchange> {
            &self.slot
        }

        fn options(self: Arc<Self>) -> Vec<ProducerItem<JsonExchange>> {
            let mut payload = Payload::new(Vec::new());
            for label in &self.labels {
                payload = payload.and_keyed(json!(label), *label);
            }
            vec![ProducerItem::task(async move { self.slot.submit_request(payload).await })]
        }

        fn user_dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Lists the given nested producers
    struct Group {
        slot: ProducerSlot<JsonExchange>,
        members: Vec<Arc<dyn Producer<JsonExchange>>>,
    }

    impl Producer<JsonExchange> for Group {
        fn slot(&self) -> &ProducerSlot<JsonExchange> {
            &self.slot
        }

        fn options(self: Arc<Self>) -> Vec<ProducerItem<JsonExchange>> {
            self.members.iter().cloned().map(ProducerItem::Nested).collect()
        }
    }

    fn group(members: Vec<Arc<dyn Producer<JsonExchange>>>) -> Arc<Group> {
        Arc::new(Group {
            slot: ProducerSlot::new(),
            members,
        })
    }

    #[tokio::test]
    async fn test_collect_registers_in_order() {
        let bridge = Bridge::<JsonExchange>::new(BridgeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let producers: Vec<Arc<dyn Producer<JsonExchange>>> = vec![
            Asker::new(vec!["name"], &disposed),
            Asker::new(vec!["age", "city"], &disposed),
        ];

        let set = ProducerSet::register(&bridge, Discipline::Collect, producers).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(bridge.pending_ids(), vec![RequestId(0), RequestId(1)]);

        bridge.resolve(RequestId(0), json!({"name": "Alice"})).unwrap();
        bridge.resolve(RequestId(1), json!({"age": 30, "city": "Kyoto"})).unwrap();

        let results = set.finish().await.unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        let first = results[&AggregationId(0)].owned(&Key::Index(0)).unwrap();
        assert_eq!(first.as_one(), Some(&json!({"name": "Alice"})));
        let second = results[&AggregationId(1)].owned(&Key::Index(0)).unwrap();
        assert_eq!(second.as_one(), Some(&json!({"age": 30, "city": "Kyoto"})));
    }

    #[tokio::test]
    async fn test_collect_nested_group_is_keyed_by_position() {
        let bridge = Bridge::<JsonExchange>::new(BridgeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let inner: Vec<Arc<dyn Producer<JsonExchange>>> = vec![
            Asker::new(vec!["a"], &disposed),
            Asker::new(vec!["b"], &disposed),
        ];
        let producers: Vec<Arc<dyn Producer<JsonExchange>>> = vec![group(inner)];

        let set = ProducerSet::register(&bridge, Discipline::Collect, producers).unwrap();
        assert_eq!(set.len(), 3);
        bridge.resolve(RequestId(0), json!("first")).unwrap();
        bridge.resolve(RequestId(1), json!("second")).unwrap();

        let results = set.finish().await.unwrap();
        let keyed = results[&AggregationId(0)]
            .owned(&Key::Index(0))
            .and_then(|aggregate| aggregate.as_keyed())
            .unwrap();
        assert_eq!(keyed.get(&Key::Index(0)), Some(&json!("first")));
        assert_eq!(keyed.get(&Key::Index(1)), Some(&json!("second")));
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_doubly_nested_fails_and_disposes() {
        let bridge = Bridge::<JsonExchange>::new(BridgeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let leaf: Arc<dyn Producer<JsonExchange>> = Asker::new(vec!["deep"], &disposed);
        let middle: Arc<dyn Producer<JsonExchange>> = group(vec![leaf]);
        let first: Arc<dyn Producer<JsonExchange>> = Asker::new(vec!["x"], &disposed);
        let producers = vec![first, group(vec![middle]) as Arc<dyn Producer<JsonExchange>>];

        let err = ProducerSet::register(&bridge, Discipline::Collect, producers).unwrap_err();
        assert!(matches!(err, BridgeError::NestingTooDeep(_)));

        // Nothing was spawned or submitted, and the bound producer was disposed
        assert_eq!(bridge.metrics().tasks_spawned, 0);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_race_flattens_one_level() {
        let bridge = Bridge::<JsonExchange>::new(BridgeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let inner: Vec<Arc<dyn Producer<JsonExchange>>> = vec![
            Asker::new(vec!["b"], &disposed),
            Asker::new(vec!["c"], &disposed),
        ];
        let producers: Vec<Arc<dyn Producer<JsonExchange>>> = vec![Asker::new(vec!["a"], &disposed), group(inner)];

        let set = ProducerSet::register(&bridge, Discipline::Race, producers).unwrap();
        assert_eq!(bridge.pending_count(), 3);

        bridge.resolve(RequestId(2), json!("c")).unwrap();
        let results = set.finish().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[&AggregationId(2)].won(), Some(&json!("c")));
        assert_eq!(disposed.load(Ordering::SeqCst), 3);

        // The losers were told they lost; nothing is left to sweep
        assert!(bridge.pending_ids().is_empty());
        assert_eq!(bridge.metrics().rejected, 2);
    }

    #[tokio::test]
    async fn test_drop_disposes_once() {
        let bridge = Bridge::<JsonExchange>::new(BridgeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let asker = Asker::new(vec!["q"], &disposed);
        let producers: Vec<Arc<dyn Producer<JsonExchange>>> = vec![asker.clone()];

        let mut set = ProducerSet::register(&bridge, Discipline::Collect, producers).unwrap();
        set.dispose();
        drop(set);
        asker.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(asker.slot().is_disposed());

        assert!(asker.slot().has_requested());
        bridge.shutdown();
    }
}
