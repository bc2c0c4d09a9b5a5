//! Composite request layout
//!
//! Flattens collected payloads into the single item list sent to the
//! consumer and slices the single response back per request.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Key, Payload, RequestId};
use crate::error::BridgeError;

/// Where one request's items sit in the composite request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub request: RequestId,
    pub start: usize,
    pub keys: Vec<Key>,
}

impl Span {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn end(&self) -> usize {
        self.start + self.keys.len()
    }

    fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end()
    }
}

/// Spans of every request, in request id order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeLayout {
    spans: Vec<Span>,
}

impl CompositeLayout {
    /// Flatten collected payloads into one item list and its layout
    pub fn build<I: Clone>(collected: &BTreeMap<RequestId, Payload<I>>) -> (Vec<I>, Self) {
        let mut items = Vec::new();
        let mut spans = Vec::with_capacity(collected.len());

        for (request, payload) in collected {
            let (request_items, keys) = payload.clone().into_parts();
            spans.push(Span {
                request: *request,
                start: items.len(),
                keys,
            });
            items.extend(request_items);
        }

        debug!(requests = spans.len(), items = items.len(), "CompositeLayout::build: called");
        (items, Self { spans })
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Number of items in the composite request
    pub fn total_len(&self) -> usize {
        self.spans.last().map(Span::end).unwrap_or(0)
    }

    /// Split a flat response into per-request keyed answers
    pub fn split<A>(&self, answers: Vec<A>) -> Result<Vec<(RequestId, IndexMap<Key, A>)>, BridgeError> {
        if answers.len() != self.total_len() {
            return Err(BridgeError::LengthMismatch {
                keys: self.total_len(),
                values: answers.len(),
            });
        }

        let mut answers = answers.into_iter();
        let split = self
            .spans
            .iter()
            .map(|span| {
                let keyed: IndexMap<Key, A> = span.keys.iter().cloned().zip(answers.by_ref().take(span.len())).collect();
                (span.request, keyed)
            })
            .collect();
        Ok(split)
    }

    /// Map an index of the flat item list to its request and key
    pub fn locate(&self, index: usize) -> Option<(RequestId, &Key)> {
        self.spans
            .iter()
            .find(|span| span.contains(index))
            .map(|span| (span.request, &span.keys[index - span.start]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn collected() -> BTreeMap<RequestId, Payload<Value>> {
        let mut collected = BTreeMap::new();
        collected.insert(RequestId(0), Payload::single(json!("name")));
        collected.insert(
            RequestId(2),
            Payload::keyed(json!("age"), "age").and_keyed(json!("city"), "city"),
        );
        collected.insert(RequestId(5), Payload::single(json!("ok")).and_single(json!("cancel")));
        collected
    }

    #[test]
    fn test_build_flattens_in_id_order() {
        let (items, layout) = CompositeLayout::build(&collected());
        assert_eq!(items, vec![json!("name"), json!("age"), json!("city"), json!("ok"), json!("cancel")]);
        assert_eq!(layout.total_len(), 5);

        let starts: Vec<usize> = layout.spans().iter().map(|span| span.start).collect();
        assert_eq!(starts, vec![0, 1, 3]);
        assert_eq!(layout.spans()[2].keys, vec![Key::Index(0), Key::Index(1)]);
    }

    #[test]
    fn test_split_pairs_keys_with_answers() {
        let (_, layout) = CompositeLayout::build(&collected());
        let split = layout
            .split(vec![json!("Alice"), json!(30), json!("Kyoto"), json!(true), json!(false)])
            .unwrap();

        assert_eq!(split.len(), 3);
        assert_eq!(split[0].0, RequestId(0));
        assert_eq!(split[0].1.get(&Key::Index(0)), Some(&json!("Alice")));
        assert_eq!(split[1].0, RequestId(2));
        assert_eq!(split[1].1.get(&Key::from("city")), Some(&json!("Kyoto")));
        assert_eq!(split[2].1.get(&Key::Index(1)), Some(&json!(false)));
    }

    #[test]
    fn test_split_length_mismatch() {
        let (_, layout) = CompositeLayout::build(&collected());
        let err = layout.split(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::LengthMismatch { keys: 5, values: 1 }));
    }

    #[test]
    fn test_locate() {
        let (_, layout) = CompositeLayout::build(&collected());
        assert_eq!(layout.locate(0), Some((RequestId(0), &Key::Index(0))));
        assert_eq!(layout.locate(2), Some((RequestId(2), &Key::from("city"))));
        assert_eq!(layout.locate(4), Some((RequestId(5), &Key::Index(1))));
        assert_eq!(layout.locate(5), None);
    }

    #[test]
    fn test_empty_layout() {
        let (items, layout) = CompositeLayout::build::<Value>(&BTreeMap::new());
        assert!(items.is_empty());
        assert_eq!(layout.total_len(), 0);
        assert_eq!(layout.split(Vec::<Value>::new()).unwrap(), Vec::new());
        assert_eq!(layout.locate(0), None);
    }
}
