//! Request payloads
//!
//! A payload is the list of items one producer contributes to the composite
//! request. Each entry states its intent explicitly: a bare item keyed by its
//! position, or an item with an explicit key.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::key::Key;
use crate::error::BridgeError;

/// One item of a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Entry<I> {
    /// Item keyed by its position in the payload
    Single(I),
    /// Item with an explicit key
    Keyed(I, Key),
}

impl<I> Entry<I> {
    pub fn item(&self) -> &I {
        match self {
            Self::Single(item) | Self::Keyed(item, _) => item,
        }
    }

    pub fn into_item(self) -> I {
        match self {
            Self::Single(item) | Self::Keyed(item, _) => item,
        }
    }

    /// The key this entry answers under when found at `position`
    pub fn key_at(&self, position: usize) -> Key {
        match self {
            Self::Single(_) => Key::from(position),
            Self::Keyed(_, key) => key.clone(),
        }
    }
}

/// Ordered list of entries submitted by one producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload<I> {
    entries: Vec<Entry<I>>,
}

impl<I> Payload<I> {
    pub fn new(entries: Vec<Entry<I>>) -> Self {
        Self { entries }
    }

    /// Payload holding one positional item
    pub fn single(item: I) -> Self {
        Self::new(vec![Entry::Single(item)])
    }

    /// Payload holding one explicitly keyed item
    pub fn keyed(item: I, key: impl Into<Key>) -> Self {
        Self::new(vec![Entry::Keyed(item, key.into())])
    }

    /// Append a positional item
    pub fn and_single(mut self, item: I) -> Self {
        self.entries.push(Entry::Single(item));
        self
    }

    /// Append an explicitly keyed item
    pub fn and_keyed(mut self, item: I, key: impl Into<Key>) -> Self {
        self.entries.push(Entry::Keyed(item, key.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry<I>] {
        &self.entries
    }

    pub fn items(&self) -> impl Iterator<Item = &I> {
        self.entries.iter().map(Entry::item)
    }

    /// Effective keys, in entry order
    pub fn keys(&self) -> Vec<Key> {
        self.entries
            .iter()
            .enumerate()
            .map(|(position, entry)| entry.key_at(position))
            .collect()
    }

    /// Split into items and their effective keys
    pub fn into_parts(self) -> (Vec<I>, Vec<Key>) {
        let keys = self.keys();
        let items = self.entries.into_iter().map(Entry::into_item).collect();
        (items, keys)
    }

    /// Check that no two entries answer under the same key
    pub fn validate(&self) -> Result<(), BridgeError> {
        let mut seen = HashSet::new();
        for (position, entry) in self.entries.iter().enumerate() {
            let key = entry.key_at(position);
            if !seen.insert(key.clone()) {
                return Err(BridgeError::InvalidPayload(format!(
                    "duplicate key '{}' at position {}",
                    key, position
                )));
            }
        }
        Ok(())
    }
}

impl<I> From<Vec<Entry<I>>> for Payload<I> {
    fn from(entries: Vec<Entry<I>>) -> Self {
        Self::new(entries)
    }
}
