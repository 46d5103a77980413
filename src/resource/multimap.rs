//! Multi-map state machine.
//!
//! Maps each key to a set of values. One instance holds the keys that route
//! to its partition; cross-partition operations (size, clear) are fanned out
//! by the façade and combined there.

use super::state_machine::{decode, decode_command, encode, ResourceStateMachine, ResourceType};
use crate::core::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mutating multi-map operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiMapCommand {
    /// Add a value to the key's set. Result: whether the set changed.
    Put { key: Bytes, value: Bytes },
    /// Remove one value, or every value when `value` is None.
    /// Result: the values removed.
    Remove { key: Bytes, value: Option<Bytes> },
    /// Remove every key held by this partition. Result: entries removed.
    Clear,
}

/// Read-only multi-map operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiMapQuery {
    /// Result: copy of the key's value set.
    Get { key: Bytes },
    /// Result: whether the key has any value.
    ContainsKey { key: Bytes },
    /// Result: whether the key holds the value.
    ContainsEntry { key: Bytes, value: Bytes },
    /// Result: number of (key, value) entries in this partition.
    Size,
}

/// Multi-map state machine.
#[derive(Debug, Default)]
pub struct MultiMapStateMachine {
    entries: BTreeMap<Bytes, BTreeSet<Bytes>>,
}

impl MultiMapStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key`.
    pub fn put(&mut self, key: Bytes, value: Bytes) -> bool {
        self.entries.entry(key).or_default().insert(value)
    }

    /// Remove one value, or all values when `value` is None.
    pub fn remove(&mut self, key: &[u8], value: Option<&Bytes>) -> Vec<Bytes> {
        let Some(values) = self.entries.get_mut(key) else {
            return Vec::new();
        };

        let removed = match value {
            Some(value) => {
                if values.remove(value) {
                    vec![value.clone()]
                } else {
                    Vec::new()
                }
            }
            None => std::mem::take(values).into_iter().collect(),
        };

        if values.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Copy of the value set for `key`.
    pub fn get(&self, key: &[u8]) -> BTreeSet<Bytes> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Number of (key, value) entries.
    pub fn size(&self) -> u64 {
        self.entries.values().map(|v| v.len() as u64).sum()
    }

    /// Remove all entries, returning how many were removed.
    pub fn clear(&mut self) -> u64 {
        let size = self.size();
        self.entries.clear();
        size
    }
}

fn validate_key(key: &[u8]) -> TrellisResult<()> {
    if key.is_empty() {
        return Err(TrellisError::invalid_command("multi-map key must not be empty"));
    }
    Ok(())
}

impl ResourceStateMachine for MultiMapStateMachine {
    fn resource_type(&self) -> ResourceType {
        ResourceType::MultiMap
    }

    fn apply(&mut self, _index: u64, command: &[u8]) -> TrellisResult<Bytes> {
        match decode_command::<MultiMapCommand>(command)? {
            MultiMapCommand::Put { key, value } => {
                validate_key(&key)?;
                encode(&self.put(key, value))
            }
            MultiMapCommand::Remove { key, value } => {
                validate_key(&key)?;
                encode(&self.remove(&key, value.as_ref()))
            }
            MultiMapCommand::Clear => encode(&self.clear()),
        }
    }

    fn query(&self, query: &[u8]) -> TrellisResult<Bytes> {
        match decode_command::<MultiMapQuery>(query)? {
            MultiMapQuery::Get { key } => {
                validate_key(&key)?;
                encode(&self.get(&key))
            }
            MultiMapQuery::ContainsKey { key } => encode(&self.entries.contains_key(&key)),
            MultiMapQuery::ContainsEntry { key, value } => encode(
                &self
                    .entries
                    .get(&key)
                    .is_some_and(|values| values.contains(&value)),
            ),
            MultiMapQuery::Size => encode(&self.size()),
        }
    }

    fn snapshot(&self) -> TrellisResult<Bytes> {
        encode(&self.entries)
    }

    fn restore(&mut self, snapshot: &[u8]) -> TrellisResult<()> {
        self.entries = decode(snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn put_is_idempotent() {
        let mut sm = MultiMapStateMachine::new();
        assert!(sm.put(b("k"), b("v")));
        assert!(!sm.put(b("k"), b("v")));
        assert_eq!(sm.get(b"k").len(), 1);
        assert_eq!(sm.size(), 1);
    }

    #[test]
    fn remove_one_value_keeps_others() {
        let mut sm = MultiMapStateMachine::new();
        sm.put(b("k"), b("v1"));
        sm.put(b("k"), b("v2"));
        assert_eq!(sm.remove(b"k", Some(&b("v1"))), vec![b("v1")]);
        assert_eq!(sm.get(b"k"), BTreeSet::from([b("v2")]));
    }

    #[test]
    fn remove_all_values_drops_key() {
        let mut sm = MultiMapStateMachine::new();
        sm.put(b("k"), b("v1"));
        sm.put(b("k"), b("v2"));
        let removed = sm.remove(b"k", None);
        assert_eq!(removed, vec![b("v1"), b("v2")]);
        assert!(sm.get(b"k").is_empty());
        assert_eq!(sm.size(), 0);
        assert!(sm.remove(b"k", None).is_empty());
    }

    #[test]
    fn get_returns_a_copy() {
        let mut sm = MultiMapStateMachine::new();
        sm.put(b("k"), b("v1"));
        let snapshot = sm.get(b"k");
        sm.put(b("k"), b("v2"));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn empty_key_is_invalid() {
        let mut sm = MultiMapStateMachine::new();
        let cmd = encode(&MultiMapCommand::Put {
            key: Bytes::new(),
            value: b("v"),
        })
        .unwrap();
        let err = sm.apply(1, &cmd).unwrap_err();
        assert!(matches!(err, TrellisError::InvalidCommand { .. }));
        assert_eq!(sm.size(), 0);
    }

    #[test]
    fn queries_and_snapshot() {
        let mut sm = MultiMapStateMachine::new();
        sm.put(b("a"), b("1"));
        sm.put(b("b"), b("2"));
        sm.put(b("b"), b("3"));

        let contains: bool = decode(
            &sm.query(
                &encode(&MultiMapQuery::ContainsEntry {
                    key: b("b"),
                    value: b("3"),
                })
                .unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(contains);

        let snapshot = sm.snapshot().unwrap();
        let mut restored = MultiMapStateMachine::new();
        restored.restore(&snapshot).unwrap();
        let size: u64 = decode(&restored.query(&encode(&MultiMapQuery::Size).unwrap()).unwrap())
            .unwrap();
        assert_eq!(size, 3);

        assert_eq!(restored.clear(), 3);
        assert_eq!(restored.size(), 0);
    }
}
