//! Atomic value state machine.
//!
//! A single versioned value. Compare-and-set compares the stored value, not
//! the version: an absent value matches an absent expectation, and two equal
//! values written at different times are indistinguishable to CAS. Callers
//! that need ABA protection read the version with `GetVersioned`.

use super::state_machine::{decode, decode_command, encode, ResourceStateMachine, ResourceType};
use crate::core::error::TrellisResult;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Mutating atomic value operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomicValueCommand {
    /// Replace the value. Result: previous value.
    Set { value: Option<Bytes> },
    /// Replace the value if it equals `expect`. Result: whether it did.
    CompareAndSet {
        expect: Option<Bytes>,
        update: Option<Bytes>,
    },
}

/// Read-only atomic value operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomicValueQuery {
    /// Result: current value.
    Get,
    /// Result: current value with its version.
    GetVersioned,
}

/// A value with the log index of its last change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Option<Bytes>,
    /// Log index of the last change, 0 if never written.
    pub version: u64,
}

/// Atomic value state machine.
#[derive(Debug, Default)]
pub struct AtomicValueStateMachine {
    state: Versioned,
}

impl AtomicValueStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn value(&self) -> Option<&Bytes> {
        self.state.value.as_ref()
    }

    /// Log index of the last change.
    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Replace the value, returning the previous one.
    pub fn set(&mut self, index: u64, value: Option<Bytes>) -> Option<Bytes> {
        self.state.version = index;
        std::mem::replace(&mut self.state.value, value)
    }

    /// Compare-and-set by value equality.
    pub fn compare_and_set(
        &mut self,
        index: u64,
        expect: Option<Bytes>,
        update: Option<Bytes>,
    ) -> bool {
        if self.state.value != expect {
            return false;
        }
        self.state.value = update;
        self.state.version = index;
        true
    }
}

impl ResourceStateMachine for AtomicValueStateMachine {
    fn resource_type(&self) -> ResourceType {
        ResourceType::AtomicValue
    }

    fn apply(&mut self, index: u64, command: &[u8]) -> TrellisResult<Bytes> {
        match decode_command::<AtomicValueCommand>(command)? {
            AtomicValueCommand::Set { value } => encode(&self.set(index, value)),
            AtomicValueCommand::CompareAndSet { expect, update } => {
                encode(&self.compare_and_set(index, expect, update))
            }
        }
    }

    fn query(&self, query: &[u8]) -> TrellisResult<Bytes> {
        match decode_command::<AtomicValueQuery>(query)? {
            AtomicValueQuery::Get => encode(&self.state.value),
            AtomicValueQuery::GetVersioned => encode(&self.state),
        }
    }

    fn snapshot(&self) -> TrellisResult<Bytes> {
        encode(&self.state)
    }

    fn restore(&mut self, snapshot: &[u8]) -> TrellisResult<()> {
        self.state = decode(snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut AtomicValueStateMachine, index: u64, cmd: AtomicValueCommand) -> Bytes {
        sm.apply(index, &encode(&cmd).unwrap()).unwrap()
    }

    fn b(s: &str) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn set_returns_previous_value() {
        let mut sm = AtomicValueStateMachine::new();
        let prev: Option<Bytes> =
            decode(&apply(&mut sm, 1, AtomicValueCommand::Set { value: b("a") })).unwrap();
        assert_eq!(prev, None);

        let prev: Option<Bytes> =
            decode(&apply(&mut sm, 2, AtomicValueCommand::Set { value: b("b") })).unwrap();
        assert_eq!(prev, b("a"));
        assert_eq!(sm.value(), b("b").as_ref());
        assert_eq!(sm.version(), 2);
    }

    #[test]
    fn cas_against_absent_value() {
        let mut sm = AtomicValueStateMachine::new();
        assert!(sm.compare_and_set(1, None, b("x")));
        assert!(!sm.compare_and_set(2, None, b("y")));
        assert_eq!(sm.value(), b("x").as_ref());
        assert_eq!(sm.version(), 1);
    }

    #[test]
    fn cas_with_same_expect_succeeds_once() {
        let mut sm = AtomicValueStateMachine::new();
        sm.set(1, b("a"));

        let first: bool = decode(&apply(
            &mut sm,
            2,
            AtomicValueCommand::CompareAndSet {
                expect: b("a"),
                update: b("b"),
            },
        ))
        .unwrap();
        let second: bool = decode(&apply(
            &mut sm,
            3,
            AtomicValueCommand::CompareAndSet {
                expect: b("a"),
                update: b("c"),
            },
        ))
        .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(sm.value(), b("b").as_ref());
    }

    #[test]
    fn cas_compares_values_not_versions() {
        let mut sm = AtomicValueStateMachine::new();
        sm.set(1, b("a"));
        sm.set(2, b("b"));
        sm.set(3, b("a"));
        assert!(sm.compare_and_set(4, b("a"), b("z")));
    }

    #[test]
    fn snapshot_restores_value_and_version() {
        let mut sm = AtomicValueStateMachine::new();
        sm.set(7, b("persisted"));
        let snapshot = sm.snapshot().unwrap();

        let mut restored = AtomicValueStateMachine::new();
        restored.restore(&snapshot).unwrap();
        let versioned: Versioned =
            decode(&restored.query(&encode(&AtomicValueQuery::GetVersioned).unwrap()).unwrap())
                .unwrap();
        assert_eq!(versioned.value, b("persisted"));
        assert_eq!(versioned.version, 7);
    }
}
