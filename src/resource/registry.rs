//! Resource type registry.
//!
//! Maps a resource type tag to the constructor of its state machine. A
//! partition looks up its constructor once, when the resource is opened.

use super::atomic_value::AtomicValueStateMachine;
use super::multimap::MultiMapStateMachine;
use super::state_machine::{ResourceStateMachine, ResourceType};
use crate::core::error::{TrellisError, TrellisResult};
use std::collections::HashMap;

/// Constructor for a resource state machine.
pub type StateMachineFactory = fn() -> Box<dyn ResourceStateMachine>;

fn new_atomic_value() -> Box<dyn ResourceStateMachine> {
    Box::new(AtomicValueStateMachine::new())
}

fn new_multimap() -> Box<dyn ResourceStateMachine> {
    Box::new(MultiMapStateMachine::new())
}

/// Registry of resource state machine constructors.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    factories: HashMap<ResourceType, StateMachineFactory>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in resource types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ResourceType::AtomicValue, new_atomic_value);
        registry.register(ResourceType::MultiMap, new_multimap);
        registry
    }

    /// Register or replace the constructor for a resource type.
    pub fn register(&mut self, resource_type: ResourceType, factory: StateMachineFactory) {
        self.factories.insert(resource_type, factory);
    }

    /// Check whether a resource type is registered.
    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.factories.contains_key(&resource_type)
    }

    /// Construct a fresh state machine for a resource type.
    pub fn create(
        &self,
        resource_type: ResourceType,
    ) -> TrellisResult<Box<dyn ResourceStateMachine>> {
        let factory = self.factories.get(&resource_type).ok_or_else(|| {
            TrellisError::invalid_command(format!("unregistered resource type: {}", resource_type))
        })?;
        Ok(factory())
    }
}
