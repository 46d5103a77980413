//! Client-facing resource handles.
//!
//! A [`ResourceHandle`] routes operations for one named resource to the
//! partition that owns them: by key hash for sharded types, always the first
//! partition otherwise. Typed façades ([`AtomicValue`], [`MultiMap`]) encode
//! operations and decode results. Handles never retry; a `NotLeader` result
//! carries the leader hint when one is known and the caller decides what to
//! do with it. Partitions this member does not replicate have no known
//! leader; their replica set is available from [`PartitionRoute::replicas`].

use super::atomic_value::{AtomicValueCommand, AtomicValueQuery, Versioned};
use super::completion::{completion_pair, CompletionHandle, Decoder};
use super::config::CoordinatedResourceConfig;
use super::multimap::{MultiMapCommand, MultiMapQuery};
use super::state_machine::{decode, encode, Command, ResourceType};
use crate::control::membership::MemberId;
use crate::control::routing::{PartitionKey, PartitionRouter};
use crate::core::error::{TrellisError, TrellisResult};
use crate::partition::driver::PartitionHandle;
use crate::raft::node::NodeStatus;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

/// Where a partition's operations go from this member.
#[derive(Debug, Clone)]
pub enum PartitionRoute {
    /// A replica hosted by this member.
    Local(PartitionHandle),
    /// Not hosted here; operations fail with `NotLeader` and no hint.
    Remote {
        key: PartitionKey,
        replicas: Vec<MemberId>,
    },
}

impl PartitionRoute {
    pub fn key(&self) -> &PartitionKey {
        match self {
            Self::Local(handle) => handle.key(),
            Self::Remote { key, .. } => key,
        }
    }

    /// Replica set of a partition this member does not host.
    pub fn replicas(&self) -> Option<&[MemberId]> {
        match self {
            Self::Local(_) => None,
            Self::Remote { replicas, .. } => Some(replicas),
        }
    }

    fn redirect() -> TrellisError {
        TrellisError::not_leader(None)
    }

    fn submit<T>(&self, command: Command, decode: Decoder<T>) -> CompletionHandle<T> {
        match self {
            Self::Local(handle) => {
                let (responder, completion) = completion_pair(decode);
                handle.submit_with(command, responder);
                completion
            }
            Self::Remote { .. } => CompletionHandle::failed(Self::redirect()),
        }
    }

    fn query<T>(&self, query: Bytes, decode: Decoder<T>) -> CompletionHandle<T> {
        match self {
            Self::Local(handle) => {
                let (responder, completion) = completion_pair(decode);
                handle.query_with(query, responder);
                completion
            }
            Self::Remote { .. } => CompletionHandle::failed(Self::redirect()),
        }
    }
}

/// Untyped handle for one resolved resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    name: String,
    resource_type: ResourceType,
    router: PartitionRouter,
    routes: Vec<PartitionRoute>,
    operation_timeout: Duration,
}

impl ResourceHandle {
    /// `routes[i]` must serve `config.partitions[i]`.
    pub fn new(
        config: &CoordinatedResourceConfig,
        routes: Vec<PartitionRoute>,
    ) -> TrellisResult<Self> {
        if routes.len() != config.partitions.len() || routes.is_empty() {
            return Err(TrellisError::internal(format!(
                "resource '{}' has {} partitions but {} routes",
                config.name,
                config.partitions.len(),
                routes.len()
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            resource_type: config.resource_type,
            router: PartitionRouter::new(config.name.clone(), config.partition_count()),
            routes,
            operation_timeout: config.operation_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn partition_count(&self) -> usize {
        self.routes.len()
    }

    pub fn routes(&self) -> &[PartitionRoute] {
        &self.routes
    }

    /// Route for `key`; unsharded resources and keyless operations use the first partition.
    pub fn route(&self, key: Option<&[u8]>) -> &PartitionRoute {
        let slot = match key {
            Some(key) if self.resource_type.is_sharded() => self.router.route_key(key),
            _ => 0,
        };
        &self.routes[slot.min(self.routes.len() - 1)]
    }

    pub fn submit<T>(
        &self,
        key: Option<&[u8]>,
        command: Command,
        decode: Decoder<T>,
    ) -> CompletionHandle<T> {
        if command.resource_type != self.resource_type {
            return CompletionHandle::failed(self.type_mismatch(command.resource_type));
        }
        self.route(key)
            .submit(command, decode)
            .with_timeout(self.operation_timeout)
    }

    pub fn query<T>(
        &self,
        key: Option<&[u8]>,
        query: Bytes,
        decode: Decoder<T>,
    ) -> CompletionHandle<T> {
        self.route(key)
            .query(query, decode)
            .with_timeout(self.operation_timeout)
    }

    /// Submit the same command to every partition.
    pub fn submit_all<T>(&self, command: Command, decode: Decoder<T>) -> Vec<CompletionHandle<T>> {
        self.routes
            .iter()
            .map(|route| {
                route
                    .submit(command.clone(), decode)
                    .with_timeout(self.operation_timeout)
            })
            .collect()
    }

    /// Run the same query on every partition.
    pub fn query_all<T>(&self, query: Bytes, decode: Decoder<T>) -> Vec<CompletionHandle<T>> {
        self.routes
            .iter()
            .map(|route| {
                route
                    .query(query.clone(), decode)
                    .with_timeout(self.operation_timeout)
            })
            .collect()
    }

    /// Status of each locally hosted partition replica.
    pub async fn status(&self) -> Vec<TrellisResult<NodeStatus>> {
        let mut statuses = Vec::new();
        for route in &self.routes {
            if let PartitionRoute::Local(handle) = route {
                statuses.push(handle.status().await);
            }
        }
        statuses
    }

    fn type_mismatch(&self, got: ResourceType) -> TrellisError {
        TrellisError::invalid_command(format!(
            "resource '{}' is a {}, not a {}",
            self.name, self.resource_type, got
        ))
    }

    fn expect_type(self, expected: ResourceType) -> TrellisResult<Self> {
        if self.resource_type == expected {
            Ok(self)
        } else {
            Err(self.type_mismatch(expected))
        }
    }
}

fn encode_op<T: Serialize>(resource_type: ResourceType, op: &T) -> TrellisResult<Command> {
    Command::encode(resource_type, op)
}

/// Await every handle concurrently and fold the successes, failing on the
/// first error. All timeouts start together, so the fan-out is bounded by a
/// single operation timeout.
async fn fold_all<T, A>(
    mut handles: Vec<CompletionHandle<T>>,
    init: A,
    mut fold: impl FnMut(A, T) -> A,
) -> TrellisResult<A> {
    let mut outputs: Vec<Option<T>> = handles.iter().map(|_| None).collect();
    std::future::poll_fn(|cx| {
        let mut pending = false;
        for (handle, output) in handles.iter_mut().zip(outputs.iter_mut()) {
            if output.is_some() {
                continue;
            }
            match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(value)) => *output = Some(value),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => pending = true,
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    })
    .await?;
    Ok(outputs.into_iter().flatten().fold(init, |acc, value| fold(acc, value)))
}

/// Linearizable single value.
#[derive(Debug, Clone)]
pub struct AtomicValue {
    resource: ResourceHandle,
}

impl AtomicValue {
    pub fn new(resource: ResourceHandle) -> TrellisResult<Self> {
        Ok(Self {
            resource: resource.expect_type(ResourceType::AtomicValue)?,
        })
    }

    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    /// Current value.
    pub fn get(&self) -> CompletionHandle<Option<Bytes>> {
        self.read(AtomicValueQuery::Get, decode::<Option<Bytes>>)
    }

    /// Current value and the log index that last changed it.
    pub fn get_versioned(&self) -> CompletionHandle<Versioned> {
        self.read(AtomicValueQuery::GetVersioned, decode::<Versioned>)
    }

    /// Replace the value, resolving to the previous one.
    pub fn set(&self, value: Option<Bytes>) -> CompletionHandle<Option<Bytes>> {
        self.write(AtomicValueCommand::Set { value }, decode::<Option<Bytes>>)
    }

    /// Replace the value with `update` if it currently equals `expect`.
    pub fn compare_and_set(
        &self,
        expect: Option<Bytes>,
        update: Option<Bytes>,
    ) -> CompletionHandle<bool> {
        self.write(
            AtomicValueCommand::CompareAndSet { expect, update },
            decode::<bool>,
        )
    }

    fn write<T>(&self, op: AtomicValueCommand, decode: Decoder<T>) -> CompletionHandle<T> {
        match encode_op(ResourceType::AtomicValue, &op) {
            Ok(command) => self.resource.submit(None, command, decode),
            Err(err) => CompletionHandle::failed(err),
        }
    }

    fn read<T>(&self, op: AtomicValueQuery, decode: Decoder<T>) -> CompletionHandle<T> {
        match encode(&op) {
            Ok(query) => self.resource.query(None, query, decode),
            Err(err) => CompletionHandle::failed(err),
        }
    }
}

/// Key to value-set map sharded across partitions.
#[derive(Debug, Clone)]
pub struct MultiMap {
    resource: ResourceHandle,
}

impl MultiMap {
    pub fn new(resource: ResourceHandle) -> TrellisResult<Self> {
        Ok(Self {
            resource: resource.expect_type(ResourceType::MultiMap)?,
        })
    }

    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    /// Add `value` to `key`'s set, resolving to whether the set changed.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> CompletionHandle<bool> {
        let key = key.into();
        let op = MultiMapCommand::Put {
            key: key.clone(),
            value: value.into(),
        };
        self.write(key, op, decode::<bool>)
    }

    /// Remove one value, or all values when `value` is `None`.
    /// Resolves to the values actually removed.
    pub fn remove(
        &self,
        key: impl Into<Bytes>,
        value: Option<Bytes>,
    ) -> CompletionHandle<Vec<Bytes>> {
        let key = key.into();
        let op = MultiMapCommand::Remove {
            key: key.clone(),
            value,
        };
        self.write(key, op, decode::<Vec<Bytes>>)
    }

    /// Copy of `key`'s value set.
    pub fn get(&self, key: impl Into<Bytes>) -> CompletionHandle<BTreeSet<Bytes>> {
        let key = key.into();
        let op = MultiMapQuery::Get { key: key.clone() };
        self.read(key, op, decode::<BTreeSet<Bytes>>)
    }

    pub fn contains_key(&self, key: impl Into<Bytes>) -> CompletionHandle<bool> {
        let key = key.into();
        let op = MultiMapQuery::ContainsKey { key: key.clone() };
        self.read(key, op, decode::<bool>)
    }

    pub fn contains_entry(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> CompletionHandle<bool> {
        let key = key.into();
        let op = MultiMapQuery::ContainsEntry {
            key: key.clone(),
            value: value.into(),
        };
        self.read(key, op, decode::<bool>)
    }

    /// Total entries across all partitions.
    pub async fn size(&self) -> TrellisResult<u64> {
        let query = encode(&MultiMapQuery::Size)?;
        let handles = self.resource.query_all(query, decode::<u64>);
        fold_all(handles, 0u64, |total, n| total + n).await
    }

    pub async fn is_empty(&self) -> TrellisResult<bool> {
        Ok(self.size().await? == 0)
    }

    /// Remove every entry, resolving to the number removed.
    ///
    /// Each partition clears atomically; the resource as a whole does not.
    pub async fn clear(&self) -> TrellisResult<u64> {
        let command = encode_op(ResourceType::MultiMap, &MultiMapCommand::Clear)?;
        let handles = self.resource.submit_all(command, decode::<u64>);
        fold_all(handles, 0u64, |total, n| total + n).await
    }

    fn write<T>(&self, key: Bytes, op: MultiMapCommand, decode: Decoder<T>) -> CompletionHandle<T> {
        if key.is_empty() {
            return CompletionHandle::failed(empty_key());
        }
        match encode_op(ResourceType::MultiMap, &op) {
            Ok(command) => self.resource.submit(Some(&key), command, decode),
            Err(err) => CompletionHandle::failed(err),
        }
    }

    fn read<T>(&self, key: Bytes, op: MultiMapQuery, decode: Decoder<T>) -> CompletionHandle<T> {
        if key.is_empty() {
            return CompletionHandle::failed(empty_key());
        }
        match encode(&op) {
            Ok(query) => self.resource.query(Some(&key), query, decode),
            Err(err) => CompletionHandle::failed(err),
        }
    }
}

fn empty_key() -> TrellisError {
    TrellisError::invalid_command("multi-map keys cannot be empty")
}
