//! In-memory registry of live connections per user.
//!
//! A user can hold several connections at once (multiple devices/tabs), so the
//! registry is a keyed multi-map: `UserId -> {ConnectionHandle}`. A second map
//! records the owner of every handle so a handle is only ever listed under one
//! identity.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identifier of an authenticated principal (the JWT `sub` claim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque reference to one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(Uuid);

impl ConnectionHandle {
    /// Allocate a fresh handle for a new connection.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Concurrency-safe `UserId -> {ConnectionHandle}` map.
///
/// Every mutation of a user's handle set happens under that user's shard
/// write lock, so readers never observe a partially updated set. Cloning the
/// registry shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<UserId, HashSet<ConnectionHandle>>>,
    owners: Arc<DashMap<ConnectionHandle, UserId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `handle` with `user`. Idempotent.
    ///
    /// If the handle is currently held by another user it is moved.
    pub fn add(&self, user: &UserId, handle: ConnectionHandle) {
        let previous = self.owners.insert(handle, user.clone());
        if let Some(previous) = previous.filter(|p| p != user) {
            self.detach(&previous, &handle);
        }

        self.users.entry(user.clone()).or_default().insert(handle);

        tracing::debug!(
            user_id = %user,
            handle = %handle,
            connections = self.users.get(user).map(|s| s.len()).unwrap_or(0),
            "Connection registered"
        );
    }

    /// Drop the association between `user` and `handle`.
    ///
    /// Unknown users/handles, or a handle owned by someone else, are a no-op.
    pub fn remove(&self, user: &UserId, handle: &ConnectionHandle) {
        let owned = self
            .owners
            .remove_if(handle, |_, owner| owner == user)
            .is_some();
        if !owned {
            return;
        }
        self.detach(user, handle);

        tracing::debug!(user_id = %user, handle = %handle, "Connection unregistered");
    }

    /// Snapshot of the handles currently registered for `user`.
    pub fn get_handles(&self, user: &UserId) -> HashSet<ConnectionHandle> {
        self.users
            .get(user)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.users.get(user).is_some_and(|entry| !entry.is_empty())
    }

    /// Number of users with at least one live connection.
    pub fn online_users(&self) -> usize {
        self.users.len()
    }

    /// Total number of live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }

    /// Remove `handle` from the user's set and drop the entry once it is empty.
    fn detach(&self, user: &UserId, handle: &ConnectionHandle) {
        if let Some(mut entry) = self.users.get_mut(user) {
            entry.value_mut().remove(handle);
        }
        // Re-checked under the shard lock: an `add` racing in between keeps the entry.
        self.users.remove_if(user, |_, handles| handles.is_empty());
    }
}
