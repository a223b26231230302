//! Session key/value cache.
//!
//! Holds facts the client already learned from the engine (resolved ids,
//! retrieved outputs) so repeated refresh cycles do not fetch them again.
//! The engine stays the source of truth: concurrent writers simply overwrite
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrency-safe key/value store scoped to one session.
///
/// Cloning yields another handle to the same entries.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
  entries: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl SessionCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<serde_json::Value> {
    read(&self.entries).get(key).cloned()
  }

  /// Get a value and deserialize it, treating a shape mismatch as absent.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self
      .get(key)
      .and_then(|value| serde_json::from_value(value).ok())
  }

  /// Insert a value. Last writer wins.
  pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
    write(&self.entries).insert(key.into(), value);
  }

  pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
    write(&self.entries).remove(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    read(&self.entries).contains_key(key)
  }

  pub fn len(&self) -> usize {
    read(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    read(&self.entries).is_empty()
  }

  /// Remove every entry.
  pub fn reset(&self) {
    write(&self.entries).clear();
  }
}
