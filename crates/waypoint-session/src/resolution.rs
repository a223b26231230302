//! Reference name to task id resolutions.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::cache::{read, write};

#[derive(Debug, Default)]
struct Resolutions {
  run_id: Option<String>,
  by_reference: HashMap<String, String>,
}

/// Resolved task ids, scoped to a single run.
///
/// Inserting for a different run drops every entry of the previous run.
#[derive(Debug, Default)]
pub struct ResolutionCache {
  inner: RwLock<Resolutions>,
}

impl ResolutionCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Task id previously resolved for `reference_name` in `run_id`.
  pub fn get(&self, run_id: &str, reference_name: &str) -> Option<String> {
    let inner = read(&self.inner);
    if inner.run_id.as_deref() != Some(run_id) {
      return None;
    }
    inner.by_reference.get(reference_name).cloned()
  }

  pub fn insert(&self, run_id: &str, reference_name: &str, task_id: &str) {
    let mut inner = write(&self.inner);
    if inner.run_id.as_deref() != Some(run_id) {
      inner.by_reference.clear();
      inner.run_id = Some(run_id.to_string());
    }
    inner
      .by_reference
      .insert(reference_name.to_string(), task_id.to_string());
  }

  /// Drop every resolution pointing at `task_id`, so a later instance of the
  /// same reference name gets resolved afresh. Returns how many were dropped.
  pub fn forget_task(&self, task_id: &str) -> usize {
    let mut inner = write(&self.inner);
    let before = inner.by_reference.len();
    inner.by_reference.retain(|_, id| id != task_id);
    before - inner.by_reference.len()
  }

  pub fn len(&self) -> usize {
    read(&self.inner).by_reference.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    let mut inner = write(&self.inner);
    inner.by_reference.clear();
    inner.run_id = None;
  }
}
