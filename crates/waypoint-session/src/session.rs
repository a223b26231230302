//! The session context passed into every sync operation.

use std::sync::RwLock;

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::cache::{SessionCache, read, write};
use crate::record::CompletionRecord;
use crate::resolution::ResolutionCache;

/// State of one interactive planning session.
///
/// Owns the active run id, the key/value cache, resolved task ids and the
/// completion record. All of them are cleared together by [`Session::reset`].
#[derive(Debug)]
pub struct Session {
  id: String,
  run_id: RwLock<Option<String>>,
  cache: SessionCache,
  resolutions: ResolutionCache,
  completions: CompletionRecord,
  completion_lock: Mutex<()>,
}

impl Session {
  pub fn new() -> Self {
    Self::with_id(uuid::Uuid::new_v4().to_string())
  }

  pub fn with_id(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      run_id: RwLock::new(None),
      cache: SessionCache::new(),
      resolutions: ResolutionCache::new(),
      completions: CompletionRecord::new(),
      completion_lock: Mutex::new(()),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// The run this session is driving, if one was started or attached.
  pub fn run_id(&self) -> Option<String> {
    read(&self.run_id).clone()
  }

  /// Reset the session and attach it to `run_id`.
  pub fn begin_run(&self, run_id: impl Into<String>) {
    let run_id = run_id.into();
    self.clear_state();
    info!(session_id = %self.id, run_id = %run_id, "session attached to run");
    *write(&self.run_id) = Some(run_id);
  }

  /// Clear the run id, cache, resolutions and completion record.
  pub fn reset(&self) {
    self.clear_state();
    *write(&self.run_id) = None;
    info!(session_id = %self.id, "session reset");
  }

  fn clear_state(&self) {
    self.cache.reset();
    self.resolutions.clear();
    self.completions.clear();
  }

  pub fn cache(&self) -> &SessionCache {
    &self.cache
  }

  pub fn resolutions(&self) -> &ResolutionCache {
    &self.resolutions
  }

  pub fn completions(&self) -> &CompletionRecord {
    &self.completions
  }

  /// Serialize completions: callers hold the guard across check, submit and
  /// record so completions apply in arrival order.
  pub async fn lock_completions(&self) -> MutexGuard<'_, ()> {
    self.completion_lock.lock().await
  }
}

impl Default for Session {
  fn default() -> Self {
    Self::new()
  }
}
