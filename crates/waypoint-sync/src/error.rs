//! Sync errors.

use std::path::PathBuf;
use std::time::Duration;

use waypoint_gateway::{GatewayError, RunStatus, TaskStatus};

use crate::detector::StuckReason;
use crate::waiter::WaitTarget;

/// Errors surfaced by sync operations.
///
/// "Not yet available" is never an error: locators return `Ok(None)` and
/// waiters keep polling.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// Talking to the engine failed.
  #[error("{operation} failed for '{target}': {source}")]
  Transport {
    operation: &'static str,
    target: String,
    #[source]
    source: GatewayError,
  },

  /// The task was no longer actionable when a completion was attempted.
  /// The desired end state may already hold.
  #[error("task '{task_id}' is already {status}, completion skipped")]
  CompletionConflict { task_id: String, status: TaskStatus },

  /// A completion was requested with a status that leaves the task open.
  #[error("cannot complete task '{task_id}' with non-terminal status {status}")]
  InvalidCompletionStatus { task_id: String, status: TaskStatus },

  /// The run stopped making progress. Diagnostic, not an engine verdict.
  #[error("run '{run_id}' appears stuck: {reason}")]
  StuckWorkflow {
    run_id: String,
    target: Option<WaitTarget>,
    reason: StuckReason,
  },

  /// The run reached a terminal status before the awaited condition held.
  #[error("run '{run_id}' ended as {status} before {target} was available")]
  RunEnded {
    run_id: String,
    target: WaitTarget,
    status: RunStatus,
  },

  /// A wait exceeded its time or poll bound.
  #[error("timed out waiting for {target} in run '{run_id}' after {polls} polls ({elapsed:?})")]
  Timeout {
    run_id: String,
    target: WaitTarget,
    polls: u32,
    elapsed: Duration,
  },

  /// A wait was abandoned by the caller.
  #[error("wait for {target} in run '{run_id}' cancelled")]
  Cancelled { run_id: String, target: WaitTarget },

  /// The session is not attached to a run.
  #[error("session '{session_id}' has no active run")]
  NoActiveRun { session_id: String },
}

impl SyncError {
  /// Build a mapper wrapping gateway errors with operation context.
  pub(crate) fn transport(
    operation: &'static str,
    target: impl Into<String>,
  ) -> impl FnOnce(GatewayError) -> Self {
    let target = target.into();
    move |source| Self::Transport {
      operation,
      target,
      source,
    }
  }

  /// Whether the caller can offer "try again".
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Transport { source, .. } => source.is_retryable(),
      Self::Timeout { .. } | Self::Cancelled { .. } => true,
      _ => false,
    }
  }

  /// Whether this is guidance rather than a hard failure.
  pub fn is_warning(&self) -> bool {
    matches!(
      self,
      Self::CompletionConflict { .. } | Self::StuckWorkflow { .. }
    )
  }
}

/// Errors loading a [`SyncConfig`](crate::SyncConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("invalid config value for '{field}': {message}")]
  Invalid {
    field: &'static str,
    message: String,
  },
}
