//! Completion records.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_gateway::TaskStatus;

use crate::cache::{read, write};

/// Result of a task completion accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
  pub task_id: String,
  pub run_id: String,
  pub reference_name: String,
  /// Terminal status submitted for the task.
  pub status: TaskStatus,
  pub completed_at: DateTime<Utc>,
}

/// Task ids this session has already completed.
#[derive(Debug, Default)]
pub struct CompletionRecord {
  outcomes: RwLock<HashMap<String, CompletionOutcome>>,
}

impl CompletionRecord {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, task_id: &str) -> Option<CompletionOutcome> {
    read(&self.outcomes).get(task_id).cloned()
  }

  /// Store an outcome. An existing record for the same task is kept.
  pub fn record(&self, outcome: CompletionOutcome) -> CompletionOutcome {
    write(&self.outcomes)
      .entry(outcome.task_id.clone())
      .or_insert(outcome)
      .clone()
  }

  pub fn len(&self) -> usize {
    read(&self.outcomes).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    write(&self.outcomes).clear();
  }
}
