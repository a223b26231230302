//! Sync configuration.
//!
//! Configuration can be loaded from a JSON file. Every field has a default,
//! so a file only needs the values it overrides:
//!
//! ```json
//! {
//!   "workflow_name": "TripMatch_BPA",
//!   "workflow_version": 26,
//!   "poll_interval_ms": 1000,
//!   "ready_signal": "present",
//!   "detector": {
//!     "fallbacks": [
//!       { "reference_name": "LogUnhandledDuration", "reason": "branch condition unhandled" }
//!     ],
//!     "intake_reference": "UserPreferences"
//!   }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Predicate deciding when a run output value counts as ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadySignal {
  /// Ready once the value is non-empty: `null`, `false`, `0`, `""`, `[]` and
  /// `{}` all read as "still pending". A step whose real result is one of
  /// those values is never observed as complete.
  #[default]
  NonEmpty,
  /// Ready as soon as the key holds any non-null value.
  Present,
}

impl ReadySignal {
  pub fn is_ready(self, value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match self {
      Self::Present => !value.is_null(),
      Self::NonEmpty => match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
      },
    }
  }
}

/// A reference name whose presence means the run took a fallback branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRule {
  pub reference_name: String,
  pub reason: String,
}

impl FallbackRule {
  pub fn new(reference_name: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      reference_name: reference_name.into(),
      reason: reason.into(),
    }
  }
}

/// Data driving the stuck-state heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  /// Known fallback steps, checked in order.
  pub fallbacks: Vec<FallbackRule>,
  /// When set, the "no follow-on task" rule only fires if the single
  /// completed task has this reference name.
  pub intake_reference: Option<String>,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      fallbacks: vec![FallbackRule::new(
        "LogUnhandledDuration",
        "branch condition unhandled",
      )],
      intake_reference: None,
    }
  }
}

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Workflow definition started by `start_run`.
  pub workflow_name: String,
  pub workflow_version: u32,
  /// Identity presented when acquiring and updating tasks.
  pub worker_id: String,
  /// Delay between polls while waiting.
  pub poll_interval_ms: u64,
  /// Upper bound for a single wait. `None` waits until cancelled.
  pub wait_timeout_ms: Option<u64>,
  pub max_polls: Option<u32>,
  /// Consecutive stuck classifications that end a task wait. 0 disables.
  pub stuck_after: u32,
  pub ready_signal: ReadySignal,
  pub detector: DetectorConfig,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      workflow_name: "TripMatch_BPA".to_string(),
      workflow_version: 26,
      worker_id: "waypoint-client".to_string(),
      poll_interval_ms: 2000,
      wait_timeout_ms: None,
      max_polls: None,
      stuck_after: 3,
      ready_signal: ReadySignal::NonEmpty,
      detector: DetectorConfig::default(),
    }
  }
}

impl SyncConfig {
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Reject values that would turn a wait into a busy loop.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.poll_interval_ms == 0 {
      return Err(ConfigError::Invalid {
        field: "poll_interval_ms",
        message: "must be greater than zero".to_string(),
      });
    }
    Ok(())
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn wait_timeout(&self) -> Option<Duration> {
    self.wait_timeout_ms.map(Duration::from_millis)
  }
}
