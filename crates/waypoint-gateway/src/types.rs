use std::fmt;

use serde::{Deserialize, Serialize};

/// JSON object used for run outputs, task inputs and task outputs.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Status of a workflow run as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
  Running,
  Completed,
  Failed,
  Terminated,
  TimedOut,
  Paused,
  /// Any status this client does not know about.
  #[serde(other)]
  Unknown,
}

impl RunStatus {
  /// Whether the engine will make no further progress on the run.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Self::Completed | Self::Failed | Self::Terminated | Self::TimedOut
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Running => "RUNNING",
      Self::Completed => "COMPLETED",
      Self::Failed => "FAILED",
      Self::Terminated => "TERMINATED",
      Self::TimedOut => "TIMED_OUT",
      Self::Paused => "PAUSED",
      Self::Unknown => "UNKNOWN",
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of a single task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  Scheduled,
  InProgress,
  Pending,
  Completed,
  CompletedWithErrors,
  Failed,
  FailedWithTerminalError,
  Canceled,
  TimedOut,
  Skipped,
  #[serde(other)]
  Unknown,
}

impl TaskStatus {
  /// A task is actionable iff a client may still submit a result for it.
  pub fn is_actionable(self) -> bool {
    matches!(self, Self::Scheduled | Self::InProgress | Self::Pending)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Scheduled => "SCHEDULED",
      Self::InProgress => "IN_PROGRESS",
      Self::Pending => "PENDING",
      Self::Completed => "COMPLETED",
      Self::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
      Self::Failed => "FAILED",
      Self::FailedWithTerminalError => "FAILED_WITH_TERMINAL_ERROR",
      Self::Canceled => "CANCELED",
      Self::TimedOut => "TIMED_OUT",
      Self::Skipped => "SKIPPED",
      Self::Unknown => "UNKNOWN",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A task instance inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub task_id: String,
  /// Logical name from the workflow definition. Not unique within a run when
  /// the definition loops.
  #[serde(rename = "referenceTaskName")]
  pub reference_name: String,
  pub task_type: String,
  pub status: TaskStatus,
  /// Run that owns this task.
  #[serde(rename = "workflowInstanceId", default)]
  pub run_id: String,
  #[serde(default)]
  pub input_data: Payload,
  #[serde(default)]
  pub output_data: Payload,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<i64>,
}

impl Task {
  pub fn new(
    task_id: impl Into<String>,
    reference_name: impl Into<String>,
    task_type: impl Into<String>,
    status: TaskStatus,
  ) -> Self {
    Self {
      task_id: task_id.into(),
      reference_name: reference_name.into(),
      task_type: task_type.into(),
      status,
      run_id: String::new(),
      input_data: Payload::new(),
      output_data: Payload::new(),
      start_time: None,
      end_time: None,
    }
  }

  pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.input_data.insert(key.into(), value);
    self
  }

  pub fn is_actionable(&self) -> bool {
    self.status.is_actionable()
  }
}

/// An instantiated execution of a workflow definition, as observed by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
  #[serde(rename = "workflowId")]
  pub run_id: String,
  pub status: RunStatus,
  /// Populated incrementally by the engine.
  #[serde(default)]
  pub output: Payload,
  /// Engine-provided order. Empty when fetched without tasks.
  #[serde(default)]
  pub tasks: Vec<Task>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason_for_incompletion: Option<String>,
}

impl WorkflowRun {
  pub fn new(run_id: impl Into<String>, status: RunStatus) -> Self {
    Self {
      run_id: run_id.into(),
      status,
      output: Payload::new(),
      tasks: Vec::new(),
      start_time: None,
      end_time: None,
      reason_for_incompletion: None,
    }
  }

  /// Append a task, stamping it with this run's id.
  pub fn with_task(mut self, mut task: Task) -> Self {
    task.run_id = self.run_id.clone();
    self.tasks.push(task);
    self
  }

  pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.output.insert(key.into(), value);
    self
  }

  pub fn find_task(&self, task_id: &str) -> Option<&Task> {
    self.tasks.iter().find(|t| t.task_id == task_id)
  }
}

/// Result submitted for a task, in the engine's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
  pub task_id: String,
  #[serde(rename = "workflowInstanceId")]
  pub run_id: String,
  pub worker_id: String,
  pub status: TaskStatus,
  #[serde(rename = "outputData")]
  pub output: Payload,
}
