//! Serializable views of a run for status displays and troubleshooting.

use serde::Serialize;
use waypoint_gateway::{Payload, RunStatus, Task, TaskStatus, WorkflowRun};

use crate::detector::Classification;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
  pub task_id: String,
  pub reference_name: String,
  pub task_type: String,
  pub status: TaskStatus,
}

impl From<&Task> for TaskSummary {
  fn from(task: &Task) -> Self {
    Self {
      task_id: task.task_id.clone(),
      reference_name: task.reference_name.clone(),
      task_type: task.task_type.clone(),
      status: task.status,
    }
  }
}

/// Status of a run and its tasks in engine order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
  pub run_id: String,
  pub status: RunStatus,
  /// Keys currently present in the run output.
  pub output_keys: Vec<String>,
  pub tasks: Vec<TaskSummary>,
  /// Epoch milliseconds, as reported by the engine.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason_for_incompletion: Option<String>,
}

impl From<&WorkflowRun> for RunSummary {
  fn from(run: &WorkflowRun) -> Self {
    Self {
      run_id: run.run_id.clone(),
      status: run.status,
      output_keys: run.output.keys().cloned().collect(),
      tasks: run.tasks.iter().map(TaskSummary::from).collect(),
      start_time: run.start_time,
      end_time: run.end_time,
      reason_for_incompletion: run.reason_for_incompletion.clone(),
    }
  }
}

/// Everything needed to tell why a run is not moving.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugSnapshot {
  pub classification: Classification,
  /// Tasks the client could act on right now.
  pub actionable: Vec<TaskSummary>,
  pub tasks: Vec<TaskSummary>,
  /// Output of the intake task, which the run's routing branches read.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub intake_output: Option<Payload>,
  pub output: Payload,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason_for_incompletion: Option<String>,
}

impl DebugSnapshot {
  /// Build a snapshot of `run`. The intake task is the latest task named
  /// `intake_reference`, or the run's first task when unset.
  pub fn new(
    run: &WorkflowRun,
    classification: Classification,
    intake_reference: Option<&str>,
  ) -> Self {
    let intake = match intake_reference {
      Some(name) => run.tasks.iter().rev().find(|t| t.reference_name == name),
      None => run.tasks.first(),
    };

    Self {
      classification,
      actionable: run
        .tasks
        .iter()
        .filter(|t| t.is_actionable())
        .map(TaskSummary::from)
        .collect(),
      tasks: run.tasks.iter().map(TaskSummary::from).collect(),
      intake_output: intake.map(|t| t.output_data.clone()),
      output: run.output.clone(),
      reason_for_incompletion: run.reason_for_incompletion.clone(),
    }
  }
}
