//! In-memory workflow engine.
//!
//! Suitable for tests and offline demos. Runs can be inserted directly,
//! mutated between calls, or scripted as a sequence of snapshots that are
//! revealed one per `get_run` call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::WorkflowGateway;
use crate::types::{Payload, RunStatus, Task, TaskStatus, TaskUpdate, WorkflowRun};

/// Number of calls made to each gateway operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
  pub start_run: usize,
  pub get_run: usize,
  pub get_task: usize,
  pub poll_task: usize,
  pub update_task: usize,
  pub terminate_run: usize,
}

/// Gateway operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  StartRun,
  GetRun,
  GetTask,
  PollTask,
  UpdateTask,
  TerminateRun,
}

#[derive(Default)]
struct State {
  runs: HashMap<String, WorkflowRun>,
  scripts: HashMap<String, VecDeque<WorkflowRun>>,
  definitions: HashMap<(String, u32), Vec<Task>>,
  failures: HashMap<Operation, VecDeque<String>>,
  updates: Vec<TaskUpdate>,
  calls: CallCounts,
}

impl State {
  fn take_failure(&mut self, op: Operation) -> Result<(), GatewayError> {
    match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
      Some(message) => Err(GatewayError::unavailable(message)),
      None => Ok(()),
    }
  }

  fn find_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
    self
      .runs
      .values_mut()
      .flat_map(|run| run.tasks.iter_mut())
      .find(|task| task.task_id == task_id)
  }
}

/// A [`WorkflowGateway`] that keeps all runs in memory.
#[derive(Default)]
pub struct InMemoryGateway {
  state: Mutex<State>,
}

impl InMemoryGateway {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register the tasks scheduled when a run of `name`/`version` starts.
  pub fn register_definition(&self, name: &str, version: u32, initial_tasks: Vec<Task>) {
    self
      .state()
      .definitions
      .insert((name.to_string(), version), initial_tasks);
  }

  /// Insert or replace a run.
  pub fn insert_run(&self, run: WorkflowRun) {
    self.state().runs.insert(run.run_id.clone(), run);
  }

  /// Queue snapshots for a run. Each `get_run` reveals the next one; the last
  /// snapshot stays in place once the queue drains.
  pub fn script_run(&self, run_id: &str, snapshots: Vec<WorkflowRun>) {
    self
      .state()
      .scripts
      .insert(run_id.to_string(), snapshots.into());
  }

  /// Mutate a stored run in place.
  pub fn update_run<F>(&self, run_id: &str, f: F) -> bool
  where
    F: FnOnce(&mut WorkflowRun),
  {
    match self.state().runs.get_mut(run_id) {
      Some(run) => {
        f(run);
        true
      }
      None => false,
    }
  }

  /// Make the next call to `op` fail with a retryable error.
  pub fn fail_next(&self, op: Operation, message: impl Into<String>) {
    self
      .state()
      .failures
      .entry(op)
      .or_default()
      .push_back(message.into());
  }

  pub fn run(&self, run_id: &str) -> Option<WorkflowRun> {
    self.state().runs.get(run_id).cloned()
  }

  pub fn calls(&self) -> CallCounts {
    self.state().calls
  }

  /// Every update accepted so far, in arrival order.
  pub fn updates(&self) -> Vec<TaskUpdate> {
    self.state().updates.clone()
  }
}

#[async_trait]
impl WorkflowGateway for InMemoryGateway {
  async fn start_run(
    &self,
    name: &str,
    version: u32,
    input: Payload,
  ) -> Result<String, GatewayError> {
    let mut state = self.state();
    state.calls.start_run += 1;
    state.take_failure(Operation::StartRun)?;

    let tasks = state
      .definitions
      .get(&(name.to_string(), version))
      .cloned()
      .ok_or_else(|| GatewayError::not_found(format!("workflow definition '{}' v{}", name, version)))?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut run = WorkflowRun::new(&run_id, RunStatus::Running);
    for (index, mut task) in tasks.into_iter().enumerate() {
      task.task_id = format!("{}-{}", run_id, index);
      if index == 0 {
        task.input_data.extend(input.clone());
      }
      run = run.with_task(task);
    }
    state.runs.insert(run_id.clone(), run);
    Ok(run_id)
  }

  async fn get_run(&self, run_id: &str, include_tasks: bool) -> Result<WorkflowRun, GatewayError> {
    let mut state = self.state();
    state.calls.get_run += 1;
    state.take_failure(Operation::GetRun)?;

    if let Some(next) = state.scripts.get_mut(run_id).and_then(VecDeque::pop_front) {
      state.runs.insert(run_id.to_string(), next);
    }

    let mut run = state
      .runs
      .get(run_id)
      .cloned()
      .ok_or_else(|| GatewayError::not_found(format!("run '{}'", run_id)))?;
    if !include_tasks {
      run.tasks.clear();
    }
    Ok(run)
  }

  async fn get_task(&self, task_id: &str) -> Result<Task, GatewayError> {
    let mut state = self.state();
    state.calls.get_task += 1;
    state.take_failure(Operation::GetTask)?;

    state
      .find_task_mut(task_id)
      .map(|task| task.clone())
      .ok_or_else(|| GatewayError::not_found(format!("task '{}'", task_id)))
  }

  async fn poll_task(
    &self,
    task_type: &str,
    _worker_id: &str,
  ) -> Result<Option<Task>, GatewayError> {
    let mut state = self.state();
    state.calls.poll_task += 1;
    state.take_failure(Operation::PollTask)?;

    let polled = state
      .runs
      .values_mut()
      .flat_map(|run| run.tasks.iter_mut())
      .find(|task| task.task_type == task_type && task.status == TaskStatus::Scheduled)
      .map(|task| {
        task.status = TaskStatus::InProgress;
        task.clone()
      });
    Ok(polled)
  }

  async fn update_task(&self, update: &TaskUpdate) -> Result<(), GatewayError> {
    let mut state = self.state();
    state.calls.update_task += 1;
    state.take_failure(Operation::UpdateTask)?;

    let task = state
      .find_task_mut(&update.task_id)
      .ok_or_else(|| GatewayError::not_found(format!("task '{}'", update.task_id)))?;

    if !task.is_actionable() {
      return Err(GatewayError::Status {
        status: 409,
        body: format!("task '{}' is already {}", task.task_id, task.status),
      });
    }

    task.status = update.status;
    task.output_data = update.output.clone();
    state.updates.push(update.clone());
    Ok(())
  }

  async fn terminate_run(&self, run_id: &str, reason: &str) -> Result<(), GatewayError> {
    let mut state = self.state();
    state.calls.terminate_run += 1;
    state.take_failure(Operation::TerminateRun)?;

    let run = state
      .runs
      .get_mut(run_id)
      .ok_or_else(|| GatewayError::not_found(format!("run '{}'", run_id)))?;

    run.status = RunStatus::Terminated;
    run.reason_for_incompletion = Some(reason.to_string());
    for task in run.tasks.iter_mut().filter(|t| t.is_actionable()) {
      task.status = TaskStatus::Canceled;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn intake_definition() -> Vec<Task> {
    vec![Task::new("", "UserPreferences", "HUMAN", TaskStatus::Scheduled)]
  }

  #[tokio::test]
  async fn test_start_run_schedules_definition_tasks() {
    let gateway = InMemoryGateway::new();
    gateway.register_definition("TripMatch_BPA", 26, intake_definition());

    let mut input = Payload::new();
    input.insert("country".to_string(), json!("Italy"));
    let run_id = gateway.start_run("TripMatch_BPA", 26, input).await.unwrap();

    let run = gateway.get_run(&run_id, true).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.tasks.len(), 1);
    assert_eq!(run.tasks[0].run_id, run_id);
    assert_eq!(run.tasks[0].input_data["country"], "Italy");
  }

  #[tokio::test]
  async fn test_start_unknown_definition_is_not_found() {
    let gateway = InMemoryGateway::new();
    let err = gateway
      .start_run("missing", 1, Payload::new())
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { .. }));
  }

  #[tokio::test]
  async fn test_scripted_snapshots_advance_per_fetch() {
    let gateway = InMemoryGateway::new();
    gateway.script_run(
      "r1",
      vec![
        WorkflowRun::new("r1", RunStatus::Running),
        WorkflowRun::new("r1", RunStatus::Completed),
      ],
    );

    assert_eq!(gateway.get_run("r1", false).await.unwrap().status, RunStatus::Running);
    assert_eq!(gateway.get_run("r1", false).await.unwrap().status, RunStatus::Completed);
    assert_eq!(gateway.get_run("r1", false).await.unwrap().status, RunStatus::Completed);
    assert_eq!(gateway.calls().get_run, 3);
  }

  #[tokio::test]
  async fn test_update_rejects_terminal_task() {
    let gateway = InMemoryGateway::new();
    gateway.insert_run(
      WorkflowRun::new("r1", RunStatus::Running)
        .with_task(Task::new("t1", "UserPreferences", "HUMAN", TaskStatus::Completed)),
    );

    let update = TaskUpdate {
      task_id: "t1".to_string(),
      run_id: "r1".to_string(),
      worker_id: "w".to_string(),
      status: TaskStatus::Completed,
      output: Payload::new(),
    };
    let err = gateway.update_task(&update).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 409, .. }));
    assert!(gateway.updates().is_empty());
  }

  #[tokio::test]
  async fn test_injected_failure_is_consumed_once() {
    let gateway = InMemoryGateway::new();
    gateway.insert_run(WorkflowRun::new("r1", RunStatus::Running));
    gateway.fail_next(Operation::GetRun, "connection reset");

    let err = gateway.get_run("r1", true).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(gateway.get_run("r1", true).await.is_ok());
  }

  #[tokio::test]
  async fn test_terminate_cancels_actionable_tasks() {
    let gateway = InMemoryGateway::new();
    gateway.insert_run(
      WorkflowRun::new("r1", RunStatus::Running)
        .with_task(Task::new("t1", "UserPreferences", "HUMAN", TaskStatus::Completed))
        .with_task(Task::new("t2", "ShowItinerary", "HUMAN", TaskStatus::Scheduled)),
    );

    gateway.terminate_run("r1", "User terminated").await.unwrap();

    let run = gateway.run("r1").unwrap();
    assert_eq!(run.status, RunStatus::Terminated);
    assert_eq!(run.tasks[0].status, TaskStatus::Completed);
    assert_eq!(run.tasks[1].status, TaskStatus::Canceled);
  }
}
