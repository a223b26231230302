//! Task completion.
//!
//! Completing a task takes three engine calls: fetch it (type and owning run),
//! acquire it through the poll endpoint under this client's worker identity,
//! then submit the result. Completions within one [`Session`] are serialized,
//! and a task id the session already completed is answered from the
//! [`CompletionRecord`](waypoint_session::CompletionRecord) without a second
//! submission.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use waypoint_gateway::{GatewayError, Payload, TaskStatus, TaskUpdate, WorkflowGateway};
use waypoint_session::{CompletionOutcome, Session};

use crate::error::SyncError;

/// Submits task results at most once per session.
pub struct CompletionCoordinator<G> {
  gateway: Arc<G>,
  worker_id: String,
}

impl<G: WorkflowGateway> CompletionCoordinator<G> {
  pub fn new(gateway: Arc<G>, worker_id: impl Into<String>) -> Self {
    Self {
      gateway,
      worker_id: worker_id.into(),
    }
  }

  pub fn worker_id(&self) -> &str {
    &self.worker_id
  }

  /// Complete `task_id` with `output`.
  pub async fn complete(
    &self,
    session: &Session,
    task_id: &str,
    output: Payload,
  ) -> Result<CompletionOutcome, SyncError> {
    self
      .complete_with(session, task_id, TaskStatus::Completed, output)
      .await
  }

  /// Finish `task_id` with a terminal `status` such as `FAILED`.
  ///
  /// Nothing is recorded unless the engine accepts the update, so a failed
  /// attempt can be retried as is.
  #[instrument(
    skip(self, session, status, output),
    fields(session_id = %session.id(), status = %status)
  )]
  pub async fn complete_with(
    &self,
    session: &Session,
    task_id: &str,
    status: TaskStatus,
    output: Payload,
  ) -> Result<CompletionOutcome, SyncError> {
    if status.is_actionable() || status == TaskStatus::Unknown {
      return Err(SyncError::InvalidCompletionStatus {
        task_id: task_id.to_string(),
        status,
      });
    }

    let _guard = session.lock_completions().await;

    if let Some(outcome) = session.completions().get(task_id) {
      debug!("task already completed in this session");
      return Ok(outcome);
    }

    let task = self
      .gateway
      .get_task(task_id)
      .await
      .map_err(SyncError::transport("fetch task", task_id))?;

    if !task.is_actionable() {
      warn!(current = %task.status, "task no longer actionable");
      return Err(SyncError::CompletionConflict {
        task_id: task_id.to_string(),
        status: task.status,
      });
    }

    match self
      .gateway
      .poll_task(&task.task_type, &self.worker_id)
      .await
      .map_err(SyncError::transport("acquire task", task_id))?
    {
      Some(polled) if polled.task_id == task.task_id => {
        debug!(task_type = %task.task_type, "task acquired");
      }
      Some(polled) => {
        debug!(polled = %polled.task_id, "poll returned another task of the same type");
      }
      None => debug!(task_type = %task.task_type, "poll returned nothing, task already held"),
    }

    let run_id = if task.run_id.is_empty() {
      session.run_id().unwrap_or_default()
    } else {
      task.run_id.clone()
    };

    let update = TaskUpdate {
      task_id: task.task_id.clone(),
      run_id: run_id.clone(),
      worker_id: self.worker_id.clone(),
      status,
      output,
    };

    if let Err(error) = self.gateway.update_task(&update).await {
      return Err(self.rejected(task_id, error).await);
    }

    let outcome = session.completions().record(CompletionOutcome {
      task_id: task.task_id.clone(),
      run_id: run_id.clone(),
      reference_name: task.reference_name.clone(),
      status,
      completed_at: Utc::now(),
    });
    session.resolutions().forget_task(&task.task_id);

    info!(
      run_id = %run_id,
      reference_name = %task.reference_name,
      "task completed"
    );
    Ok(outcome)
  }

  /// Map a rejected update. A conflict means another worker finished the
  /// task between our fetch and our submit.
  async fn rejected(&self, task_id: &str, error: GatewayError) -> SyncError {
    if !matches!(error, GatewayError::Status { status: 409, .. }) {
      return SyncError::transport("submit task", task_id)(error);
    }

    let status = match self.gateway.get_task(task_id).await {
      Ok(task) => task.status,
      Err(_) => TaskStatus::Unknown,
    };
    warn!(current = %status, "update rejected, task finished elsewhere");
    SyncError::CompletionConflict {
      task_id: task_id.to_string(),
      status,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::json;
  use waypoint_gateway::{CallCounts, InMemoryGateway, Operation, RunStatus, Task, WorkflowRun};

  fn setup() -> (Arc<InMemoryGateway>, CompletionCoordinator<InMemoryGateway>, Session) {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.insert_run(
      WorkflowRun::new("R1", RunStatus::Running)
        .with_task(Task::new("t1", "UserPreferences", "HUMAN", TaskStatus::Scheduled)),
    );
    let coordinator = CompletionCoordinator::new(gateway.clone(), "streamlit_ui");
    let session = Session::new();
    session.begin_run("R1");
    (gateway, coordinator, session)
  }

  fn output() -> Payload {
    let mut payload = Payload::new();
    payload.insert("durata".to_string(), json!(3));
    payload
  }

  #[tokio::test]
  async fn test_complete_submits_with_worker_and_run() {
    let (gateway, coordinator, session) = setup();

    let outcome = coordinator.complete(&session, "t1", output()).await.unwrap();

    assert_eq!(outcome.run_id, "R1");
    assert_eq!(outcome.reference_name, "UserPreferences");
    assert_eq!(outcome.status, TaskStatus::Completed);

    let updates = gateway.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].worker_id, "streamlit_ui");
    assert_eq!(updates[0].run_id, "R1");
    assert_eq!(updates[0].output["durata"], json!(3));

    let calls = gateway.calls();
    assert_eq!((calls.get_task, calls.poll_task, calls.update_task), (1, 1, 1));
  }

  #[tokio::test]
  async fn test_failed_submission_records_nothing() {
    let (gateway, coordinator, session) = setup();
    gateway.fail_next(Operation::UpdateTask, "engine restarting");

    let err = coordinator.complete(&session, "t1", output()).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(session.completions().is_empty());

    let outcome = coordinator.complete(&session, "t1", output()).await.unwrap();
    assert_eq!(outcome.task_id, "t1");
    assert_eq!(gateway.updates().len(), 1);
  }

  #[tokio::test]
  async fn test_task_finished_elsewhere_is_conflict() {
    let (gateway, coordinator, session) = setup();
    gateway.update_run("R1", |run| run.tasks[0].status = TaskStatus::Completed);

    let err = coordinator.complete(&session, "t1", output()).await.unwrap_err();
    assert!(err.is_warning());
    assert!(matches!(
      err,
      SyncError::CompletionConflict {
        status: TaskStatus::Completed,
        ..
      }
    ));
    assert_eq!(gateway.calls().update_task, 0);
  }

  #[tokio::test]
  async fn test_complete_with_failed_status() {
    let (gateway, coordinator, session) = setup();

    let outcome = coordinator
      .complete_with(&session, "t1", TaskStatus::Failed, Payload::new())
      .await
      .unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(gateway.run("R1").unwrap().tasks[0].status, TaskStatus::Failed);
  }

  #[tokio::test]
  async fn test_non_terminal_status_is_rejected_before_any_call() {
    let (gateway, coordinator, session) = setup();

    let err = coordinator
      .complete_with(&session, "t1", TaskStatus::InProgress, Payload::new())
      .await
      .unwrap_err();

    assert!(matches!(err, SyncError::InvalidCompletionStatus { .. }));
    assert_eq!(gateway.calls(), CallCounts::default());
  }

  #[tokio::test]
  async fn test_completion_clears_resolution() {
    let (_gateway, coordinator, session) = setup();
    session.resolutions().insert("R1", "UserPreferences", "t1");

    coordinator.complete(&session, "t1", output()).await.unwrap();
    assert_eq!(session.resolutions().get("R1", "UserPreferences"), None);
  }

  /// Finishes the task on the engine side just before our update lands.
  struct FinishedElsewhere {
    inner: InMemoryGateway,
  }

  #[async_trait]
  impl WorkflowGateway for FinishedElsewhere {
    async fn start_run(
      &self,
      name: &str,
      version: u32,
      input: Payload,
    ) -> Result<String, GatewayError> {
      self.inner.start_run(name, version, input).await
    }

    async fn get_run(&self, run_id: &str, include_tasks: bool) -> Result<WorkflowRun, GatewayError> {
      self.inner.get_run(run_id, include_tasks).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, GatewayError> {
      self.inner.get_task(task_id).await
    }

    async fn poll_task(
      &self,
      task_type: &str,
      worker_id: &str,
    ) -> Result<Option<Task>, GatewayError> {
      self.inner.poll_task(task_type, worker_id).await
    }

    async fn update_task(&self, update: &TaskUpdate) -> Result<(), GatewayError> {
      self.inner.update_run(&update.run_id, |run| {
        for task in run.tasks.iter_mut().filter(|t| t.task_id == update.task_id) {
          task.status = TaskStatus::Completed;
        }
      });
      self.inner.update_task(update).await
    }

    async fn terminate_run(&self, run_id: &str, reason: &str) -> Result<(), GatewayError> {
      self.inner.terminate_run(run_id, reason).await
    }
  }

  #[tokio::test]
  async fn test_update_rejected_with_conflict_records_nothing() {
    let inner = InMemoryGateway::new();
    inner.insert_run(
      WorkflowRun::new("R1", RunStatus::Running)
        .with_task(Task::new("t1", "UserPreferences", "HUMAN", TaskStatus::Scheduled)),
    );
    let gateway = Arc::new(FinishedElsewhere { inner });
    let coordinator = CompletionCoordinator::new(gateway.clone(), "streamlit_ui");
    let session = Session::new();
    session.begin_run("R1");
    session.resolutions().insert("R1", "UserPreferences", "t1");

    let err = coordinator.complete(&session, "t1", output()).await.unwrap_err();

    assert!(err.is_warning());
    assert!(matches!(
      err,
      SyncError::CompletionConflict {
        status: TaskStatus::Completed,
        ..
      }
    ));
    assert!(session.completions().is_empty());
    assert_eq!(session.resolutions().get("R1", "UserPreferences").as_deref(), Some("t1"));
    assert!(gateway.inner.updates().is_empty());

    let calls = gateway.inner.calls();
    assert_eq!((calls.get_task, calls.update_task), (2, 1));
  }
}
