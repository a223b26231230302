//! Task location.

use std::sync::Arc;

use tracing::{debug, instrument};
use waypoint_gateway::{Task, WorkflowGateway, WorkflowRun};
use waypoint_session::Session;

use crate::error::SyncError;

/// Find the first actionable task named `reference_name` in a run snapshot.
///
/// Tasks are scanned in engine order. Earlier completed iterations of a looped
/// step are skipped.
pub fn locate_in<'a>(run: &'a WorkflowRun, reference_name: &str) -> Option<&'a Task> {
  run
    .tasks
    .iter()
    .find(|task| task.reference_name == reference_name && task.is_actionable())
}

/// Maps reference names to actionable task instances.
pub struct TaskLocator<G> {
  gateway: Arc<G>,
}

impl<G: WorkflowGateway> TaskLocator<G> {
  pub fn new(gateway: Arc<G>) -> Self {
    Self { gateway }
  }

  /// Look up the current actionable task named `reference_name`.
  ///
  /// `Ok(None)` means the task does not exist yet, or already finished.
  #[instrument(skip(self))]
  pub async fn locate(&self, run_id: &str, reference_name: &str) -> Result<Option<Task>, SyncError> {
    let run = self
      .gateway
      .get_run(run_id, true)
      .await
      .map_err(SyncError::transport(
        "locate task",
        format!("{}/{}", run_id, reference_name),
      ))?;

    let task = locate_in(&run, reference_name).cloned();
    debug!(found = task.is_some(), tasks = run.tasks.len(), "scanned run");
    Ok(task)
  }

  /// Resolve `reference_name` to a task id, reusing the session's cached
  /// resolution when it belongs to the same run.
  #[instrument(skip(self, session), fields(session_id = %session.id()))]
  pub async fn resolve(
    &self,
    session: &Session,
    run_id: &str,
    reference_name: &str,
  ) -> Result<Option<String>, SyncError> {
    if let Some(task_id) = session.resolutions().get(run_id, reference_name) {
      debug!(task_id = %task_id, "resolution cache hit");
      return Ok(Some(task_id));
    }

    let Some(task) = self.locate(run_id, reference_name).await? else {
      return Ok(None);
    };
    session
      .resolutions()
      .insert(run_id, reference_name, &task.task_id);
    Ok(Some(task.task_id))
  }
}
