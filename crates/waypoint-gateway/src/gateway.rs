use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{Payload, Task, TaskUpdate, WorkflowRun};

/// Operations the remote workflow engine exposes to this client.
///
/// None of these calls are idempotent on the engine side. Callers that need
/// at-most-once semantics must enforce them themselves.
#[async_trait]
pub trait WorkflowGateway: Send + Sync {
  /// Start a run of the named definition and return its id.
  async fn start_run(&self, name: &str, version: u32, input: Payload)
  -> Result<String, GatewayError>;

  /// Fetch a run, optionally with its full task list.
  async fn get_run(&self, run_id: &str, include_tasks: bool) -> Result<WorkflowRun, GatewayError>;

  /// Fetch a single task by id.
  async fn get_task(&self, task_id: &str) -> Result<Task, GatewayError>;

  /// Acquire the next task of `task_type` for `worker_id`, if any is queued.
  async fn poll_task(&self, task_type: &str, worker_id: &str)
  -> Result<Option<Task>, GatewayError>;

  /// Submit a result for a task.
  async fn update_task(&self, update: &TaskUpdate) -> Result<(), GatewayError>;

  /// Terminate a run.
  async fn terminate_run(&self, run_id: &str, reason: &str) -> Result<(), GatewayError>;
}
