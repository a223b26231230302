//! The sync client facade.

use std::sync::Arc;

use tracing::{info, instrument};
use waypoint_gateway::{Payload, Task, TaskStatus, WorkflowGateway};
use waypoint_session::{CompletionOutcome, Session};

use crate::config::SyncConfig;
use crate::coordinator::CompletionCoordinator;
use crate::detector::{Classification, StuckDetector};
use crate::error::SyncError;
use crate::locator::TaskLocator;
use crate::report::{DebugSnapshot, RunSummary};
use crate::waiter::{WaitOptions, Waiter};

/// Keeps an interactive front end in step with remote workflow runs.
///
/// One client is shared by all sessions; per-session state lives in the
/// [`Session`] passed to each call.
pub struct SyncClient<G> {
  gateway: Arc<G>,
  config: SyncConfig,
  locator: TaskLocator<G>,
  coordinator: CompletionCoordinator<G>,
  detector: StuckDetector,
  waiter: Waiter<G>,
}

impl<G: WorkflowGateway> SyncClient<G> {
  pub fn new(gateway: Arc<G>, config: SyncConfig) -> Self {
    let detector = StuckDetector::new(config.detector.clone());
    Self {
      locator: TaskLocator::new(gateway.clone()),
      coordinator: CompletionCoordinator::new(gateway.clone(), config.worker_id.clone()),
      waiter: Waiter::new(
        gateway.clone(),
        detector.clone(),
        config.ready_signal,
        config.stuck_after,
      ),
      detector,
      gateway,
      config,
    }
  }

  pub fn gateway(&self) -> &Arc<G> {
    &self.gateway
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  /// Wait options built from the configured interval and bounds.
  pub fn wait_options(&self) -> WaitOptions {
    let mut options = WaitOptions::new(self.config.poll_interval());
    options.timeout = self.config.wait_timeout();
    options.max_polls = self.config.max_polls;
    options
  }

  /// Start a run of the configured workflow and attach `session` to it.
  #[instrument(
    skip(self, session, input),
    fields(
      session_id = %session.id(),
      workflow = %self.config.workflow_name,
      version = self.config.workflow_version
    )
  )]
  pub async fn start_run(&self, session: &Session, input: Payload) -> Result<String, SyncError> {
    let run_id = self
      .gateway
      .start_run(&self.config.workflow_name, self.config.workflow_version, input)
      .await
      .map_err(SyncError::transport("start run", &self.config.workflow_name))?;

    session.begin_run(&run_id);
    info!(run_id = %run_id, "run started");
    Ok(run_id)
  }

  /// The run `session` is attached to.
  pub fn active_run(&self, session: &Session) -> Result<String, SyncError> {
    session.run_id().ok_or_else(|| SyncError::NoActiveRun {
      session_id: session.id().to_string(),
    })
  }

  pub async fn locate(&self, run_id: &str, reference_name: &str) -> Result<Option<Task>, SyncError> {
    self.locator.locate(run_id, reference_name).await
  }

  /// Resolve `reference_name` within the session's run, using the session's
  /// cached resolution when present.
  pub async fn resolve(
    &self,
    session: &Session,
    reference_name: &str,
  ) -> Result<Option<String>, SyncError> {
    let run_id = self.active_run(session)?;
    self.locator.resolve(session, &run_id, reference_name).await
  }

  /// Like [`resolve`](Self::resolve), but waits for the task to appear.
  pub async fn resolve_with_wait(
    &self,
    session: &Session,
    reference_name: &str,
    options: &WaitOptions,
  ) -> Result<String, SyncError> {
    let run_id = self.active_run(session)?;
    if let Some(task_id) = session.resolutions().get(&run_id, reference_name) {
      return Ok(task_id);
    }

    let task = self
      .waiter
      .wait_for_task(&run_id, reference_name, options)
      .await?;
    session
      .resolutions()
      .insert(&run_id, reference_name, &task.task_id);
    Ok(task.task_id)
  }

  pub async fn complete(
    &self,
    session: &Session,
    task_id: &str,
    output: Payload,
  ) -> Result<CompletionOutcome, SyncError> {
    self.coordinator.complete(session, task_id, output).await
  }

  pub async fn complete_with(
    &self,
    session: &Session,
    task_id: &str,
    status: TaskStatus,
    output: Payload,
  ) -> Result<CompletionOutcome, SyncError> {
    self
      .coordinator
      .complete_with(session, task_id, status, output)
      .await
  }

  pub async fn wait_for_task(
    &self,
    run_id: &str,
    reference_name: &str,
    options: &WaitOptions,
  ) -> Result<Task, SyncError> {
    self.waiter.wait_for_task(run_id, reference_name, options).await
  }

  pub async fn wait_for_task_input(
    &self,
    run_id: &str,
    reference_name: &str,
    keys: &[&str],
    options: &WaitOptions,
  ) -> Result<Task, SyncError> {
    self
      .waiter
      .wait_for_task_input(run_id, reference_name, keys, options)
      .await
  }

  pub async fn wait_for_output_key(
    &self,
    run_id: &str,
    key: &str,
    options: &WaitOptions,
  ) -> Result<serde_json::Value, SyncError> {
    self.waiter.wait_for_output_key(run_id, key, options).await
  }

  /// Output `key` of the session's run, served from the session cache once
  /// it has been seen.
  pub async fn output(
    &self,
    session: &Session,
    key: &str,
    options: &WaitOptions,
  ) -> Result<serde_json::Value, SyncError> {
    let cache_key = format!("output:{}", key);
    if let Some(value) = session.cache().get(&cache_key) {
      return Ok(value);
    }

    let run_id = self.active_run(session)?;
    let value = self.waiter.wait_for_output_key(&run_id, key, options).await?;
    session.cache().set(cache_key, value.clone());
    Ok(value)
  }

  /// Fetch a run and classify its health.
  #[instrument(skip(self))]
  pub async fn classify(&self, run_id: &str) -> Result<Classification, SyncError> {
    let run = self
      .gateway
      .get_run(run_id, true)
      .await
      .map_err(SyncError::transport("classify run", run_id))?;
    Ok(self.detector.classify_run(&run))
  }

  pub async fn run_summary(&self, run_id: &str) -> Result<RunSummary, SyncError> {
    let run = self
      .gateway
      .get_run(run_id, true)
      .await
      .map_err(SyncError::transport("fetch run", run_id))?;
    Ok(RunSummary::from(&run))
  }

  pub async fn debug_snapshot(&self, run_id: &str) -> Result<DebugSnapshot, SyncError> {
    let run = self
      .gateway
      .get_run(run_id, true)
      .await
      .map_err(SyncError::transport("fetch run", run_id))?;
    let classification = self.detector.classify_run(&run);
    let intake = self.detector.config().intake_reference.as_deref();
    Ok(DebugSnapshot::new(&run, classification, intake))
  }

  #[instrument(skip(self))]
  pub async fn terminate_run(&self, run_id: &str, reason: &str) -> Result<(), SyncError> {
    self
      .gateway
      .terminate_run(run_id, reason)
      .await
      .map_err(SyncError::transport("terminate run", run_id))?;
    info!("run terminated");
    Ok(())
  }
}
