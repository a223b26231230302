//! Condition waiting.
//!
//! The engine offers no push channel to this client, so waits are polling
//! loops. [`Ticker`] is the pure part (poll, check, sleep, repeat, honoring
//! timeout, poll cap and cancellation); [`Waiter`] plugs run fetches and ready
//! predicates into it. Waits run inside the caller's future, so dropping or
//! cancelling them leaves nothing behind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use waypoint_gateway::{Task, TaskStatus, WorkflowGateway, WorkflowRun};

use crate::config::ReadySignal;
use crate::detector::{RunHealth, StuckDetector};
use crate::error::SyncError;
use crate::events::{NoopObserver, WaitEvent, WaitObserver};
use crate::locator::locate_in;

/// The condition a wait is blocked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitTarget {
  /// An actionable task with this reference name.
  Task { reference_name: String },
  /// An actionable task whose input holds all `keys`.
  TaskInput {
    reference_name: String,
    keys: Vec<String>,
  },
  /// A ready value at `key` in the run output.
  OutputKey { key: String },
}

impl fmt::Display for WaitTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Task { reference_name } => write!(f, "task '{}'", reference_name),
      Self::TaskInput {
        reference_name,
        keys,
      } => write!(f, "task '{}' with input [{}]", reference_name, keys.join(", ")),
      Self::OutputKey { key } => write!(f, "output '{}'", key),
    }
  }
}

/// Bounds and hooks for a single wait.
#[derive(Clone)]
pub struct WaitOptions {
  pub interval: Duration,
  pub timeout: Option<Duration>,
  pub max_polls: Option<u32>,
  pub cancel: CancellationToken,
  pub observer: Arc<dyn WaitObserver>,
}

impl WaitOptions {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      timeout: None,
      max_polls: None,
      cancel: CancellationToken::new(),
      observer: Arc::new(NoopObserver),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_max_polls(mut self, max_polls: u32) -> Self {
    self.max_polls = Some(max_polls);
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_observer(mut self, observer: Arc<dyn WaitObserver>) -> Self {
    self.observer = observer;
    self
  }
}

impl Default for WaitOptions {
  fn default() -> Self {
    Self::new(Duration::from_secs(2))
  }
}

impl fmt::Debug for WaitOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WaitOptions")
      .field("interval", &self.interval)
      .field("timeout", &self.timeout)
      .field("max_polls", &self.max_polls)
      .field("cancelled", &self.cancel.is_cancelled())
      .finish_non_exhaustive()
  }
}

/// Why a [`Ticker`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
  TimedOut,
  Cancelled,
}

/// Paces a polling loop.
///
/// Call [`Ticker::tick`] after every unsuccessful poll. It returns once the
/// next poll is due, or an [`Interrupt`] when the wait must end.
#[derive(Debug)]
pub struct Ticker {
  interval: Duration,
  deadline: Option<Instant>,
  max_polls: Option<u32>,
  cancel: CancellationToken,
  started: Instant,
  polls: u32,
}

impl Ticker {
  pub fn new(options: &WaitOptions) -> Self {
    let started = Instant::now();
    Self {
      interval: options.interval,
      // A deadline past the clock's range means no deadline.
      deadline: options.timeout.and_then(|t| started.checked_add(t)),
      max_polls: options.max_polls,
      cancel: options.cancel.clone(),
      started,
      polls: 0,
    }
  }

  /// Polls completed so far.
  pub fn polls(&self) -> u32 {
    self.polls
  }

  pub fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }

  /// Record one completed poll and sleep until the next is due.
  pub async fn tick(&mut self) -> Result<(), Interrupt> {
    self.polls += 1;

    if self.cancel.is_cancelled() {
      return Err(Interrupt::Cancelled);
    }
    if let Some(max) = self.max_polls
      && self.polls >= max
    {
      return Err(Interrupt::TimedOut);
    }

    let mut delay = self.interval;
    if let Some(deadline) = self.deadline {
      let now = Instant::now();
      if now >= deadline {
        return Err(Interrupt::TimedOut);
      }
      delay = delay.min(deadline - now);
    }

    tokio::select! {
      biased;
      _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
      _ = tokio::time::sleep(delay) => Ok(()),
    }
  }
}

fn has_work_in_flight(run: &WorkflowRun) -> bool {
  run
    .tasks
    .iter()
    .any(|t| matches!(t.status, TaskStatus::InProgress | TaskStatus::Pending))
}

/// Blocks cooperatively until a task or output becomes available.
pub struct Waiter<G> {
  gateway: Arc<G>,
  detector: StuckDetector,
  ready_signal: ReadySignal,
  stuck_after: u32,
}

impl<G: WorkflowGateway> Waiter<G> {
  pub fn new(
    gateway: Arc<G>,
    detector: StuckDetector,
    ready_signal: ReadySignal,
    stuck_after: u32,
  ) -> Self {
    Self {
      gateway,
      detector,
      ready_signal,
      stuck_after,
    }
  }

  /// Wait until an actionable task named `reference_name` exists.
  pub async fn wait_for_task(
    &self,
    run_id: &str,
    reference_name: &str,
    options: &WaitOptions,
  ) -> Result<Task, SyncError> {
    let target = WaitTarget::Task {
      reference_name: reference_name.to_string(),
    };
    self
      .wait_for_matching_task(run_id, reference_name, target, options, |_| true)
      .await
  }

  /// Wait until an actionable task named `reference_name` exists and its
  /// input snapshot holds every key in `keys`.
  pub async fn wait_for_task_input(
    &self,
    run_id: &str,
    reference_name: &str,
    keys: &[&str],
    options: &WaitOptions,
  ) -> Result<Task, SyncError> {
    let target = WaitTarget::TaskInput {
      reference_name: reference_name.to_string(),
      keys: keys.iter().map(|k| k.to_string()).collect(),
    };
    self
      .wait_for_matching_task(run_id, reference_name, target, options, |task| {
        keys.iter().all(|k| task.input_data.contains_key(*k))
      })
      .await
  }

  /// Wait until the run output holds a ready value at `key`.
  ///
  /// Readiness follows the configured [`ReadySignal`].
  #[instrument(skip(self, options), fields(ready_signal = ?self.ready_signal))]
  pub async fn wait_for_output_key(
    &self,
    run_id: &str,
    key: &str,
    options: &WaitOptions,
  ) -> Result<serde_json::Value, SyncError> {
    let target = WaitTarget::OutputKey {
      key: key.to_string(),
    };
    self.started(run_id, &target, options);

    let mut ticker = Ticker::new(options);
    loop {
      let run = self.fetch(run_id, false, &target, options).await?;

      if let Some(value) = run.output.get(key)
        && self.ready_signal.is_ready(value)
      {
        self.ready(run_id, &target, &ticker, options);
        return Ok(value.clone());
      }

      if run.status.is_terminal() {
        return Err(self.abandon(
          options,
          SyncError::RunEnded {
            run_id: run_id.to_string(),
            target,
            status: run.status,
          },
        ));
      }

      self.pending(run_id, &target, &mut ticker, options).await?;
    }
  }

  #[instrument(skip(self, target, options, accept), fields(target = %target))]
  async fn wait_for_matching_task<F>(
    &self,
    run_id: &str,
    reference_name: &str,
    target: WaitTarget,
    options: &WaitOptions,
    accept: F,
  ) -> Result<Task, SyncError>
  where
    F: Fn(&Task) -> bool,
  {
    self.started(run_id, &target, options);

    let mut ticker = Ticker::new(options);
    let mut stuck_streak = 0u32;
    loop {
      let run = self.fetch(run_id, true, &target, options).await?;

      if let Some(task) = locate_in(&run, reference_name)
        && accept(task)
      {
        self.ready(run_id, &target, &ticker, options);
        return Ok(task.clone());
      }

      if run.status.is_terminal() {
        return Err(self.abandon(
          options,
          SyncError::RunEnded {
            run_id: run_id.to_string(),
            target,
            status: run.status,
          },
        ));
      }

      // A task still being worked on means the run may yet move.
      match self.detector.classify_run(&run).health {
        RunHealth::Stuck { reason } if !has_work_in_flight(&run) => {
          stuck_streak += 1;
          warn!(
            run_id = %run_id,
            reason = %reason,
            consecutive = stuck_streak,
            "run looks stuck"
          );
          options.observer.notify(WaitEvent::StuckSuspected {
            run_id: run_id.to_string(),
            target: target.clone(),
            reason: reason.clone(),
            consecutive: stuck_streak,
          });

          if self.stuck_after > 0 && stuck_streak >= self.stuck_after {
            return Err(self.abandon(
              options,
              SyncError::StuckWorkflow {
                run_id: run_id.to_string(),
                target: Some(target),
                reason,
              },
            ));
          }
        }
        _ => stuck_streak = 0,
      }

      self.pending(run_id, &target, &mut ticker, options).await?;
    }
  }

  /// Fetch the run, giving up early if the wait is cancelled mid-request.
  async fn fetch(
    &self,
    run_id: &str,
    include_tasks: bool,
    target: &WaitTarget,
    options: &WaitOptions,
  ) -> Result<WorkflowRun, SyncError> {
    let result = tokio::select! {
      biased;
      _ = options.cancel.cancelled() => {
        return Err(self.abandon(options, SyncError::Cancelled {
          run_id: run_id.to_string(),
          target: target.clone(),
        }));
      }
      result = self.gateway.get_run(run_id, include_tasks) => result,
    };

    result
      .map_err(SyncError::transport("fetch run", run_id))
      .map_err(|e| self.abandon(options, e))
  }

  fn started(&self, run_id: &str, target: &WaitTarget, options: &WaitOptions) {
    info!(run_id = %run_id, target = %target, "waiting");
    options.observer.notify(WaitEvent::Started {
      run_id: run_id.to_string(),
      target: target.clone(),
    });
  }

  fn ready(&self, run_id: &str, target: &WaitTarget, ticker: &Ticker, options: &WaitOptions) {
    let poll = ticker.polls() + 1;
    info!(run_id = %run_id, target = %target, polls = poll, "condition met");
    options.observer.notify(WaitEvent::Ready {
      run_id: run_id.to_string(),
      target: target.clone(),
      poll,
    });
  }

  async fn pending(
    &self,
    run_id: &str,
    target: &WaitTarget,
    ticker: &mut Ticker,
    options: &WaitOptions,
  ) -> Result<(), SyncError> {
    let poll = ticker.polls() + 1;
    debug!(run_id = %run_id, target = %target, poll, "not yet available");
    options.observer.notify(WaitEvent::Pending {
      run_id: run_id.to_string(),
      target: target.clone(),
      poll,
      elapsed: ticker.elapsed(),
    });

    ticker.tick().await.map_err(|interrupt| {
      let error = match interrupt {
        Interrupt::TimedOut => SyncError::Timeout {
          run_id: run_id.to_string(),
          target: target.clone(),
          polls: ticker.polls(),
          elapsed: ticker.elapsed(),
        },
        Interrupt::Cancelled => SyncError::Cancelled {
          run_id: run_id.to_string(),
          target: target.clone(),
        },
      };
      self.abandon(options, error)
    })
  }

  fn abandon(&self, options: &WaitOptions, error: SyncError) -> SyncError {
    let (run_id, target) = match &error {
      SyncError::RunEnded { run_id, target, .. }
      | SyncError::Timeout { run_id, target, .. }
      | SyncError::Cancelled { run_id, target } => (run_id.clone(), Some(target.clone())),
      SyncError::StuckWorkflow { run_id, target, .. } => (run_id.clone(), target.clone()),
      SyncError::Transport { target, .. } => (target.clone(), None),
      _ => return error,
    };

    warn!(run_id = %run_id, error = %error, "wait abandoned");
    if let Some(target) = target {
      options.observer.notify(WaitEvent::Abandoned {
        run_id,
        target,
        error: error.to_string(),
      });
    }
    error
  }
}
