//! Stuck-state detection.
//!
//! Classifies a run snapshot as progressing, finished or stuck. The rules are
//! heuristics over the task list and a table of known fallback steps; they
//! are best-effort diagnostics and never an authoritative engine signal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use waypoint_gateway::{RunStatus, TaskStatus, WorkflowRun};

use crate::config::DetectorConfig;

/// Why a run is believed to be stuck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum StuckReason {
  /// A known fallback step ran, so no branch handled the run's data.
  UnhandledBranch {
    reference_name: String,
    message: String,
  },
  /// Only the intake task completed and nothing was scheduled after it.
  NoFollowOnTask { completed_reference: String },
}

impl fmt::Display for StuckReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnhandledBranch {
        reference_name,
        message,
      } => write!(f, "{} (fallback step '{}' ran)", message, reference_name),
      Self::NoFollowOnTask {
        completed_reference,
      } => write!(
        f,
        "no follow-on task scheduled after '{}', check branch routing",
        completed_reference
      ),
    }
  }
}

/// Overall health of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunHealth {
  Progressing,
  Completed,
  /// The engine stopped the run (failed, terminated, timed out).
  Halted { run_status: RunStatus },
  Stuck { reason: StuckReason },
}

impl RunHealth {
  pub fn is_stuck(&self) -> bool {
    matches!(self, Self::Stuck { .. })
  }
}

/// Result of classifying one run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
  pub run_id: String,
  pub run_status: RunStatus,
  pub health: RunHealth,
  pub total_tasks: usize,
  /// Task count per status.
  pub counts: BTreeMap<TaskStatus, usize>,
}

impl Classification {
  pub fn count(&self, status: TaskStatus) -> usize {
    self.counts.get(&status).copied().unwrap_or(0)
  }
}

/// Applies the stuck heuristics described by a [`DetectorConfig`].
#[derive(Debug, Clone, Default)]
pub struct StuckDetector {
  config: DetectorConfig,
}

impl StuckDetector {
  pub fn new(config: DetectorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// Classify a run fetched with its task list.
  pub fn classify_run(&self, run: &WorkflowRun) -> Classification {
    let mut counts = BTreeMap::new();
    for task in &run.tasks {
      *counts.entry(task.status).or_insert(0) += 1;
    }

    let health = self.health(run, &counts);

    Classification {
      run_id: run.run_id.clone(),
      run_status: run.status,
      health,
      total_tasks: run.tasks.len(),
      counts,
    }
  }

  fn health(&self, run: &WorkflowRun, counts: &BTreeMap<TaskStatus, usize>) -> RunHealth {
    match run.status {
      RunStatus::Completed => return RunHealth::Completed,
      status if status.is_terminal() => return RunHealth::Halted { run_status: status },
      _ => {}
    }

    for rule in &self.config.fallbacks {
      if run.tasks.iter().any(|t| t.reference_name == rule.reference_name) {
        return RunHealth::Stuck {
          reason: StuckReason::UnhandledBranch {
            reference_name: rule.reference_name.clone(),
            message: rule.reason.clone(),
          },
        };
      }
    }

    let completed = counts.get(&TaskStatus::Completed).copied().unwrap_or(0);
    let scheduled = counts.get(&TaskStatus::Scheduled).copied().unwrap_or(0);
    if completed == 1 && scheduled == 0 {
      let intake = run
        .tasks
        .iter()
        .find(|t| t.status == TaskStatus::Completed)
        .map(|t| t.reference_name.as_str())
        .unwrap_or_default();

      let matches_intake = match &self.config.intake_reference {
        Some(expected) => expected == intake,
        None => true,
      };
      if matches_intake {
        return RunHealth::Stuck {
          reason: StuckReason::NoFollowOnTask {
            completed_reference: intake.to_string(),
          },
        };
      }
    }

    RunHealth::Progressing
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::FallbackRule;
  use waypoint_gateway::Task;

  fn run_with(tasks: Vec<Task>) -> WorkflowRun {
    tasks
      .into_iter()
      .fold(WorkflowRun::new("r1", RunStatus::Running), WorkflowRun::with_task)
  }

  fn prefs(status: TaskStatus) -> Task {
    Task::new("t1", "UserPreferences", "HUMAN", status)
  }

  #[test]
  fn test_only_intake_completed_is_stuck() {
    let run = run_with(vec![prefs(TaskStatus::Completed)]);
    let classification = StuckDetector::default().classify_run(&run);

    assert_eq!(
      classification.health,
      RunHealth::Stuck {
        reason: StuckReason::NoFollowOnTask {
          completed_reference: "UserPreferences".to_string()
        }
      }
    );
    assert_eq!(classification.count(TaskStatus::Completed), 1);
    assert_eq!(classification.count(TaskStatus::Scheduled), 0);
  }

  #[test]
  fn test_scheduled_follow_on_is_progressing() {
    let run = run_with(vec![
      prefs(TaskStatus::Completed),
      Task::new("t2", "ShowItinerary", "HUMAN", TaskStatus::Scheduled),
    ]);

    let classification = StuckDetector::default().classify_run(&run);
    assert_eq!(classification.health, RunHealth::Progressing);
    assert_eq!(classification.total_tasks, 2);
  }

  #[test]
  fn test_fallback_step_wins_over_other_rules() {
    let run = run_with(vec![
      prefs(TaskStatus::Completed),
      Task::new("t2", "TripDecision", "SWITCH", TaskStatus::Completed),
      Task::new("t3", "LogUnhandledDuration", "INLINE", TaskStatus::Completed),
    ]);

    let reason = match StuckDetector::default().classify_run(&run).health {
      RunHealth::Stuck { reason } => reason,
      other => panic!("expected stuck, got {:?}", other),
    };
    assert_eq!(
      reason,
      StuckReason::UnhandledBranch {
        reference_name: "LogUnhandledDuration".to_string(),
        message: "branch condition unhandled".to_string(),
      }
    );
  }

  #[test]
  fn test_fallback_table_is_configurable() {
    let detector = StuckDetector::new(DetectorConfig {
      fallbacks: vec![FallbackRule::new("LogUnknownBudget", "budget branch unhandled")],
      intake_reference: None,
    });

    let run = run_with(vec![
      prefs(TaskStatus::Completed),
      Task::new("t2", "LogUnhandledDuration", "INLINE", TaskStatus::Completed),
      Task::new("t3", "ShowItinerary", "HUMAN", TaskStatus::Scheduled),
    ]);
    assert_eq!(detector.classify_run(&run).health, RunHealth::Progressing);

    let run = run_with(vec![
      prefs(TaskStatus::Completed),
      Task::new("t2", "LogUnknownBudget", "INLINE", TaskStatus::Completed),
    ]);
    assert!(detector.classify_run(&run).health.is_stuck());
  }

  #[test]
  fn test_intake_reference_restricts_no_follow_on_rule() {
    let detector = StuckDetector::new(DetectorConfig {
      fallbacks: vec![],
      intake_reference: Some("UserPreferences".to_string()),
    });

    let other = run_with(vec![Task::new("t1", "Greeting", "HUMAN", TaskStatus::Completed)]);
    assert_eq!(detector.classify_run(&other).health, RunHealth::Progressing);

    let intake = run_with(vec![prefs(TaskStatus::Completed)]);
    assert!(detector.classify_run(&intake).health.is_stuck());
  }

  #[test]
  fn test_fresh_run_is_progressing() {
    let run = run_with(vec![prefs(TaskStatus::Scheduled)]);
    assert_eq!(
      StuckDetector::default().classify_run(&run).health,
      RunHealth::Progressing
    );
  }

  #[test]
  fn test_terminal_runs_are_not_stuck() {
    let mut run = run_with(vec![prefs(TaskStatus::Completed)]);

    run.status = RunStatus::Completed;
    assert_eq!(StuckDetector::default().classify_run(&run).health, RunHealth::Completed);

    run.status = RunStatus::Terminated;
    assert_eq!(
      StuckDetector::default().classify_run(&run).health,
      RunHealth::Halted {
        run_status: RunStatus::Terminated
      }
    );
  }

  #[test]
  fn test_classification_serializes_machine_readable_reason() {
    let run = run_with(vec![prefs(TaskStatus::Completed)]);
    let value = serde_json::to_value(StuckDetector::default().classify_run(&run)).unwrap();

    assert_eq!(value["health"]["status"], "stuck");
    assert_eq!(value["health"]["reason"]["code"], "no_follow_on_task");
    assert_eq!(value["counts"]["COMPLETED"], 1);
  }
}
