//! Wait progress events and observers.
//!
//! Events are emitted while a waiter polls so callers can drive spinners,
//! progress bars or logs without the waiter knowing about any UI.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::detector::StuckReason;
use crate::waiter::WaitTarget;

/// Events emitted during a wait.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WaitEvent {
  /// A wait has started.
  Started { run_id: String, target: WaitTarget },

  /// A poll found the condition not yet satisfied.
  Pending {
    run_id: String,
    target: WaitTarget,
    poll: u32,
    elapsed: Duration,
  },

  /// A poll classified the run as stuck. The wait gives up once this has
  /// happened on enough consecutive polls.
  StuckSuspected {
    run_id: String,
    target: WaitTarget,
    reason: StuckReason,
    consecutive: u32,
  },

  /// The condition holds.
  Ready {
    run_id: String,
    target: WaitTarget,
    poll: u32,
  },

  /// The wait ended without the condition holding.
  Abandoned {
    run_id: String,
    target: WaitTarget,
    error: String,
  },
}

/// Trait for receiving wait events.
///
/// The waiter calls `notify` for each event. Implementations must not block.
pub trait WaitObserver: Send + Sync {
  fn notify(&self, event: WaitEvent);
}

impl<F> WaitObserver for F
where
  F: Fn(WaitEvent) + Send + Sync,
{
  fn notify(&self, event: WaitEvent) {
    self(event)
  }
}

/// An observer that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl WaitObserver for NoopObserver {
  fn notify(&self, _event: WaitEvent) {}
}

/// An observer that forwards events to an unbounded channel.
///
/// Volume is one event per poll, so the channel stays small even when the
/// consumer lags.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
  sender: mpsc::UnboundedSender<WaitEvent>,
}

impl ChannelObserver {
  pub fn new(sender: mpsc::UnboundedSender<WaitEvent>) -> Self {
    Self { sender }
  }
}

impl WaitObserver for ChannelObserver {
  fn notify(&self, event: WaitEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
