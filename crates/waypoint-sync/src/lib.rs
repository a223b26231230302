//! Waypoint Sync
//!
//! Keeps an interactive front end in step with runs on a remote workflow
//! engine. The engine decides what happens next; this crate answers "is the
//! step I need ready yet", submits human input for it, and says when a run
//! has stopped making progress.
//!
//! Components:
//! - [`TaskLocator`]: reference name → current actionable task
//! - [`CompletionCoordinator`]: at-most-once task completion per session
//! - [`Waiter`]: cancellable polling for tasks and output keys
//! - [`StuckDetector`]: heuristic run health classification
//!
//! [`SyncClient`] wires them together over a
//! [`WorkflowGateway`](waypoint_gateway::WorkflowGateway).

mod client;
mod config;
mod coordinator;
mod detector;
mod error;
mod events;
mod locator;
mod report;
mod waiter;

pub use client::SyncClient;
pub use config::{DetectorConfig, FallbackRule, ReadySignal, SyncConfig};
pub use coordinator::CompletionCoordinator;
pub use detector::{Classification, RunHealth, StuckDetector, StuckReason};
pub use error::{ConfigError, SyncError};
pub use events::{ChannelObserver, NoopObserver, WaitEvent, WaitObserver};
pub use locator::{TaskLocator, locate_in};
pub use report::{DebugSnapshot, RunSummary, TaskSummary};
pub use waiter::{Interrupt, Ticker, WaitOptions, WaitTarget, Waiter};
