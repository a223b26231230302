//! Waypoint Gateway
//!
//! This crate provides the boundary to the remote workflow engine. The engine
//! owns every run and task; this client only observes and submits results.
//!
//! The [`WorkflowGateway`] trait defines operations for:
//! - Starting a run of a workflow definition
//! - Fetching a run with its task list
//! - Fetching, acquiring (poll) and updating tasks
//! - Terminating a run
//!
//! Two implementations are provided:
//! - [`ConductorGateway`] talks to a Conductor-compatible server over HTTP
//! - [`InMemoryGateway`] keeps runs in memory for tests and offline use

mod conductor;
mod error;
mod gateway;
mod memory;
mod types;

pub use conductor::{ConductorGateway, Credentials, GatewayConfig};
pub use error::GatewayError;
pub use gateway::WorkflowGateway;
pub use memory::{CallCounts, InMemoryGateway, Operation};
pub use types::{Payload, RunStatus, Task, TaskStatus, TaskUpdate, WorkflowRun};
