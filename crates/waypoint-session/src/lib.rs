//! Waypoint Session
//!
//! Session-scoped client state. A [`Session`] is an explicit context object
//! handed to every sync operation; nothing here is global or ambient.
//!
//! - [`SessionCache`]: free-form key/value facts (cached outputs, UI state)
//! - [`ResolutionCache`]: reference name → task id, scoped to one run
//! - [`CompletionRecord`]: task id → outcome, for at-most-once completion
//!
//! Nothing is persisted. The remote engine is the only durable store.

mod cache;
mod record;
mod resolution;
mod session;

pub use cache::SessionCache;
pub use record::{CompletionOutcome, CompletionRecord};
pub use resolution::ResolutionCache;
pub use session::Session;
