//! Refresh cycles across tracked repositories, on demand or on a schedule.

mod orchestrator;
mod scheduler;

pub use orchestrator::{RefreshOutcome, RefreshRequest, SyncOrchestrator};
pub use scheduler::Scheduler;
