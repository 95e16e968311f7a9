//! Build scheduling for portlane.
//!
//! Turns push events into jobs, admits their builds onto bounded per-queue
//! dispatch channels, and runs one worker per queue that executes builds,
//! reports status and persists job snapshots.

pub mod dispatch;
pub mod pool;
pub mod store;
pub mod worker;

pub use dispatch::{Dispatcher, JobAdmission, SharedJob, SubmitReport};
pub use pool::WorkerPool;
pub use store::JobStore;
pub use worker::Worker;
