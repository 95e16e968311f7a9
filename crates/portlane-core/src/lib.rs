//! Core domain types and traits for the portlane build orchestrator.
//!
//! This crate contains:
//! - Job and build identifiers
//! - Push event payload types
//! - Queue definitions and the queue matching policy
//! - Job/build model and status derivation
//! - Recipe runner and notifier traits

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod push;
pub mod queue;

pub use error::{Error, Result};
pub use id::{BuildId, JobId};
pub use job::{Build, BuildStatus, Job, JobStatus};
pub use push::{Commit, CommitAuthor, PushEvent, RepositoryInfo};
pub use queue::{DEFAULT_QUEUE_CAPACITY, MatchDecision, QueueRegistry, QueueSpec};
