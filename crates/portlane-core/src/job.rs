//! Jobs, builds and status derivation.

use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::id::{BuildId, JobId};
use crate::push::{Commit, PushEvent};

/// Status of a single build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Admitted, waiting for its worker.
    Pending,
    /// The recipe is running.
    Building,
    Success,
    Failure,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a job, derived from its builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// No build has started yet.
    Pending,
    /// At least one build started and not all have finished.
    Building,
    /// Every build finished, at least one failed.
    Failure,
    /// Every build finished successfully.
    Success,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Building => "building",
            JobStatus::Failure => "failure",
            JobStatus::Success => "success",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queue's execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub queue: String,
    pub status: BuildStatus,
    pub logfile: Option<PathBuf>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Build {
    pub fn new(id: BuildId, queue: impl Into<String>) -> Self {
        Self {
            id,
            queue: queue.into(),
            status: BuildStatus::Pending,
            logfile: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall time of the build, once it has finished.
    pub fn runtime(&self) -> Option<TimeDelta> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// A push-derived unit of work for one port, fanned out into one build per queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub port: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    /// Public page of this job.
    pub base_url: String,
    /// Builds keyed by queue name.
    pub builds: BTreeMap<String, Build>,
    pub push_event: PushEvent,
    pub commit_idx: usize,
}

impl Job {
    /// Create a job without builds. `server_url` is the public root of the
    /// service, without trailing slash.
    pub fn new(
        id: JobId,
        port: impl Into<String>,
        server_url: &str,
        push_event: PushEvent,
        commit_idx: usize,
    ) -> Self {
        let started_at = id.timestamp().unwrap_or_else(Local::now);
        let base_url = format!("{}/builds/{}/", server_url, id);
        Self {
            id,
            port: port.into(),
            started_at,
            finished_at: None,
            base_url,
            builds: BTreeMap::new(),
            push_event,
            commit_idx,
        }
    }

    /// Add a build for `queue`, numbered after the builds already present.
    pub fn add_build(&mut self, queue: &str) -> &Build {
        let id = BuildId::from_sequence(self.builds.len() + 1);
        self.builds
            .entry(queue.to_string())
            .or_insert_with(|| Build::new(id, queue))
    }

    /// The commit that produced this job.
    pub fn commit(&self) -> Option<&Commit> {
        self.push_event.commits.get(self.commit_idx)
    }

    pub fn commit_id(&self) -> &str {
        self.commit().map(|c| c.id.as_str()).unwrap_or_default()
    }

    pub fn short_commit_id(&self) -> &str {
        self.commit().map(|c| c.short_id()).unwrap_or_default()
    }

    pub fn short_commit_message(&self) -> &str {
        self.commit().map(|c| c.summary()).unwrap_or_default()
    }

    pub fn author_email(&self) -> &str {
        self.commit()
            .map(|c| c.author.email.as_str())
            .unwrap_or_default()
    }

    /// Overall status derived from the builds.
    ///
    /// All builds waiting (or no builds at all) is `Pending`; anything still
    /// waiting or running after that is `Building`; once every build is
    /// terminal a single failure makes the job fail.
    pub fn status(&self) -> JobStatus {
        if self
            .builds
            .values()
            .all(|b| b.status == BuildStatus::Pending)
        {
            return JobStatus::Pending;
        }

        if self.builds.values().any(|b| !b.status.is_terminal()) {
            return JobStatus::Building;
        }

        if self
            .builds
            .values()
            .any(|b| b.status == BuildStatus::Failure)
        {
            return JobStatus::Failure;
        }

        JobStatus::Success
    }

    /// Whether every build reached a terminal state.
    pub fn is_finished(&self) -> bool {
        !self.builds.is_empty() && self.builds.values().all(|b| b.status.is_terminal())
    }

    /// Fraction of builds in a terminal state, between 0 and 1.
    pub fn progress(&self) -> f64 {
        if self.builds.is_empty() {
            return 0.0;
        }
        let done = self
            .builds
            .values()
            .filter(|b| b.status.is_terminal())
            .count();
        done as f64 / self.builds.len() as f64
    }

    /// Wall time from job creation to the last finished build.
    pub fn runtime(&self) -> Option<TimeDelta> {
        Some(self.finished_at? - self.started_at)
    }

    /// Whether the job was started on the current local day.
    pub fn is_today(&self) -> bool {
        self.started_at.date_naive() == Local::now().date_naive()
    }
}
