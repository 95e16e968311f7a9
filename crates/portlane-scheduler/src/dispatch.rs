//! Job fan-out and non-blocking admission onto the queues.

use portlane_core::{Job, JobId, PushEvent, QueueRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::store::JobStore;

/// A dispatched job, shared by the workers of every queue building it.
pub type SharedJob = Arc<RwLock<Job>>;

/// Outcome of admitting one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobAdmission {
    pub job_id: JobId,
    pub port: String,
    /// Queues that accepted a build.
    pub admitted: Vec<String>,
    /// Matched queues that were full.
    pub dropped: Vec<String>,
}

impl fmt::Display for JobAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID {}: {} jobs for port {}",
            self.job_id,
            self.admitted.len(),
            self.port
        )
    }
}

/// Outcome of submitting one push event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmitReport {
    pub jobs: Vec<JobAdmission>,
}

impl SubmitReport {
    pub fn admitted(&self) -> usize {
        self.jobs.iter().map(|j| j.admitted.len()).sum()
    }

    pub fn dropped(&self) -> usize {
        self.jobs.iter().map(|j| j.dropped.len()).sum()
    }
}

impl fmt::Display for SubmitReport {
    /// One line per job.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for job in &self.jobs {
            writeln!(f, "{}", job)?;
        }
        Ok(())
    }
}

/// Entry point of the HTTP layer into the scheduler.
///
/// Cloning is cheap; every clone feeds the same queues.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<QueueRegistry>,
    senders: Arc<BTreeMap<String, mpsc::Sender<SharedJob>>>,
    store: JobStore,
    base_url: String,
}

impl Dispatcher {
    /// Create the dispatcher and one bounded receiver per registered queue.
    pub fn channels(
        registry: Arc<QueueRegistry>,
        store: JobStore,
        base_url: impl Into<String>,
    ) -> (Self, BTreeMap<String, mpsc::Receiver<SharedJob>>) {
        let mut senders = BTreeMap::new();
        let mut receivers = BTreeMap::new();

        for queue in registry.queues() {
            let (tx, rx) = mpsc::channel(queue.capacity.max(1));
            senders.insert(queue.name.clone(), tx);
            receivers.insert(queue.name.clone(), rx);
        }

        let dispatcher = Self {
            registry,
            senders: Arc::new(senders),
            store,
            base_url: base_url.into(),
        };
        (dispatcher, receivers)
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Fan a push event out into jobs, one per commit and affected port, and
    /// admit each job's builds onto its matched queues.
    ///
    /// A slot is reserved on every matched queue before the job is built, so a
    /// job only ever contains builds that some worker will pick up. Full
    /// queues are skipped. A job that got no slot at all is reported but
    /// neither stored nor dispatched.
    pub async fn submit(&self, event: PushEvent) -> SubmitReport {
        let mut report = SubmitReport::default();

        for (commit_idx, commit) in event.commits.iter().enumerate() {
            let matched = self.registry.match_commit(commit);
            debug!(
                commit = %commit.short_id(),
                queues = ?matched.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
                "Matched queues"
            );

            for port in commit.affected_ports() {
                let job_id = JobId::generate();

                let mut permits = Vec::new();
                let mut dropped = Vec::new();
                for queue in &matched {
                    let Some(sender) = self.senders.get(&queue.name) else {
                        continue;
                    };
                    match sender.try_reserve() {
                        Ok(permit) => permits.push((queue.name.clone(), permit)),
                        Err(TrySendError::Full(())) => {
                            warn!(job_id = %job_id, queue = %queue.name, "Queue limit reached");
                            dropped.push(queue.name.clone());
                        }
                        Err(TrySendError::Closed(())) => {
                            warn!(job_id = %job_id, queue = %queue.name, "Queue is closed");
                            dropped.push(queue.name.clone());
                        }
                    }
                }

                let admitted: Vec<String> = permits.iter().map(|(q, _)| q.clone()).collect();

                if !permits.is_empty() {
                    let mut job = Job::new(
                        job_id.clone(),
                        port.clone(),
                        &self.base_url,
                        event.clone(),
                        commit_idx,
                    );
                    for queue in &admitted {
                        job.add_build(queue);
                    }
                    self.store.persist(&job).await;

                    let shared: SharedJob = Arc::new(RwLock::new(job));
                    for (queue, permit) in permits {
                        permit.send(Arc::clone(&shared));
                        info!(job_id = %job_id, port = %port, queue = %queue, "Job queued");
                    }
                }

                report.jobs.push(JobAdmission {
                    job_id,
                    port,
                    admitted,
                    dropped,
                });
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlane_core::{BuildStatus, Commit, QueueSpec};
    use regex::Regex;

    fn queue(name: &str, pattern: &str, capacity: usize) -> QueueSpec {
        QueueSpec {
            name: name.to_string(),
            recipe: name.to_string(),
            path_match: Some(Regex::new(pattern).unwrap()),
            environment: BTreeMap::new(),
            workdir: std::env::temp_dir(),
            capacity,
        }
    }

    fn commit(message: &str, modified: &[&str]) -> Commit {
        Commit {
            id: "0123456789abcdef".to_string(),
            message: message.to_string(),
            modified: modified.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn push(commits: Vec<Commit>) -> PushEvent {
        PushEvent {
            commits,
            ..Default::default()
        }
    }

    /// `amd64` builds everything under `net/`, `i386` only builds as a default queue.
    fn scenario_registry() -> Arc<QueueRegistry> {
        Arc::new(QueueRegistry::new(
            vec![queue("amd64", "^net/", 10), queue("i386", "^$", 10)],
            vec!["i386".to_string()],
        ))
    }

    #[tokio::test]
    async fn test_path_match_and_default_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, mut receivers) = Dispatcher::channels(
            scenario_registry(),
            JobStore::new(dir.path()),
            "https://ci.example.org",
        );

        let report = dispatcher
            .submit(push(vec![commit(
                "net/foo: bump version",
                &["net/foo/Makefile"],
            )]))
            .await;

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.admitted(), 2);
        assert_eq!(report.dropped(), 0);
        let admission = &report.jobs[0];
        assert_eq!(admission.port, "net/foo");
        assert_eq!(
            report.to_string(),
            format!("ID {}: 2 jobs for port net/foo\n", admission.job_id)
        );

        let shared = receivers.get_mut("amd64").unwrap().try_recv().unwrap();
        let job = shared.read().await;
        assert_eq!(job.port, "net/foo");
        assert_eq!(job.builds["amd64"].id.as_str(), "001");
        assert_eq!(job.builds["i386"].id.as_str(), "002");
        assert!(job.builds.values().all(|b| b.status == BuildStatus::Pending));
        assert_eq!(
            job.base_url,
            format!("https://ci.example.org/builds/{}/", job.id)
        );
        drop(job);

        let other = receivers.get_mut("i386").unwrap().try_recv().unwrap();
        assert!(Arc::ptr_eq(&shared, &other));

        let stored = dispatcher.store().load(&admission.job_id).await.unwrap();
        assert_eq!(stored.builds.len(), 2);
    }

    #[tokio::test]
    async fn test_ci_no_excludes_default_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, mut receivers) = Dispatcher::channels(
            scenario_registry(),
            JobStore::new(dir.path()),
            "https://ci.example.org",
        );

        let report = dispatcher
            .submit(push(vec![commit(
                "net/foo: bump\nci: no",
                &["www/foo/Makefile"],
            )]))
            .await;

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.admitted(), 0);
        assert!(receivers.get_mut("amd64").unwrap().try_recv().is_err());
        assert!(receivers.get_mut("i386").unwrap().try_recv().is_err());

        // Jobs without builds are never stored.
        assert!(dispatcher.store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_excess() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(QueueRegistry::new(
            vec![queue("amd64", "^net/", 10)],
            Vec::new(),
        ));
        let (dispatcher, mut receivers) =
            Dispatcher::channels(registry, JobStore::new(dir.path()), "http://localhost");

        let commits = (0..12)
            .map(|i| commit("bump", &[&format!("net/p{}/Makefile", i)]))
            .collect();
        let report = dispatcher.submit(push(commits)).await;

        assert_eq!(report.jobs.len(), 12);
        assert_eq!(report.admitted(), 10);
        assert_eq!(report.dropped(), 2);
        assert!(report.jobs[10..].iter().all(|j| j.dropped == ["amd64"]));

        let rx = receivers.get_mut("amd64").unwrap();
        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 10);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(QueueRegistry::new(
            vec![queue("small", "^net/", 1), queue("large", "^net/", 10)],
            Vec::new(),
        ));
        let (dispatcher, _receivers) =
            Dispatcher::channels(registry, JobStore::new(dir.path()), "http://localhost");

        let report = dispatcher
            .submit(push(vec![commit(
                "bump two ports",
                &["net/foo/Makefile", "net/bar/Makefile"],
            )]))
            .await;

        assert_eq!(report.jobs.len(), 2);
        // Ports come out sorted: net/bar first.
        assert_eq!(report.jobs[0].port, "net/bar");
        assert_eq!(report.jobs[0].admitted, ["small", "large"]);
        assert_eq!(report.jobs[1].admitted, ["large"]);
        assert_eq!(report.jobs[1].dropped, ["small"]);

        let job = dispatcher
            .store()
            .load(&report.jobs[1].job_id)
            .await
            .unwrap();
        assert_eq!(job.builds.len(), 1);
        assert_eq!(job.builds["large"].id.as_str(), "001");
    }

    #[tokio::test]
    async fn test_commit_without_ports() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _receivers) = Dispatcher::channels(
            scenario_registry(),
            JobStore::new(dir.path()),
            "http://localhost",
        );

        let report = dispatcher
            .submit(push(vec![commit("docs", &["README.md"])]))
            .await;
        assert!(report.jobs.is_empty());
        assert_eq!(report.to_string(), "");
    }
}
