//! Worker that executes the builds of one queue.

use chrono::Local;
use portlane_config::TemplateContext;
use portlane_core::executor::{RecipeRequest, RecipeRunner};
use portlane_core::notify::Notifier;
use portlane_core::{BuildStatus, Job, QueueSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::dispatch::SharedJob;
use crate::store::JobStore;

/// Interval at which an idle worker wakes up.
const IDLE_WAKEUP: Duration = Duration::from_secs(1);

/// Drains the dispatch channel of a single queue, one build at a time.
pub struct Worker {
    queue: QueueSpec,
    jobs: mpsc::Receiver<SharedJob>,
    runner: Arc<dyn RecipeRunner>,
    notifier: Arc<dyn Notifier>,
    store: JobStore,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        queue: QueueSpec,
        jobs: mpsc::Receiver<SharedJob>,
        runner: Arc<dyn RecipeRunner>,
        notifier: Arc<dyn Notifier>,
        store: JobStore,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            jobs,
            runner,
            notifier,
            store,
            shutdown,
        }
    }

    /// Run the worker loop until shutdown is signalled or the channel closes.
    ///
    /// A build that has started always runs to completion; jobs still waiting
    /// in the channel at shutdown are discarded.
    pub async fn run(mut self) {
        info!(queue = %self.queue.name, runner = self.runner.name(), "Starting worker");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
                _ = sleep(IDLE_WAKEUP) => {}
            }
        }

        info!(queue = %self.queue.name, "Worker stopped");
    }

    /// Execute this queue's build of `job`.
    pub async fn process(&self, job: SharedJob) {
        let queue = self.queue.name.as_str();

        let Some(snapshot) = self
            .update(&job, |job| {
                let build = job.builds.get_mut(queue)?;
                build.status = BuildStatus::Building;
                build.started_at = Some(Local::now());
                Some(())
            })
            .await
        else {
            warn!(queue = %queue, "Dispatched job has no build for this queue");
            return;
        };

        let Some(build_id) = snapshot.builds.get(queue).map(|b| b.id.clone()) else {
            return;
        };
        info!(job_id = %snapshot.id, port = %snapshot.port, queue = %queue, build = %build_id, "Build started");
        self.announce(&snapshot).await;

        if let Err(e) = tokio::fs::create_dir_all(&self.queue.workdir).await {
            warn!(queue = %queue, workdir = %self.queue.workdir.display(), error = %e, "Failed to create queue workdir");
        }
        if let Err(e) = self.store.ensure_job_dir(&snapshot.id).await {
            warn!(job_id = %snapshot.id, error = %e, "Failed to create job log directory");
        }

        let context = TemplateContext::from_job(&snapshot);
        let (env, unresolved) = context.interpolate_map(&self.queue.environment);
        for (key, variable) in unresolved {
            warn!(job_id = %snapshot.id, queue = %queue, key = %key, variable = %variable, "Unresolved variable in environment");
        }

        let request = RecipeRequest {
            recipe: self.queue.recipe.clone(),
            workdir: self.queue.workdir.clone(),
            env,
        };

        let (status, output) = match self.runner.run(request).await {
            Ok(result) if result.success() => (BuildStatus::Success, result.output),
            Ok(result) => {
                debug!(job_id = %snapshot.id, queue = %queue, exit_code = ?result.exit_code, "Recipe failed");
                (BuildStatus::Failure, result.output)
            }
            Err(e) => {
                error!(job_id = %snapshot.id, queue = %queue, error = %e, "Recipe could not be run");
                (BuildStatus::Failure, format!("{}\n", e).into_bytes())
            }
        };

        let logfile = match self.store.write_log(&snapshot.id, &build_id, &output).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(job_id = %snapshot.id, build = %build_id, error = %e, "Failed to write build log");
                None
            }
        };

        let Some(snapshot) = self
            .update(&job, |job| {
                let now = Local::now();
                let build = job.builds.get_mut(queue)?;
                build.status = status;
                build.finished_at = Some(now);
                build.logfile = logfile;
                if job.is_finished() {
                    job.finished_at = Some(now);
                }
                Some(())
            })
            .await
        else {
            return;
        };

        info!(
            job_id = %snapshot.id,
            port = %snapshot.port,
            queue = %queue,
            build = %build_id,
            status = %status,
            job_status = %snapshot.status(),
            "Build finished"
        );
        self.announce(&snapshot).await;
    }

    /// Apply `change` to the job and persist the result while still holding
    /// the lock, so snapshots hit the disk in the order they were taken.
    async fn update<F>(&self, job: &SharedJob, change: F) -> Option<Job>
    where
        F: FnOnce(&mut Job) -> Option<()>,
    {
        let mut guard = job.write().await;
        change(&mut *guard)?;
        self.store.persist(&*guard).await;
        Some(guard.clone())
    }

    async fn announce(&self, snapshot: &Job) {
        if let Some(build) = snapshot.builds.get(&self.queue.name) {
            self.notifier.notify(snapshot, build).await;
        }
    }
}
