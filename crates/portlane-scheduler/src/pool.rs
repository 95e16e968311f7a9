//! Lifecycle of the per-queue workers.

use futures::future::join_all;
use portlane_core::QueueRegistry;
use portlane_core::executor::RecipeRunner;
use portlane_core::notify::Notifier;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::store::JobStore;
use crate::worker::Worker;

/// One running worker per registered queue.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawn a worker for every queue and return the dispatcher feeding them.
    pub fn start(
        registry: Arc<QueueRegistry>,
        runner: Arc<dyn RecipeRunner>,
        notifier: Arc<dyn Notifier>,
        store: JobStore,
        base_url: impl Into<String>,
    ) -> (Self, Dispatcher) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (dispatcher, mut receivers) =
            Dispatcher::channels(Arc::clone(&registry), store.clone(), base_url);

        let mut handles = Vec::new();
        for queue in registry.queues() {
            let Some(jobs) = receivers.remove(&queue.name) else {
                continue;
            };
            let worker = Worker::new(
                queue.clone(),
                jobs,
                Arc::clone(&runner),
                Arc::clone(&notifier),
                store.clone(),
                shutdown_rx.clone(),
            );
            handles.push((queue.name.clone(), tokio::spawn(worker.run())));
        }

        info!(workers = handles.len(), "Worker pool started");
        (Self { shutdown, handles }, dispatcher)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker to stop and wait for running builds to finish.
    pub async fn shutdown(self) {
        info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);

        let (queues, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        for (queue, result) in queues.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(queue = %queue, error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}
