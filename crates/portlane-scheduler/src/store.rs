//! On-disk job snapshots and build logs.
//!
//! Layout under the log directory:
//!
//! ```text
//! <logdir>/<job id>/data.json      pretty-printed Job snapshot
//! <logdir>/<job id>/<build id>.log merged recipe output
//! ```

use portlane_core::{BuildId, Error, Job, JobId, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};

const SNAPSHOT_FILE: &str = "data.json";
const SNAPSHOT_TMP_FILE: &str = "data.json.tmp";

/// Writes and reads job snapshots below the log directory.
#[derive(Debug, Clone)]
pub struct JobStore {
    logdir: PathBuf,
}

impl JobStore {
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            logdir: logdir.into(),
        }
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.logdir.join(id.as_str())
    }

    pub fn snapshot_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(SNAPSHOT_FILE)
    }

    pub fn log_path(&self, id: &JobId, build: &BuildId) -> PathBuf {
        self.job_dir(id).join(format!("{}.log", build))
    }

    /// Create the directory of a job.
    pub async fn ensure_job_dir(&self, id: &JobId) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write the snapshot of `job`, replacing any previous one atomically.
    pub async fn export(&self, job: &Job) -> Result<PathBuf> {
        let dir = self.ensure_job_dir(&job.id).await?;
        let body = serde_json::to_vec_pretty(job)?;

        let tmp = dir.join(SNAPSHOT_TMP_FILE);
        let path = dir.join(SNAPSHOT_FILE);
        fs::write(&tmp, &body).await?;
        fs::rename(&tmp, &path).await?;

        debug!(job_id = %job.id, path = %path.display(), "Exported job snapshot");
        Ok(path)
    }

    /// Like [`export`](Self::export), logging failures instead of returning them.
    pub async fn persist(&self, job: &Job) {
        if let Err(e) = self.export(job).await {
            error!(job_id = %job.id, error = %e, "Failed to write job snapshot");
        }
    }

    /// Read the snapshot of a job.
    pub async fn load(&self, id: &JobId) -> Result<Job> {
        let path = self.snapshot_path(id);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("job {}", id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&body)?)
    }

    /// IDs of every stored job, newest first.
    pub async fn list(&self) -> Result<Vec<JobId>> {
        let mut entries = match fs::read_dir(&self.logdir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(id) = name.parse::<JobId>() else {
                continue;
            };
            if fs::try_exists(self.snapshot_path(&id)).await.unwrap_or(false) {
                ids.push(id);
            }
        }

        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Load every stored job, newest first. Unreadable snapshots are skipped.
    pub async fn jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for id in self.list().await? {
            match self.load(&id).await {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job_id = %id, error = %e, "Skipping unreadable job snapshot"),
            }
        }
        Ok(jobs)
    }

    /// Write the output of a build, returning the log path.
    pub async fn write_log(&self, id: &JobId, build: &BuildId, output: &[u8]) -> Result<PathBuf> {
        self.ensure_job_dir(id).await?;
        let path = self.log_path(id, build);
        fs::write(&path, output).await?;
        Ok(path)
    }
}
