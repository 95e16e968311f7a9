//! Job listing endpoints backed by the stored snapshots.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Local};
use portlane_core::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum When {
    #[default]
    Today,
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub when: When,
}

/// One line of the job listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub port: String,
    pub status: JobStatus,
    pub progress: f64,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub url: String,
    pub commit: String,
    pub message: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            port: job.port.clone(),
            status: job.status(),
            progress: job.progress(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            url: job.base_url.clone(),
            commit: job.short_commit_id().to_string(),
            message: job.short_commit_message().to_string(),
        }
    }
}

/// Stored jobs, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let jobs = state.store.jobs().await?;
    let summaries = jobs
        .iter()
        .filter(|job| query.when == When::All || job.is_today())
        .map(JobSummary::from)
        .collect();
    Ok(Json(summaries))
}

/// Full snapshot of one job.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id: JobId = id.parse()?;
    Ok(Json(state.store.load(&id).await?))
}
