//! Commit status updates through a GitHub-compatible status API.

use async_trait::async_trait;
use portlane_config::StatusApiSettings;
use portlane_core::notify::Notifier;
use portlane_core::{Build, BuildStatus, Job};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::NotifyError;

/// Body of a status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: String,
    /// Job page, only set once the build has finished.
    pub target_url: String,
    pub context: String,
}

impl StatusPayload {
    pub fn for_build(job: &Job, build: &Build) -> Self {
        let target_url = if build.status.is_terminal() {
            job.base_url.clone()
        } else {
            String::new()
        };

        Self {
            state: state_for(build.status).to_string(),
            target_url,
            context: format!("{} on {}", job.port, build.queue),
        }
    }
}

/// Status vocabulary of the API, which has no notion of a running build.
pub fn state_for(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending | BuildStatus::Building => "pending",
        BuildStatus::Success => "success",
        BuildStatus::Failure => "failure",
    }
}

/// Posts build status transitions to the repository's status endpoint.
pub struct StatusApiClient {
    client: reqwest::Client,
    token: String,
    url_template: Option<String>,
}

impl StatusApiClient {
    pub fn new(settings: &StatusApiSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: settings.token.clone(),
            url_template: settings.url_template.clone(),
        }
    }

    /// Endpoint for the commit of `job`.
    ///
    /// Prefers the `statuses_url` of the push payload and falls back to the
    /// configured template.
    pub fn status_url(&self, job: &Job) -> Option<String> {
        let repository = &job.push_event.repository;
        let sha = job.commit_id();

        if !repository.status_url.is_empty() {
            return Some(repository.status_url.replace("{sha}", sha));
        }

        self.url_template.as_ref().map(|template| {
            template
                .replace("{full_name}", &repository.full_name)
                .replace("{sha}", sha)
        })
    }

    /// Send the status of `build`.
    pub async fn send(&self, job: &Job, build: &Build) -> Result<(), NotifyError> {
        let Some(url) = self.status_url(job) else {
            debug!(job_id = %job.id, "No status URL for job, skipping status update");
            return Ok(());
        };

        let payload = StatusPayload::for_build(job, build);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("token {}", self.token))
            .header("User-Agent", "portlane")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }

        debug!(job_id = %job.id, queue = %build.queue, state = %payload.state, "Status update sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for StatusApiClient {
    async fn notify(&self, job: &Job, build: &Build) {
        if let Err(e) = self.send(job, build).await {
            warn!(job_id = %job.id, queue = %build.queue, error = %e, "Status API update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use portlane_core::{Commit, JobId, PushEvent, RepositoryInfo};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(String, String, StatusPayload)>>>;

    fn job(status_url: &str) -> Job {
        let event = PushEvent {
            repository: RepositoryInfo {
                full_name: "example/ports".to_string(),
                status_url: status_url.to_string(),
                ..Default::default()
            },
            commits: vec![Commit {
                id: "0123456789abcdef".to_string(),
                ..Default::default()
            }],
            secret: None,
        };
        let mut job = Job::new(
            JobId::generate(),
            "net/foo",
            "https://ci.example.org",
            event,
            0,
        );
        job.add_build("amd64");
        job
    }

    fn client(url_template: Option<&str>) -> StatusApiClient {
        StatusApiClient::new(&StatusApiSettings {
            token: "s3cret".to_string(),
            url_template: url_template.map(str::to_string),
        })
    }

    async fn capture(
        State(captured): State<Captured>,
        Path(sha): Path<String>,
        headers: HeaderMap,
        Json(payload): Json<StatusPayload>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        captured.lock().unwrap().push((sha, auth, payload));
        StatusCode::CREATED
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_state_vocabulary() {
        assert_eq!(state_for(BuildStatus::Pending), "pending");
        assert_eq!(state_for(BuildStatus::Building), "pending");
        assert_eq!(state_for(BuildStatus::Success), "success");
        assert_eq!(state_for(BuildStatus::Failure), "failure");
    }

    #[test]
    fn test_payload_target_url_only_when_finished() {
        let mut job = job("");
        job.builds.get_mut("amd64").unwrap().status = BuildStatus::Building;

        let payload = StatusPayload::for_build(&job, &job.builds["amd64"]);
        assert_eq!(payload.state, "pending");
        assert_eq!(payload.target_url, "");
        assert_eq!(payload.context, "net/foo on amd64");

        job.builds.get_mut("amd64").unwrap().status = BuildStatus::Success;
        let payload = StatusPayload::for_build(&job, &job.builds["amd64"]);
        assert_eq!(payload.state, "success");
        assert_eq!(payload.target_url, job.base_url);
    }

    #[test]
    fn test_status_url_from_payload() {
        let job = job("https://git.example.org/api/v1/repos/example/ports/statuses/{sha}");
        assert_eq!(
            client(Some("https://other/{full_name}/{sha}"))
                .status_url(&job)
                .unwrap(),
            "https://git.example.org/api/v1/repos/example/ports/statuses/0123456789abcdef"
        );
    }

    #[test]
    fn test_status_url_from_template() {
        let job = job("");
        assert_eq!(
            client(Some("https://api.github.com/repos/{full_name}/statuses/{sha}"))
                .status_url(&job)
                .unwrap(),
            "https://api.github.com/repos/example/ports/statuses/0123456789abcdef"
        );
        assert!(client(None).status_url(&job).is_none());
    }

    #[tokio::test]
    async fn test_send_posts_payload() {
        let captured: Captured = Arc::default();
        let router = Router::new()
            .route("/statuses/{sha}", post(capture))
            .with_state(captured.clone());
        let base = serve(router).await;

        let mut job = job(&format!("{}/statuses/{{sha}}", base));
        job.builds.get_mut("amd64").unwrap().status = BuildStatus::Failure;

        client(None)
            .send(&job, &job.builds["amd64"])
            .await
            .unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (sha, auth, payload) = &captured[0];
        assert_eq!(sha, "0123456789abcdef");
        assert_eq!(auth, "token s3cret");
        assert_eq!(payload.state, "failure");
        assert_eq!(payload.context, "net/foo on amd64");
        assert_eq!(payload.target_url, job.base_url);
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let router = Router::new().route(
            "/statuses/{sha}",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad credentials") }),
        );
        let base = serve(router).await;
        let job = job(&format!("{}/statuses/{{sha}}", base));

        let result = client(None).send(&job, &job.builds["amd64"]).await;
        assert!(matches!(
            result,
            Err(NotifyError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_without_url_is_skipped() {
        let job = job("");
        assert!(client(None).send(&job, &job.builds["amd64"]).await.is_ok());
    }
}
