//! Webhook endpoint for push notifications.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::webhook::{self, WebhookEvent};

/// Authenticate a delivery and fan its commits out into jobs.
///
/// Responds with one `ID <job id>: <n> jobs for port <port>` line per job.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, ApiError> {
    let event = webhook::validate(&headers, &body, state.webhook_secret.as_deref())
        .inspect_err(|e| warn!(error = %e, event = ?webhook::event_type(&headers), "Rejected webhook"))?;

    match event {
        WebhookEvent::Ping => {
            info!("Received ping");
            Ok("pong".to_string())
        }
        WebhookEvent::Push(push) => {
            info!(
                repo = %push.repository.full_name,
                commits = push.commits.len(),
                "Received push"
            );

            let report = state.dispatcher.submit(push).await;
            info!(
                jobs = report.jobs.len(),
                admitted = report.admitted(),
                dropped = report.dropped(),
                "Push dispatched"
            );
            Ok(report.to_string())
        }
    }
}
