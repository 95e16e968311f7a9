//! HTTP routes.

pub mod health;
pub mod jobs;
pub mod webhooks;

use crate::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;

/// Build the main router.
///
/// `GET /` lists jobs while any other method on `/` is a webhook delivery.
pub fn router(state: AppState) -> Router {
    let logs = ServeDir::new(state.store.logdir());

    Router::new()
        .route("/", get(jobs::list).post(webhooks::receive))
        .route("/jobs/{id}", get(jobs::show))
        .nest_service("/builds", logs)
        .merge(health::router())
        .layer(CompressionLayer::new())
        .with_state(state)
}
