//! HTTP server for portlane.
//!
//! Receives push webhooks, serves the job listing and build logs.

pub mod error;
pub mod routes;
pub mod state;
pub mod webhook;

pub use state::AppState;
