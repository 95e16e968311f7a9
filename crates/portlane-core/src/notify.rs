//! Notification of build status transitions.

use async_trait::async_trait;

use crate::job::{Build, Job};

/// Receives every status transition of every build.
///
/// Implementations deal with their own failures; notification never
/// interrupts the build lifecycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job: &Job, build: &Build);
}

/// Notifier that drops every notification.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _job: &Job, _build: &Build) {}
}
