//! Build status notifications for portlane.
//!
//! - Commit status updates through a GitHub-compatible status API
//! - A summary email to the commit author once a job has finished

pub mod email;
pub mod error;
pub mod status;

pub use email::EmailNotifier;
pub use error::NotifyError;
pub use status::{StatusApiClient, StatusPayload};

use async_trait::async_trait;
use futures::future::join_all;
use portlane_config::NotificationSettings;
use portlane_core::notify::Notifier;
use portlane_core::{Build, Job};
use std::sync::Arc;
use tracing::info;

/// Fans every notification out to all configured channels.
#[derive(Default, Clone)]
pub struct Notifications {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Notifications {
    /// Build the channels enabled in the configuration.
    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, NotifyError> {
        let mut notifications = Self::default();

        if let Some(status_api) = &settings.status_api {
            info!("Status API notifications enabled");
            notifications = notifications.with(Arc::new(StatusApiClient::new(status_api)));
        }
        if let Some(email) = &settings.email {
            info!(relay = %email.smtp_host, "Email notifications enabled");
            notifications = notifications.with(Arc::new(EmailNotifier::new(email)?));
        }

        Ok(notifications)
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for Notifications {
    async fn notify(&self, job: &Job, build: &Build) {
        join_all(self.notifiers.iter().map(|n| n.notify(job, build))).await;
    }
}
