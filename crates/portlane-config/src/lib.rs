//! Configuration for the portlane build orchestrator.
//!
//! This crate handles:
//! - KDL service configuration
//! - Construction of the immutable queue registry
//! - Variable interpolation over the job context

pub mod error;
pub mod settings;
pub mod template;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    EmailSettings, NotificationSettings, QueueSettings, RunnerKind, ServerSettings, Settings,
    SmtpSecurity, StatusApiSettings, WebhookSettings,
};
pub use template::{Rendered, TemplateContext, format_duration};
