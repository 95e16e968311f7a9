//! Job summary email to the commit author.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use portlane_config::{EmailSettings, SmtpSecurity, TemplateContext};
use portlane_core::notify::Notifier;
use portlane_core::{Build, Job};
use tracing::{debug, info, warn};

use crate::error::NotifyError;

const DEFAULT_SMTP_PORT: u16 = 25;

const SUBJECT_TEMPLATE: &str = "[portlane] ${job.port}: ${job.status} (${commit.short_id})";

const DEFAULT_BODY_TEMPLATE: &str = "\
Job ${job.id} for ${job.port} finished with status ${job.status}.

Commit:   ${commit.short_id} ${commit.summary}
Author:   ${author.name} <${author.email}>
Started:  ${job.started}
Finished: ${job.finished}
Runtime:  ${job.runtime}

Builds:
${job.builds}

Logs: ${job.url}
";

/// Sends one email per job, once every build has finished.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    body_template: String,
}

impl EmailNotifier {
    pub fn new(settings: &EmailSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings.from.parse()?;

        let body_template = match &settings.template {
            Some(path) => {
                std::fs::read_to_string(path).map_err(|source| NotifyError::Template {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => DEFAULT_BODY_TEMPLATE.to_string(),
        };

        Ok(Self {
            transport: build_transport(settings)?,
            from,
            body_template,
        })
    }

    /// Render subject and body for `job`.
    pub fn render(&self, job: &Job) -> (String, String) {
        let context = TemplateContext::from_job(job);
        let subject = context.interpolate(SUBJECT_TEMPLATE).value;
        let body = context.interpolate(&self.body_template);
        for variable in body.unresolved {
            warn!(job_id = %job.id, variable = %variable, "Unresolved variable in email template");
        }
        (subject, body.value)
    }

    /// The email for `job`, or `None` when none should be sent yet.
    pub fn message(&self, job: &Job) -> Result<Option<Message>, NotifyError> {
        if !job.status().is_terminal() {
            return Ok(None);
        }

        let email = job.author_email();
        if email.is_empty() {
            info!(job_id = %job.id, "Commit has no author email, skipping notification");
            return Ok(None);
        }

        let (subject, body) = self.render(job);
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        Ok(Some(message))
    }

    pub async fn send(&self, job: &Job) -> Result<(), NotifyError> {
        let Some(message) = self.message(job)? else {
            return Ok(());
        };

        self.transport.send(message).await?;
        debug!(job_id = %job.id, to = %job.author_email(), "Notification email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, job: &Job, _build: &Build) {
        if let Err(e) = self.send(job).await {
            warn!(job_id = %job.id, error = %e, "Email delivery failed");
        }
    }
}

/// Split `host[:port]`.
fn split_relay(relay: &str) -> Result<(&str, u16), NotifyError> {
    match relay.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| NotifyError::Relay(format!("bad port in {}", relay)))?;
            Ok((host, port))
        }
        None => Ok((relay, DEFAULT_SMTP_PORT)),
    }
}

fn build_transport(
    settings: &EmailSettings,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let (host, port) = split_relay(&settings.smtp_host)?;
    if host.is_empty() {
        return Err(NotifyError::Relay("empty host".to_string()));
    }

    let tls = match settings.security {
        SmtpSecurity::None => Tls::None,
        SmtpSecurity::Opportunistic => Tls::Opportunistic(TlsParameters::new(host.to_string())?),
        SmtpSecurity::Starttls => Tls::Required(TlsParameters::new(host.to_string())?),
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        .port(port)
        .tls(tls);

    if let (Some(user), Some(pass)) = (&settings.smtp_user, &settings.smtp_pass) {
        builder = builder
            .credentials(Credentials::new(user.clone(), pass.clone()))
            .authentication(vec![Mechanism::Plain]);
    }

    Ok(builder.build())
}
