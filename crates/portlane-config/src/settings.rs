//! Service configuration parsing.
//!
//! The configuration is a KDL document:
//!
//! ```kdl
//! workdir "/var/db/portlane/work"
//! logdir "/var/db/portlane/builds"
//! recipes "/usr/local/etc/portlane/recipes"
//! runner "make"
//!
//! server {
//!     listen "0.0.0.0:8080"
//!     base-url "https://ci.example.org/"
//! }
//!
//! webhook {
//!     secret "s3cr3t"
//! }
//!
//! notification {
//!     status-api {
//!         token "ghp_xxx"
//!     }
//!     email {
//!         smtp-host "mail.example.org:25"
//!         from "ci@example.org"
//!     }
//! }
//!
//! queue "amd64" {
//!     recipe "poudriere"
//!     path-match "^net/"
//!     environment {
//!         JAIL "141amd64"
//!     }
//! }
//!
//! default-queues "amd64"
//! ```

use kdl::{KdlDocument, KdlNode};
use portlane_core::{DEFAULT_QUEUE_CAPACITY, QueueRegistry, QueueSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::{ConfigError, ConfigResult};

/// Environment templates every queue gets unless it overrides them.
pub const DEFAULT_ENVIRONMENT: &[(&str, &str)] = &[
    ("JOB_ID", "${job.id}"),
    ("JOB_PORT", "${job.port}"),
    ("COMMIT_ID", "${commit.id}"),
    ("REPO_URL", "${repo.url}"),
    ("AUTHOR", "${author.username}"),
    ("AUTHOR_EMAIL", "${author.email}"),
];

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Service-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the per-queue working directories.
    pub workdir: PathBuf,
    /// Where job snapshots and build logs are written.
    pub logdir: PathBuf,
    /// Directory holding the recipe files. Defaults to `workdir`.
    pub recipes: PathBuf,
    pub runner: RunnerKind,
    pub server: ServerSettings,
    pub webhook: WebhookSettings,
    pub notification: NotificationSettings,
    pub queues: Vec<QueueSettings>,
    pub default_queues: Vec<String>,
}

/// Which recipe runner executes builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// `make -f <recipes>/<recipe>.mk all`
    Make,
    /// `sh <recipes>/<recipe>.sh`
    Script,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    /// Public URL of the service, without trailing slash.
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub status_api: Option<StatusApiSettings>,
    pub email: Option<EmailSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusApiSettings {
    pub token: String,
    /// Used when the push payload carries no status URL. Supports `{full_name}`
    /// and `{sha}` placeholders.
    pub url_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    /// SMTP relay as `host:port`.
    pub smtp_host: String,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub from: String,
    /// Optional body template file.
    pub template: Option<PathBuf>,
    pub security: SmtpSecurity,
}

/// Transport security towards the SMTP relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection.
    None,
    /// STARTTLS when the relay offers it.
    Opportunistic,
    /// STARTTLS required.
    Starttls,
}

/// A queue as written in the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub recipe: String,
    pub path_match: Option<String>,
    pub capacity: usize,
    pub environment: BTreeMap<String, String>,
}

impl Settings {
    /// Read and parse a configuration file. Relative directories are resolved
    /// against the current directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut settings = Self::parse(&text)?;
        settings.workdir = std::path::absolute(&settings.workdir)?;
        settings.logdir = std::path::absolute(&settings.logdir)?;
        settings.recipes = std::path::absolute(&settings.recipes)?;
        Ok(settings)
    }

    /// Parse configuration from KDL text.
    pub fn parse(kdl: &str) -> ConfigResult<Self> {
        let doc: KdlDocument = kdl.parse()?;

        let mut workdir = None;
        let mut logdir = None;
        let mut recipes = None;
        let mut runner = RunnerKind::Make;
        let mut server = None;
        let mut webhook = WebhookSettings::default();
        let mut notification = NotificationSettings::default();
        let mut queues: Vec<QueueSettings> = Vec::new();
        let mut default_queues = Vec::new();

        for node in doc.nodes() {
            match node.name().value() {
                "workdir" => workdir = get_first_string_arg(node).map(PathBuf::from),
                "logdir" => logdir = get_first_string_arg(node).map(PathBuf::from),
                "recipes" => recipes = get_first_string_arg(node).map(PathBuf::from),
                "runner" => runner = parse_runner(node)?,
                "server" => server = Some(parse_server(node)?),
                "webhook" => {
                    webhook.secret = child_string(node, "secret").filter(|s| !s.is_empty());
                }
                "notification" => notification = parse_notification(node)?,
                "queue" => {
                    let queue = parse_queue(node)?;
                    if queues.iter().any(|q| q.name == queue.name) {
                        return Err(ConfigError::Duplicate(format!("queue '{}'", queue.name)));
                    }
                    queues.push(queue);
                }
                "default-queues" | "default_queues" => {
                    default_queues.extend(get_all_string_args(node));
                }
                other => warn!(node = %other, "Ignoring unknown configuration node"),
            }
        }

        let workdir = workdir.ok_or_else(|| ConfigError::MissingField("workdir".to_string()))?;
        let logdir = logdir.ok_or_else(|| ConfigError::MissingField("logdir".to_string()))?;
        let recipes = recipes.unwrap_or_else(|| workdir.clone());
        let server = match server {
            Some(server) => server,
            None => ServerSettings {
                listen: parse_listen(DEFAULT_LISTEN)?,
                base_url: String::new(),
            },
        };

        for name in &default_queues {
            if !queues.iter().any(|q| &q.name == name) {
                return Err(ConfigError::InvalidReference(format!(
                    "default queue '{}' is not defined",
                    name
                )));
            }
        }

        Ok(Settings {
            workdir,
            logdir,
            recipes,
            runner,
            server,
            webhook,
            notification,
            queues,
            default_queues,
        })
    }

    /// Build the immutable queue registry.
    ///
    /// Compiles the path patterns, fills in the default environment templates
    /// and assigns each queue its working directory below `workdir`.
    pub fn registry(&self) -> ConfigResult<QueueRegistry> {
        let mut specs = Vec::with_capacity(self.queues.len());

        for queue in &self.queues {
            let path_match = match queue.path_match.as_deref() {
                None | Some("") => None,
                Some(pattern) => {
                    Some(
                        Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                            queue: queue.name.clone(),
                            source,
                        })?,
                    )
                }
            };

            let mut environment = queue.environment.clone();
            for (key, template) in DEFAULT_ENVIRONMENT {
                environment
                    .entry(key.to_string())
                    .or_insert_with(|| template.to_string());
            }

            specs.push(QueueSpec {
                name: queue.name.clone(),
                recipe: queue.recipe.clone(),
                path_match,
                environment,
                workdir: self.workdir.join(queue_dir_name(&queue.name)),
                capacity: queue.capacity,
            });
        }

        Ok(QueueRegistry::new(specs, self.default_queues.clone()))
    }
}

/// Directory name of a queue: its name with every non-alphanumeric character removed.
pub fn queue_dir_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn parse_runner(node: &KdlNode) -> ConfigResult<RunnerKind> {
    match get_first_string_arg(node).as_deref() {
        Some("make") => Ok(RunnerKind::Make),
        Some("script") => Ok(RunnerKind::Script),
        other => Err(ConfigError::InvalidValue {
            field: "runner".to_string(),
            message: format!("unknown runner: {}", other.unwrap_or_default()),
        }),
    }
}

fn parse_listen(value: &str) -> ConfigResult<SocketAddr> {
    value.parse().map_err(|e| ConfigError::InvalidValue {
        field: "server listen".to_string(),
        message: format!("{}: {}", value, e),
    })
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerSettings> {
    let listen = child_string(node, "listen").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let base_url = child_string(node, "base-url")
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();

    Ok(ServerSettings {
        listen: parse_listen(&listen)?,
        base_url,
    })
}

fn parse_notification(node: &KdlNode) -> ConfigResult<NotificationSettings> {
    let mut settings = NotificationSettings::default();

    let Some(children) = node.children() else {
        return Ok(settings);
    };

    for child in children.nodes() {
        match child.name().value() {
            "status-api" => {
                if let Some(token) = child_string(child, "token").filter(|t| !t.is_empty()) {
                    settings.status_api = Some(StatusApiSettings {
                        token,
                        url_template: child_string(child, "url-template"),
                    });
                }
            }
            "email" => {
                let Some(smtp_host) = child_string(child, "smtp-host").filter(|h| !h.is_empty())
                else {
                    continue;
                };
                let from = child_string(child, "from")
                    .ok_or_else(|| ConfigError::MissingField("email from".to_string()))?;
                let security = match child_string(child, "security").as_deref() {
                    None | Some("opportunistic") => SmtpSecurity::Opportunistic,
                    Some("starttls") => SmtpSecurity::Starttls,
                    Some("none") => SmtpSecurity::None,
                    Some(other) => {
                        return Err(ConfigError::InvalidValue {
                            field: "email security".to_string(),
                            message: format!("unknown mode: {}", other),
                        });
                    }
                };

                settings.email = Some(EmailSettings {
                    smtp_host,
                    smtp_user: child_string(child, "smtp-user").filter(|s| !s.is_empty()),
                    smtp_pass: child_string(child, "smtp-pass").filter(|s| !s.is_empty()),
                    from,
                    template: child_string(child, "template").map(PathBuf::from),
                    security,
                });
            }
            _ => {}
        }
    }

    Ok(settings)
}

fn parse_queue(node: &KdlNode) -> ConfigResult<QueueSettings> {
    let name = get_first_string_arg(node)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConfigError::MissingField("queue name".to_string()))?;

    let recipe = child_string(node, "recipe")
        .ok_or_else(|| ConfigError::MissingField(format!("recipe for queue '{}'", name)))?;

    let capacity = match node
        .children()
        .and_then(|c| c.nodes().iter().find(|n| n.name().value() == "capacity"))
    {
        Some(child) => {
            let value = get_first_integer_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("capacity of queue '{}'", name),
                message: "expected an integer".to_string(),
            })?;
            usize::try_from(value)
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: format!("capacity of queue '{}'", name),
                    message: format!("must be positive, got {}", value),
                })?
        }
        None => DEFAULT_QUEUE_CAPACITY,
    };

    let mut environment = BTreeMap::new();
    if let Some(env) = node
        .children()
        .and_then(|c| c.nodes().iter().find(|n| n.name().value() == "environment"))
        .and_then(|n| n.children())
    {
        for var in env.nodes() {
            let key = var.name().value().to_string();
            let value = get_first_string_arg(var).unwrap_or_default();
            environment.insert(key, value);
        }
    }

    Ok(QueueSettings {
        name,
        recipe,
        path_match: child_string(node, "path-match"),
        capacity,
        environment,
    })
}

// Helper functions for extracting values from KDL nodes

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == name)
        .and_then(get_first_string_arg)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}
