//! Variable interpolation over the job context.
//!
//! Queue environment templates and notification bodies may reference:
//! - `${job.id}` - Job ID
//! - `${job.port}` - Affected port (`category/name`)
//! - `${job.url}` - Public page of the job
//! - `${job.status}` - Overall job status
//! - `${job.started}` / `${job.finished}` - Start and end time
//! - `${job.runtime}` - Wall time of the job
//! - `${job.builds}` - One line per build: ID, queue, status, runtime
//! - `${commit.id}` / `${commit.short_id}` - Commit SHA
//! - `${commit.message}` / `${commit.summary}` - Full message / first line
//! - `${commit.url}` - Commit page
//! - `${repo.name}` / `${repo.full_name}` - Repository name
//! - `${repo.url}` - Clone URL
//! - `${repo.html_url}` - Repository page
//! - `${author.name}` / `${author.username}` / `${author.email}` - Commit author
//! - `${now}` - Current time
//!
//! Unknown variables resolve to an empty string and are reported back to the
//! caller.

use chrono::{DateTime, Local, TimeDelta};
use portlane_core::Job;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Timestamp format used in rendered text.
const TIME_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S %Z";

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

/// Job fields available for interpolation.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub job: JobContext,
    pub commit: CommitContext,
    pub repo: RepoContext,
    pub author: AuthorContext,
}

#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub id: String,
    pub port: String,
    pub url: String,
    pub status: String,
    pub started: String,
    pub finished: String,
    pub runtime: String,
    pub builds: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    pub id: String,
    pub short_id: String,
    pub message: String,
    pub summary: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthorContext {
    pub name: String,
    pub username: String,
    pub email: String,
}

/// Result of interpolating one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub value: String,
    /// Variables that could not be resolved and were replaced by "".
    pub unresolved: Vec<String>,
}

impl TemplateContext {
    /// Build the context of a job.
    pub fn from_job(job: &Job) -> Self {
        let repository = &job.push_event.repository;
        let commit = job.commit();

        let builds = job
            .builds
            .values()
            .map(|b| {
                let runtime = b.runtime().map(format_duration).unwrap_or_default();
                format!("{} {} {} {}", b.id, b.queue, b.status, runtime)
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            job: JobContext {
                id: job.id.to_string(),
                port: job.port.clone(),
                url: job.base_url.clone(),
                status: job.status().to_string(),
                started: format_time(&job.started_at),
                finished: job.finished_at.as_ref().map(format_time).unwrap_or_default(),
                runtime: job.runtime().map(format_duration).unwrap_or_default(),
                builds,
            },
            commit: CommitContext {
                id: job.commit_id().to_string(),
                short_id: job.short_commit_id().to_string(),
                message: commit.map(|c| c.message.clone()).unwrap_or_default(),
                summary: job.short_commit_message().to_string(),
                url: commit.map(|c| c.url.clone()).unwrap_or_default(),
            },
            repo: RepoContext {
                name: repository.name.clone(),
                full_name: repository.full_name.clone(),
                url: repository.clone_url.clone(),
                html_url: repository.html_url.clone(),
            },
            author: AuthorContext {
                name: commit.map(|c| c.author.name.clone()).unwrap_or_default(),
                username: commit.map(|c| c.author.username.clone()).unwrap_or_default(),
                email: commit.map(|c| c.author.email.clone()).unwrap_or_default(),
            },
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["job", "id"] => Some(self.job.id.clone()),
            ["job", "port"] => Some(self.job.port.clone()),
            ["job", "url"] => Some(self.job.url.clone()),
            ["job", "status"] => Some(self.job.status.clone()),
            ["job", "started"] => Some(self.job.started.clone()),
            ["job", "finished"] => Some(self.job.finished.clone()),
            ["job", "runtime"] => Some(self.job.runtime.clone()),
            ["job", "builds"] => Some(self.job.builds.clone()),

            ["commit", "id"] => Some(self.commit.id.clone()),
            ["commit", "short_id"] => Some(self.commit.short_id.clone()),
            ["commit", "message"] => Some(self.commit.message.clone()),
            ["commit", "summary"] => Some(self.commit.summary.clone()),
            ["commit", "url"] => Some(self.commit.url.clone()),

            ["repo", "name"] => Some(self.repo.name.clone()),
            ["repo", "full_name"] => Some(self.repo.full_name.clone()),
            ["repo", "url"] => Some(self.repo.url.clone()),
            ["repo", "html_url"] => Some(self.repo.html_url.clone()),

            ["author", "name"] => Some(self.author.name.clone()),
            ["author", "username"] => Some(self.author.username.clone()),
            ["author", "email"] => Some(self.author.email.clone()),

            ["now"] => Some(format_time(&Local::now())),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> Rendered {
        let mut unresolved = Vec::new();
        let value = VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name).unwrap_or_else(|| {
                    unresolved.push(var_name.to_string());
                    String::new()
                })
            })
            .to_string();

        Rendered { value, unresolved }
    }

    /// Interpolate every value of a map, collecting unresolved variables per key.
    pub fn interpolate_map(
        &self,
        map: &BTreeMap<String, String>,
    ) -> (BTreeMap<String, String>, Vec<(String, String)>) {
        let mut resolved = BTreeMap::new();
        let mut unresolved = Vec::new();

        for (key, template) in map {
            let rendered = self.interpolate(template);
            unresolved.extend(
                rendered
                    .unresolved
                    .into_iter()
                    .map(|var| (key.clone(), var)),
            );
            resolved.insert(key.clone(), rendered.value);
        }

        (resolved, unresolved)
    }
}

fn format_time(at: &DateTime<Local>) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// Render a duration as `1h2m3s`, rounded to whole seconds.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = (delta.num_milliseconds() as f64 / 1000.0).round() as i64;
    let (sign, total) = if total < 0 { ("-", -total) } else { ("", total) };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}{}m{}s", sign, minutes, seconds)
    } else {
        format!("{}{}s", sign, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlane_core::{Commit, CommitAuthor, JobId, PushEvent, RepositoryInfo};

    fn sample_job() -> Job {
        let event = PushEvent {
            repository: RepositoryInfo {
                name: "ports".to_string(),
                full_name: "example/ports".to_string(),
                clone_url: "https://git.example.org/example/ports.git".to_string(),
                ..Default::default()
            },
            commits: vec![Commit {
                id: "0123456789abcdef".to_string(),
                message: "net/foo: bump version\n\nDetails".to_string(),
                author: CommitAuthor {
                    name: "Jo Doe".to_string(),
                    email: "jo@example.org".to_string(),
                    username: "jo".to_string(),
                },
                modified: vec!["net/foo/Makefile".to_string()],
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

    #[test]
    fn test_basic_interpolation() {
        let job = sample_job();
        let ctx = TemplateContext::from_job(&job);

        let rendered = ctx.interpolate("${job.port}@${commit.short_id} by ${author.username}");
        assert_eq!(rendered.value, "net/foo@0123456 by jo");
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_variable_becomes_empty() {
        let ctx = TemplateContext::default();
        let rendered = ctx.interpolate("a${unknown.var}b${nope}c");
        assert_eq!(rendered.value, "abc");
        assert_eq!(rendered.unresolved, vec!["unknown.var", "nope"]);
    }

    #[test]
    fn test_text_without_variables_is_untouched() {
        let ctx = TemplateContext::default();
        let rendered = ctx.interpolate(r#"{"literal": "$HOME ${"}"#);
        assert_eq!(rendered.value, r#"{"literal": "$HOME ${"}"#);
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn test_interpolate_map() {
        let job = sample_job();
        let ctx = TemplateContext::from_job(&job);

        let mut map = BTreeMap::new();
        map.insert("JOB_PORT".to_string(), "${job.port}".to_string());
        map.insert("REPO_URL".to_string(), "${repo.url}".to_string());
        map.insert("BROKEN".to_string(), "x-${job.nothing}".to_string());

        let (env, unresolved) = ctx.interpolate_map(&map);
        assert_eq!(env["JOB_PORT"], "net/foo");
        assert_eq!(env["REPO_URL"], "https://git.example.org/example/ports.git");
        assert_eq!(env["BROKEN"], "x-");
        assert_eq!(
            unresolved,
            vec![("BROKEN".to_string(), "job.nothing".to_string())]
        );
    }

    #[test]
    fn test_builds_summary() {
        let job = sample_job();
        let ctx = TemplateContext::from_job(&job);
        assert_eq!(ctx.job.builds, "001 amd64 pending");
        assert_eq!(ctx.job.status, "pending");
        assert_eq!(ctx.commit.summary, "net/foo: bump version");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::seconds(0)), "0s");
        assert_eq!(format_duration(TimeDelta::milliseconds(1600)), "2s");
        assert_eq!(format_duration(TimeDelta::seconds(125)), "2m5s");
        assert_eq!(format_duration(TimeDelta::seconds(3723)), "1h2m3s");
    }
}
