//! Build queues and the policy deciding which queues react to a commit.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::push::Commit;

/// Number of jobs a queue accepts before admission starts dropping work.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// A named build lane.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    /// Recipe identifier handed to the recipe runner.
    pub recipe: String,
    /// Pattern matched against added/modified paths. `None` never matches.
    pub path_match: Option<Regex>,
    /// Environment variable templates, resolved per job.
    pub environment: BTreeMap<String, String>,
    /// Directory the recipe runs in.
    pub workdir: PathBuf,
    /// Dispatch queue capacity.
    pub capacity: usize,
}

/// Why a queue was, or was not, selected for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// An added or modified file matched the queue's path pattern.
    PathMatch,
    /// A `ci: yes`/`ci: true` line in the commit message.
    TagIncluded,
    /// A `ci: no`/`ci: false` line in the commit message.
    TagExcluded,
    /// The queue is listed as a default queue.
    Default,
    NotMatched,
}

impl MatchDecision {
    pub fn is_included(&self) -> bool {
        matches!(
            self,
            MatchDecision::PathMatch | MatchDecision::TagIncluded | MatchDecision::Default
        )
    }
}

impl std::fmt::Display for MatchDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchDecision::PathMatch => write!(f, "path match"),
            MatchDecision::TagIncluded => write!(f, "commit tag"),
            MatchDecision::TagExcluded => write!(f, "excluded by commit tag"),
            MatchDecision::Default => write!(f, "default queue"),
            MatchDecision::NotMatched => write!(f, "not matched"),
        }
    }
}

/// Decision carried by a `ci:` line of a commit message.
fn message_tag(message: &str) -> Option<bool> {
    for line in message.lines() {
        let line = line.to_lowercase();
        if !line.starts_with("ci:") {
            continue;
        }
        if line.contains("no") || line.contains("false") {
            return Some(false);
        }
        if line.contains("yes") || line.contains("true") {
            return Some(true);
        }
    }
    None
}

impl QueueSpec {
    /// Whether any added or modified file of the commit matches the path pattern.
    pub fn matches_paths(&self, commit: &Commit) -> bool {
        match &self.path_match {
            Some(re) => commit.touched_files().any(|file| re.is_match(file)),
            None => false,
        }
    }

    /// Decide whether this queue builds the commit.
    ///
    /// Rules apply strictly in order: path match, then the first decisive
    /// `ci:` line of the message, then default-queue membership.
    pub fn decide(&self, commit: &Commit, is_default: bool) -> MatchDecision {
        if self.matches_paths(commit) {
            return MatchDecision::PathMatch;
        }

        match message_tag(&commit.message) {
            Some(true) => return MatchDecision::TagIncluded,
            Some(false) => return MatchDecision::TagExcluded,
            None => {}
        }

        if is_default {
            MatchDecision::Default
        } else {
            MatchDecision::NotMatched
        }
    }
}

/// The static set of queues, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: Vec<QueueSpec>,
    default_queues: Vec<String>,
}

impl QueueRegistry {
    pub fn new(queues: Vec<QueueSpec>, default_queues: Vec<String>) -> Self {
        Self {
            queues,
            default_queues,
        }
    }

    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    pub fn get(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.default_queues.iter().any(|q| q == name)
    }

    /// Every queue with its decision for the commit, in registry order.
    pub fn decisions<'a, 'c>(
        &'a self,
        commit: &'c Commit,
    ) -> impl Iterator<Item = (&'a QueueSpec, MatchDecision)> + use<'a, 'c> {
        self.queues
            .iter()
            .map(move |q| (q, q.decide(commit, self.is_default(&q.name))))
    }

    /// Queues that should build the commit, in registry order.
    pub fn match_commit(&self, commit: &Commit) -> Vec<&QueueSpec> {
        self.decisions(commit)
            .filter(|(_, decision)| decision.is_included())
            .map(|(q, _)| q)
            .collect()
    }
}
