//! Push event payloads delivered by the source-control host.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Parsed push webhook payload.
///
/// Only the fields the orchestrator consumes are modelled; everything else in
/// the payload is ignored. Missing fields decode to empty values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: RepositoryInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub commits: Vec<Commit>,
    /// Shared secret embedded in the body by hosts that do not sign payloads.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

/// Repository metadata from a push event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub html_url: String,
    /// Status endpoint template containing a `{sha}` placeholder.
    #[serde(default, rename = "statuses_url", deserialize_with = "null_as_default")]
    pub status_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clone_url: String,
}

/// A single commit of a push event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: CommitAuthor,
    #[serde(default, deserialize_with = "null_as_default")]
    pub added: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub removed: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub modified: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
}

/// Decode an explicit `null` like a missing field.
///
/// Hosts written in Go send `null` for empty lists and absent objects.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Commit {
    /// Added and modified paths, the ones that can trigger builds.
    pub fn touched_files(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .map(|s| s.as_str())
    }

    /// Ports (`category/name`) touched by this commit.
    ///
    /// A path contributes its first two components when it has more than two,
    /// so `net/foo/Makefile` yields `net/foo` while top-level files such as
    /// `Mk/bsd.port.mk` are ignored. Removed files never contribute.
    pub fn affected_ports(&self) -> BTreeSet<String> {
        self.touched_files()
            .filter_map(|file| {
                let parts: Vec<&str> = file.split('/').collect();
                if parts.len() > 2 {
                    Some(format!("{}/{}", parts[0], parts[1]))
                } else {
                    None
                }
            })
            .collect()
    }

    /// First seven characters of the commit ID.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(7) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}
