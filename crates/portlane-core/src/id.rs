//! Job and build identifiers.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::Error;

/// Format used to render job identifiers, e.g. `20240314-09:26:53.589793`.
const JOB_ID_FORMAT: &str = "%Y%m%d-%H:%M:%S%.6f";

/// Last microsecond timestamp handed out, shared by every generator in the process.
static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Identifier of a job: its creation time in local time with microsecond precision.
///
/// IDs come from a process-wide monotonic clock, so two jobs created in the
/// same microsecond still get distinct identifiers. They sort in creation
/// order except across a backwards jump of the local offset (DST fall-back),
/// where the repeated hour renders earlier than the hour before it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh identifier from the current time.
    pub fn generate() -> Self {
        let micros = next_micros();
        let at = DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now);
        Self::from_time(at.with_timezone(&Local))
    }

    /// Render the identifier for a specific instant.
    pub fn from_time(at: DateTime<Local>) -> Self {
        Self(at.format(JOB_ID_FORMAT).to_string())
    }

    /// The creation time encoded in the identifier.
    pub fn timestamp(&self) -> Option<DateTime<Local>> {
        let naive = NaiveDateTime::parse_from_str(&self.0, "%Y%m%d-%H:%M:%S%.f").ok()?;
        Local.from_local_datetime(&naive).earliest()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    /// Accepts only well-formed identifiers, so a parsed ID is always safe to
    /// use as a path component.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, "%Y%m%d-%H:%M:%S%.f")
            .map(|_| Self(s.to_string()))
            .map_err(|_| Error::InvalidInput(format!("malformed job id: {}", s)))
    }
}

fn next_micros() -> i64 {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Identifier of a build within its job: a zero-padded sequence number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct BuildId(String);

impl BuildId {
    /// Build ID for the `seq`-th build of a job, starting at 1 (`"001"`).
    pub fn from_sequence(seq: usize) -> Self {
        Self(format!("{:03}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_build_id_padding() {
        assert_eq!(BuildId::from_sequence(1).as_str(), "001");
        assert_eq!(BuildId::from_sequence(42).as_str(), "042");
        assert_eq!(BuildId::from_sequence(1234).as_str(), "1234");
    }

    #[test]
    fn test_job_id_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 14, 9, 26, 53).unwrap();
        let id = JobId::from_time(at);
        assert_eq!(id.as_str(), "20240314-09:26:53.000000");
        assert_eq!(id.timestamp(), Some(at));
    }

    #[test]
    fn test_generated_ids_are_unique_and_ordered() {
        let ids: Vec<JobId> = (0..1000).map(|_| JobId::generate()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parse_rejects_paths() {
        assert!("20240314-09:26:53.589793".parse::<JobId>().is_ok());
        assert!("../etc/passwd".parse::<JobId>().is_err());
        assert!("20240314-09:26:53.589793/..".parse::<JobId>().is_err());
    }
}
