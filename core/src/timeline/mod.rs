//! Topic/time hierarchy of records, replayed in creation order.
//!
//! ```text
//! <root>/<topic with '/' replaced by '.'>/yyyy/mm/dd/hh/mm/<id>.json
//! ```

pub mod bucket;
pub mod traverser;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{InstallerError, Result};
pub use bucket::BucketPath;
pub use traverser::{TopicTraverser, TraversalSummary};

/// Callback verdict during a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// A record stored in the timeline.
pub trait TimelineRecord: DeserializeOwned {
    type Key: Ord;

    /// Sort key within a minute bucket.
    fn order_key(&self) -> Self::Key;

    /// Creation time, checked against a traversal cut-off.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub topic: String,
    pub created: DateTime<Utc>,
    /// Creation counter; breaks ties between jobs created in the same instant.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl JobRecord {
    pub fn new(id: &str, topic: &str, created: DateTime<Utc>, sequence: u64) -> Self {
        JobRecord {
            id: id.to_string(),
            topic: topic.to_string(),
            created,
            sequence,
            properties: BTreeMap::new(),
        }
    }
}

impl TimelineRecord for JobRecord {
    type Key = (DateTime<Utc>, u64);

    fn order_key(&self) -> Self::Key {
        (self.created, self.sequence)
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created)
    }
}

/// Directory holding `topic` under `root`.
pub fn topic_dir(root: &Path, topic: &str) -> PathBuf {
    root.join(topic.replace('/', "."))
}

/// Store `job` in its minute bucket. Returns the file written.
pub fn append_record(root: &Path, job: &JobRecord) -> Result<PathBuf> {
    if job.id.is_empty() || job.id.contains(['/', '\\']) || job.id.starts_with('.') {
        return Err(InstallerError::Persist(format!("invalid job id '{}'", job.id)));
    }
    let dir = topic_dir(root, &job.topic).join(BucketPath::for_instant(&job.created).relative_path());
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", job.id));
    let json = serde_json::to_vec_pretty(job)
        .map_err(|e| InstallerError::Persist(format!("serialize job {}: {}", job.id, e)))?;
    fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn append_files_record_under_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let created = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 1).unwrap();
        let path = append_record(tmp.path(), &JobRecord::new("j1", "a/b", created, 0)).unwrap();
        assert_eq!(
            path,
            tmp.path().join("a.b/2023/12/31/23/59/j1.json")
        );
        let back: JobRecord = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.created, created);
    }

    #[test]
    fn rejects_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let job = JobRecord::new("../x", "t", Utc::now(), 0);
        assert!(append_record(tmp.path(), &job).is_err());
    }

    #[test]
    fn order_key_breaks_ties_by_sequence() {
        let t = Utc::now();
        let a = JobRecord::new("a", "t", t, 2);
        let b = JobRecord::new("b", "t", t, 1);
        assert!(b.order_key() < a.order_key());
    }
}
