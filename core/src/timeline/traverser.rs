//! Chronological replay of a topic.
//!
//! Buckets are visited in ascending order at every level. In item mode the
//! records of each minute bucket are parsed and sorted by their order key
//! before delivery, and a `Stop` still lets the rest of that bucket through
//! so the bucket is always seen whole. Handle mode hands out file paths in
//! directory order and stops at once.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::bucket::{numeric_children, BucketPath, LEVELS};
use super::{topic_dir, TimelineRecord, Visit};
use crate::error::Result;

/// Counters from one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalSummary {
    /// Minute buckets opened.
    pub buckets: usize,
    /// Records or handles handed to the callback.
    pub visited: usize,
    /// Entries that could not be read or parsed, or lay past the cut-off.
    pub skipped: usize,
    /// Whether the callback asked to stop.
    pub stopped: bool,
}

pub struct TopicTraverser {
    root: PathBuf,
    cutoff: Option<DateTime<Utc>>,
}

impl TopicTraverser {
    pub fn new(root: &Path) -> Self {
        TopicTraverser {
            root: root.to_path_buf(),
            cutoff: None,
        }
    }

    /// Ignore buckets and records after `now`.
    pub fn with_cutoff(mut self, now: DateTime<Utc>) -> Self {
        self.cutoff = Some(now);
        self
    }

    /// Visit every record of `topic` in creation order.
    pub fn traverse_items<T, F>(&self, topic: &str, mut callback: F) -> Result<TraversalSummary>
    where
        T: TimelineRecord,
        F: FnMut(T) -> Visit,
    {
        let mut summary = TraversalSummary::default();
        let cutoff = self.cutoff;
        self.walk(topic, &mut summary, &mut |bucket, dir, summary| {
            let mut records: Vec<T> = Vec::new();
            for path in entry_files(dir)? {
                match read_record::<T>(&path) {
                    Ok(r) => {
                        if let (Some(limit), Some(created)) = (cutoff, r.created_at()) {
                            if created > limit {
                                summary.skipped += 1;
                                continue;
                            }
                        }
                        records.push(r);
                    }
                    Err(reason) => {
                        warn!(path = %path.display(), reason = %reason, "skipping unreadable record");
                        summary.skipped += 1;
                    }
                }
            }
            records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

            let mut stop = false;
            for r in records {
                summary.visited += 1;
                if callback(r) == Visit::Stop && !stop {
                    debug!(bucket = ?bucket, "stop requested, draining bucket");
                    stop = true;
                }
            }
            Ok(stop)
        })?;
        Ok(summary)
    }

    /// Visit the file of every record of `topic`, buckets in order but
    /// entries unsorted.
    pub fn traverse_handles<F>(&self, topic: &str, mut callback: F) -> Result<TraversalSummary>
    where
        F: FnMut(&Path) -> Visit,
    {
        let mut summary = TraversalSummary::default();
        self.walk(topic, &mut summary, &mut |_, dir, summary| {
            for path in entry_files(dir)? {
                summary.visited += 1;
                if callback(&path) == Visit::Stop {
                    return Ok(true);
                }
            }
            Ok(false)
        })?;
        Ok(summary)
    }

    fn walk(
        &self,
        topic: &str,
        summary: &mut TraversalSummary,
        visit_bucket: &mut dyn FnMut(BucketPath, &Path, &mut TraversalSummary) -> Result<bool>,
    ) -> Result<()> {
        let dir = topic_dir(&self.root, topic);
        if !dir.is_dir() {
            debug!(topic, dir = %dir.display(), "topic has no timeline");
            return Ok(());
        }
        let cutoff = self.cutoff.map(|c| BucketPath::for_instant(&c).parts());
        let mut parts = [0u32; LEVELS];
        summary.stopped = descend(&dir, 0, &mut parts, cutoff.as_ref(), summary, visit_bucket)?;
        Ok(())
    }
}

/// Walk one level. Returns true once the callback stopped the traversal.
fn descend(
    dir: &Path,
    level: usize,
    parts: &mut [u32; LEVELS],
    cutoff: Option<&[u32; LEVELS]>,
    summary: &mut TraversalSummary,
    visit_bucket: &mut dyn FnMut(BucketPath, &Path, &mut TraversalSummary) -> Result<bool>,
) -> Result<bool> {
    let children = match numeric_children(dir, level) {
        Ok(c) => c,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list bucket");
            return Ok(false);
        }
    };
    for (value, child) in children {
        parts[level] = value;
        // Siblings ascend, so everything from here on is later too.
        if let Some(limit) = cutoff {
            if parts[..=level] > limit[..=level] {
                break;
            }
        }
        let stopped = if level + 1 == LEVELS {
            summary.buckets += 1;
            visit_bucket(BucketPath::from_parts(*parts), &child, summary)?
        } else {
            descend(&child, level + 1, parts, cutoff, summary, visit_bucket)?
        };
        if stopped {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Regular `.json` files in a minute bucket, in directory order.
fn entry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_record<T: TimelineRecord>(path: &Path) -> std::result::Result<T, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
