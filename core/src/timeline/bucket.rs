//! Time buckets: `yyyy/mm/dd/hh/mm` directories under a topic.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use tracing::debug;

use crate::error::Result;

/// Number of bucket levels below a topic directory.
pub const LEVELS: usize = 5;

/// Valid range per level: year, month, day, hour, minute.
const RANGES: [(u32, u32); LEVELS] = [(0, 9999), (1, 12), (1, 31), (0, 23), (0, 59)];

/// One minute bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketPath {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl BucketPath {
    pub fn for_instant(t: &DateTime<Utc>) -> Self {
        BucketPath {
            year: t.year().max(0) as u32,
            month: t.month(),
            day: t.day(),
            hour: t.hour(),
            minute: t.minute(),
        }
    }

    pub(crate) fn from_parts(parts: [u32; LEVELS]) -> Self {
        BucketPath {
            year: parts[0],
            month: parts[1],
            day: parts[2],
            hour: parts[3],
            minute: parts[4],
        }
    }

    pub fn parts(&self) -> [u32; LEVELS] {
        [self.year, self.month, self.day, self.hour, self.minute]
    }

    /// Start of the minute, if the bucket names a real date.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(
            self.year as i32,
            self.month,
            self.day,
            self.hour,
            self.minute,
            0,
        )
        .single()
    }

    /// Path relative to the topic directory, zero padded.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{:04}/{:02}/{:02}/{:02}/{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        ))
    }
}

/// Subdirectories of `dir` whose names are numbers valid for `level`,
/// ascending by value. Other entries are skipped.
pub(crate) fn numeric_children(dir: &Path, level: usize) -> Result<Vec<(u32, PathBuf)>> {
    let (lo, hi) = RANGES[level];
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let value = match name.parse::<u32>() {
            Ok(v) if (lo..=hi).contains(&v) && entry.path().is_dir() => v,
            _ => {
                debug!(dir = %dir.display(), entry = %name, "skipping non-bucket entry");
                continue;
            }
        };
        children.push((value, entry.path()));
    }
    children.sort_by_key(|(v, _)| *v);
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_zero_padded() {
        let t = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 44).unwrap();
        let b = BucketPath::for_instant(&t);
        assert_eq!(b.relative_path(), PathBuf::from("2024/03/07/09/05"));
        assert_eq!(b.start(), Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).single());
    }

    #[test]
    fn impossible_dates_have_no_start() {
        let b = BucketPath::from_parts([2023, 2, 30, 0, 0]);
        assert_eq!(b.start(), None);
    }

    #[test]
    fn children_sort_numerically_and_skip_junk() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["10", "9", "2", "notes", "13"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }
        fs::write(tmp.path().join("11"), b"a file").unwrap();
        let months: Vec<u32> = numeric_children(tmp.path(), 1)
            .unwrap()
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(months, vec![2, 9, 10]);
    }
}
