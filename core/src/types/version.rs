//! Module versions: `major.minor.micro[.qualifier]`.
//!
//! A qualifier ending in `SNAPSHOT` marks a mutable pre-release artifact. For
//! ordering, a snapshot sorts below the release of the same base version, and
//! any other qualifier sorts above it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InstallerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, micro: u64) -> Self {
        Version {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Parse `1`, `1.2`, `1.2.3`, `1.2.3.qualifier` or `1.2.3-qualifier`.
    pub fn parse(raw: &str) -> Result<Self, InstallerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InstallerError::InvalidVersion(raw.to_string()));
        }

        let invalid = || InstallerError::InvalidVersion(raw.to_string());

        // Up to three numeric parts; a '-' or the third '.' starts the qualifier.
        let mut nums = [0u64; 3];
        let mut rest = raw;
        let mut qualifier = String::new();
        for (i, slot) in nums.iter_mut().enumerate() {
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(invalid());
            }
            *slot = rest[..end].parse::<u64>().map_err(|_| invalid())?;
            rest = &rest[end..];
            match rest.chars().next() {
                None => break,
                Some('.') if i < 2 => rest = &rest[1..],
                Some('.') | Some('-') => {
                    qualifier = rest[1..].to_string();
                    if qualifier.is_empty() {
                        return Err(invalid());
                    }
                    break;
                }
                Some(_) => return Err(invalid()),
            }
        }

        Ok(Version {
            major: nums[0],
            minor: nums[1],
            micro: nums[2],
            qualifier,
        })
    }

    /// Whether this is a snapshot (mutable content under a stable label).
    pub fn is_snapshot(&self) -> bool {
        self.qualifier.to_ascii_uppercase().ends_with("SNAPSHOT")
    }

    /// The numeric part, ignoring the qualifier.
    pub fn base(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.micro)
    }

    /// Whether both versions are snapshots of the same base version.
    pub fn same_snapshot_line(&self, other: &Version) -> bool {
        self.is_snapshot() && other.is_snapshot() && self.base() == other.base()
    }

    fn qualifier_rank(&self) -> u8 {
        if self.is_snapshot() {
            0
        } else if self.qualifier.is_empty() {
            1
        } else {
            2
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base()
            .cmp(&other.base())
            .then_with(|| self.qualifier_rank().cmp(&other.qualifier_rank()))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Version {
    type Error = InstallerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}
