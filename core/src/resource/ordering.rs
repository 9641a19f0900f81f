//! Total order over registered resources.
//!
//! Within one entity the best candidate sorts first: newest version, then
//! highest priority. Snapshots of the same base version are ordered by
//! registration serial instead, newest first. Remaining keys only exist to
//! keep the order strict so sorted sets never collapse distinct resources.
//!
//! The installable flag does not take part: a pending-removal copy of a
//! resource compares equal to the existing entry and replaces it in a set.

use std::cmp::Ordering;

use crate::types::resource::RegisteredResource;

/// Compare two resources, best candidate first within an entity.
pub fn compare(a: &RegisteredResource, b: &RegisteredResource) -> Ordering {
    a.entity_id
        .cmp(&b.entity_id)
        .then_with(|| compare_versions(a, b))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.digest.cmp(&b.digest))
        .then_with(|| a.url.cmp(&b.url))
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.serial.cmp(&b.serial))
}

fn compare_versions(a: &RegisteredResource, b: &RegisteredResource) -> Ordering {
    if a.version.same_snapshot_line(&b.version) {
        b.serial.cmp(&a.serial)
    } else {
        b.version.cmp(&a.version)
    }
}

impl Ord for RegisteredResource {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for RegisteredResource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RegisteredResource {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RegisteredResource {}
