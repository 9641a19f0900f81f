//! The candidate set of one entity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::resource::RegisteredResource;

/// What `add_or_update` did with a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// New content for the entity.
    Added,
    /// Replaced the entry registered earlier under the same url.
    Superseded { previous_digest: String },
    /// Same content was pending removal and is installable again.
    Revived,
    /// Same content already registered; nothing changed.
    Unchanged,
}

/// What retracting a resource did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retraction {
    /// The winner is now pending removal.
    MarkedForRemoval,
    /// A non-winning candidate was dropped outright.
    Dropped,
    /// Nothing matched, or it was already pending removal.
    NotFound,
}

/// All resources claiming one entity, best candidate first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityResources {
    #[serde(default)]
    resources: BTreeSet<RegisteredResource>,
    /// Digests whose tasks failed fatally.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    ignored: BTreeSet<String>,
    /// Digest the runtime last reported for this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    installed: Option<String>,
}

impl EntityResources {
    pub fn new() -> Self {
        EntityResources::default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// The resource that should be active.
    pub fn winner(&self) -> Option<&RegisteredResource> {
        self.resources.iter().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredResource> {
        self.resources.iter()
    }

    pub fn find_digest(&self, digest: &str) -> Option<&RegisteredResource> {
        self.resources.iter().find(|r| r.digest() == digest)
    }

    pub fn is_ignored(&self, digest: &str) -> bool {
        self.ignored.contains(digest)
    }

    pub fn ignored(&self) -> &BTreeSet<String> {
        &self.ignored
    }

    pub fn installed_digest(&self) -> Option<&str> {
        self.installed.as_deref()
    }

    /// Record the installed digest. Returns true if it changed.
    pub fn set_installed(&mut self, digest: Option<&str>) -> bool {
        if self.installed.as_deref() == digest {
            return false;
        }
        self.installed = digest.map(str::to_string);
        true
    }

    /// Insert `resource`, whose serial is assigned by `next_serial` only
    /// when it is actually stored.
    pub fn add_or_update(
        &mut self,
        resource: RegisteredResource,
        next_serial: impl FnOnce() -> u64,
    ) -> AddOutcome {
        if let Some(existing) = self.find_digest(resource.digest()).cloned() {
            if existing.installable() {
                return AddOutcome::Unchanged;
            }
            self.resources.replace(existing.with_installable(true));
            return AddOutcome::Revived;
        }

        let previous = self
            .resources
            .iter()
            .find(|r| r.url() == resource.url())
            .cloned();
        if let Some(p) = &previous {
            self.resources.remove(p);
        }
        self.resources.insert(resource.with_serial(next_serial()));

        match previous {
            Some(p) => AddOutcome::Superseded {
                previous_digest: p.digest().to_string(),
            },
            None => AddOutcome::Added,
        }
    }

    /// Retract the first resource matching `pred`: the winner is kept but
    /// marked not installable so a removal task runs, any other candidate
    /// goes. A winner already pending removal is passed over.
    pub fn retract(&mut self, pred: impl Fn(&RegisteredResource) -> bool) -> Retraction {
        let winner = self.winner().cloned();
        let target = self
            .resources
            .iter()
            .filter(|r| pred(r))
            .find(|r| r.installable() || Some(*r) != winner.as_ref())
            .cloned();
        let target = match target {
            Some(t) => t,
            None => return Retraction::NotFound,
        };
        if Some(&target) == winner.as_ref() {
            self.resources.replace(target.with_installable(false));
            Retraction::MarkedForRemoval
        } else {
            self.resources.remove(&target);
            Retraction::Dropped
        }
    }

    /// Drop the resource with `digest`, but only while it is still pending
    /// removal. Returns true if dropped.
    pub fn drop_retired(&mut self, digest: &str) -> bool {
        match self.find_digest(digest).cloned() {
            Some(r) if !r.installable() => self.resources.remove(&r),
            _ => false,
        }
    }

    pub fn mark_ignored(&mut self, digest: &str) -> bool {
        self.ignored.insert(digest.to_string())
    }

    /// Drop non-winning candidates pending removal and ignore-marks for
    /// digests no longer present. Returns the number of entries dropped.
    pub fn compact(&mut self) -> usize {
        let stale: Vec<RegisteredResource> = self
            .resources
            .iter()
            .skip(1)
            .filter(|r| !r.installable())
            .cloned()
            .collect();
        for r in &stale {
            self.resources.remove(r);
        }
        let present: BTreeSet<&str> = self.resources.iter().map(|r| r.digest()).collect();
        self.ignored.retain(|d| present.contains(d.as_str()));
        stale.len()
    }
}
