//! Task planner: diffs registry winners against what the runtime reports.
//!
//! The planner is stateless: it takes a registry snapshot and the runtime's
//! installed list and returns the tasks needed to converge them. It never
//! executes anything itself.

use std::collections::HashMap;

use tracing::debug;

use crate::infrastructure::InstalledItem;
use crate::registry::RegistrySnapshot;
use crate::types::resource::{RegisteredResource, ResourceKind};
use crate::types::task::{Task, TaskCategory, TaskSet};

/// Result of the collecting phase.
#[derive(Debug, Default)]
pub struct Plan {
    /// Tasks for this cycle, deduplicated by category + target.
    pub tasks: TaskSet,
    /// `(entity, digest)` of retracted resources that were never installed;
    /// they need no removal task and can leave the registry.
    pub retire: Vec<(String, String)>,
    /// Requeued tasks the current state no longer calls for.
    pub stale: Vec<Task>,
}

/// Compute the tasks for one cycle.
///
/// Per entity, the first candidate that still matters is compared to the
/// installed item:
///
/// 1. installable, nothing installed: install
/// 2. installable, installed with another digest: update
/// 3. installable module, same digest, not active: start
/// 4. pending removal and installed with that digest: remove
///
/// Managed items with no candidate at all are removed. Tasks carried over
/// from the previous cycle are merged in: refreshes always survive, other
/// carried tasks only when this cycle derived the same task again.
pub fn collect(
    snapshot: &RegistrySnapshot,
    installed: &[InstalledItem],
    requeued: TaskSet,
    default_start_level: u32,
) -> Plan {
    let mut plan = Plan::default();

    let mut by_entity: HashMap<&str, &InstalledItem> = HashMap::new();
    for item in installed {
        by_entity.entry(item.entity_id.as_str()).or_insert(item);
    }

    for (entity, resources) in snapshot {
        let item = by_entity.get(entity.as_str()).copied();

        // Skip retracted candidates that were never installed.
        let mut candidate: Option<&RegisteredResource> = None;
        for r in resources.iter() {
            if r.installable() || item.is_some_and(|i| i.digest == r.digest()) {
                candidate = Some(r);
                break;
            }
            plan.retire.push((entity.clone(), r.digest().to_string()));
        }

        let candidate = match candidate {
            Some(c) => c,
            None => {
                if let Some(i) = item.filter(|i| i.managed) {
                    plan.tasks.insert(orphan_removal(i));
                }
                continue;
            }
        };

        // A retracted candidate is still removed even if its digest failed.
        if candidate.installable() && resources.is_ignored(candidate.digest()) {
            debug!(entity = %entity, digest = %candidate.digest(), "skipping ignored resource");
            continue;
        }

        if let Some(task) = derive(candidate, item, default_start_level) {
            plan.tasks.insert(task);
        }
    }

    for item in installed {
        if item.managed && !snapshot.contains_key(&item.entity_id) {
            plan.tasks.insert(orphan_removal(item));
        }
    }

    for task in requeued {
        if task.category == TaskCategory::Refresh {
            plan.tasks.insert_if_absent(task);
        } else if !plan.tasks.contains(&task.key()) {
            plan.stale.push(task);
        }
    }

    plan
}

fn derive(
    candidate: &RegisteredResource,
    item: Option<&InstalledItem>,
    default_start_level: u32,
) -> Option<Task> {
    let item = match item {
        Some(i) => i,
        None => {
            return candidate
                .installable()
                .then(|| Task::install(candidate.clone()));
        }
    };

    if !candidate.installable() {
        // Only reached when the installed digest matches.
        return Some(Task::remove(
            removal_category(item.kind),
            candidate.entity_id(),
            Some(candidate.clone()),
            item.handle,
        ));
    }

    if item.digest != candidate.digest() {
        return Some(Task::update(candidate.clone(), item.handle));
    }

    if candidate.kind() == ResourceKind::Module && !item.active {
        let level = candidate.start_level().unwrap_or(default_start_level);
        return Some(Task::start(candidate.clone(), item.handle, level));
    }

    None
}

fn orphan_removal(item: &InstalledItem) -> Task {
    Task::remove(removal_category(item.kind), &item.entity_id, None, item.handle)
}

fn removal_category(kind: ResourceKind) -> TaskCategory {
    match kind {
        ResourceKind::Module => TaskCategory::ModuleRemove,
        ResourceKind::Config => TaskCategory::ConfigRemove,
    }
}
