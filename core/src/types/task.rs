//! Units of work derived from the difference between desired and actual state.
//!
//! Tasks are ordered by a string sort key whose first component is the
//! category ordinal, so the fixed category order dominates everything else.
//! Equality is category + target only: a `TaskSet` collapses duplicates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::RegisteredResource;
use crate::infrastructure::ModuleHandle;

// ---------------------------------------------------------------------------
// TaskCategory
// ---------------------------------------------------------------------------

/// Task categories in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    ConfigRemove,
    ConfigInstall,
    ModuleRemove,
    ModuleUpdate,
    ModuleInstall,
    Refresh,
    ModuleStart,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 7] = [
        TaskCategory::ConfigRemove,
        TaskCategory::ConfigInstall,
        TaskCategory::ModuleRemove,
        TaskCategory::ModuleUpdate,
        TaskCategory::ModuleInstall,
        TaskCategory::Refresh,
        TaskCategory::ModuleStart,
    ];

    pub fn ordinal(&self) -> u8 {
        match self {
            TaskCategory::ConfigRemove => 0,
            TaskCategory::ConfigInstall => 1,
            TaskCategory::ModuleRemove => 2,
            TaskCategory::ModuleUpdate => 3,
            TaskCategory::ModuleInstall => 4,
            TaskCategory::Refresh => 5,
            TaskCategory::ModuleStart => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskCategory::ConfigRemove => "config-remove",
            TaskCategory::ConfigInstall => "config-install",
            TaskCategory::ModuleRemove => "module-remove",
            TaskCategory::ModuleUpdate => "module-update",
            TaskCategory::ModuleInstall => "module-install",
            TaskCategory::Refresh => "refresh",
            TaskCategory::ModuleStart => "module-start",
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, TaskCategory::ConfigRemove | TaskCategory::ModuleRemove)
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Identity of a task: two tasks with the same key are the same work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub category: TaskCategory,
    pub target: String,
}

/// Target used by refresh tasks, which are global.
pub const REFRESH_TARGET: &str = "*";

#[derive(Debug, Clone)]
pub struct Task {
    pub category: TaskCategory,
    /// Entity id the task acts on (`REFRESH_TARGET` for refreshes).
    pub target: String,
    /// The registry resource the task applies, or retires for removals.
    pub resource: Option<RegisteredResource>,
    /// Runtime handle of the installed item, when there is one.
    pub handle: Option<ModuleHandle>,
    /// Start level; only meaningful for start tasks.
    pub start_level: u32,
}

impl Task {
    pub fn install(resource: RegisteredResource) -> Self {
        let category = match resource.kind() {
            super::resource::ResourceKind::Module => TaskCategory::ModuleInstall,
            super::resource::ResourceKind::Config => TaskCategory::ConfigInstall,
        };
        Task {
            category,
            target: resource.entity_id().to_string(),
            resource: Some(resource),
            handle: None,
            start_level: 0,
        }
    }

    pub fn update(resource: RegisteredResource, handle: ModuleHandle) -> Self {
        let category = match resource.kind() {
            super::resource::ResourceKind::Module => TaskCategory::ModuleUpdate,
            // Config admin overwrites in place: install and update share a category.
            super::resource::ResourceKind::Config => TaskCategory::ConfigInstall,
        };
        Task {
            category,
            target: resource.entity_id().to_string(),
            resource: Some(resource),
            handle: Some(handle),
            start_level: 0,
        }
    }

    pub fn remove(
        category: TaskCategory,
        target: &str,
        resource: Option<RegisteredResource>,
        handle: ModuleHandle,
    ) -> Self {
        debug_assert!(category.is_removal());
        Task {
            category,
            target: target.to_string(),
            resource,
            handle: Some(handle),
            start_level: 0,
        }
    }

    pub fn start(resource: RegisteredResource, handle: ModuleHandle, start_level: u32) -> Self {
        Task {
            category: TaskCategory::ModuleStart,
            target: resource.entity_id().to_string(),
            resource: Some(resource),
            handle: Some(handle),
            start_level,
        }
    }

    pub fn refresh() -> Self {
        Task {
            category: TaskCategory::Refresh,
            target: REFRESH_TARGET.to_string(),
            resource: None,
            handle: None,
            start_level: 0,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            category: self.category,
            target: self.target.clone(),
        }
    }

    /// Category-prefixed human description.
    pub fn description(&self) -> String {
        format!("{} {}", self.category.label(), self.target)
    }

    /// Total-order sort key: category ordinal, then (start tasks only) start
    /// level ascending and registration serial, then target.
    pub fn sort_key(&self) -> String {
        let (level, serial) = match self.category {
            TaskCategory::ModuleStart => (
                self.start_level,
                self.resource.as_ref().map(|r| r.serial()).unwrap_or(0),
            ),
            _ => (0, 0),
        };
        format!(
            "{}:{:010}:{:020}:{}",
            self.category.ordinal(),
            level,
            serial,
            self.target
        )
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.target == other.target
    }
}

impl Eq for Task {}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

// ---------------------------------------------------------------------------
// TaskSet
// ---------------------------------------------------------------------------

/// A set of tasks with category + target identity.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: HashMap<TaskKey, Task>,
}

impl TaskSet {
    pub fn new() -> Self {
        TaskSet::default()
    }

    /// Insert a task, replacing an equal one. Returns true if it was new.
    pub fn insert(&mut self, task: Task) -> bool {
        self.tasks.insert(task.key(), task).is_none()
    }

    /// Insert only if no equal task is present. Returns true if inserted.
    pub fn insert_if_absent(&mut self, task: Task) -> bool {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return false;
        }
        self.tasks.insert(key, task);
        true
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Take every task out, leaving the set empty.
    pub fn take(&mut self) -> TaskSet {
        std::mem::take(self)
    }

    /// Iterate in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Consume the set, returning tasks in execution order.
    pub fn into_sorted(self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.into_values().collect();
        tasks.sort_by_cached_key(|t| t.sort_key());
        tasks
    }
}

impl IntoIterator for TaskSet {
    type Item = Task;
    type IntoIter = std::collections::hash_map::IntoValues<TaskKey, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::resource::{PropertyMap, ResourcePayload};
    use crate::types::version::Version;

    fn module(entity: &str, level: Option<u32>, serial: u64) -> RegisteredResource {
        RegisteredResource::new(
            "test",
            entity,
            entity,
            "d",
            0,
            Version::new(1, 0, 0),
            ResourcePayload::Module {
                symbolic_name: entity.into(),
                start_level: level,
            },
        )
        .with_serial(serial)
    }

    fn config(entity: &str) -> RegisteredResource {
        RegisteredResource::new(
            "test",
            entity,
            entity,
            "d",
            0,
            Version::default(),
            ResourcePayload::Config {
                pid: entity.into(),
                factory_pid: None,
                properties: PropertyMap::new(),
            },
        )
    }

    #[test]
    fn category_order_is_fixed() {
        let mut set = TaskSet::new();
        set.insert(Task::start(module("module:s", Some(1), 1), ModuleHandle(1), 1));
        set.insert(Task::refresh());
        set.insert(Task::install(module("module:i", None, 2)));
        set.insert(Task::update(module("module:u", None, 3), ModuleHandle(2)));
        set.insert(Task::remove(TaskCategory::ModuleRemove, "module:r", None, ModuleHandle(3)));
        set.insert(Task::install(config("config:c")));
        set.insert(Task::remove(TaskCategory::ConfigRemove, "config:x", None, ModuleHandle(4)));

        let order: Vec<TaskCategory> = set.into_sorted().iter().map(|t| t.category).collect();
        assert_eq!(order, TaskCategory::ALL.to_vec());
    }

    #[test]
    fn start_tasks_order_by_level_then_serial() {
        let mut set = TaskSet::new();
        set.insert(Task::start(module("module:late", Some(30), 1), ModuleHandle(1), 30));
        set.insert(Task::start(module("module:b", Some(5), 9), ModuleHandle(2), 5));
        set.insert(Task::start(module("module:a", Some(5), 4), ModuleHandle(3), 5));
        let targets: Vec<String> = set.into_sorted().into_iter().map(|t| t.target).collect();
        assert_eq!(targets, vec!["module:a", "module:b", "module:late"]);
    }

    #[test]
    fn duplicates_collapse() {
        let mut set = TaskSet::new();
        assert!(set.insert(Task::refresh()));
        assert!(!set.insert(Task::refresh()));
        assert!(set.insert_if_absent(Task::install(module("module:a", None, 1))));
        assert!(!set.insert_if_absent(Task::install(module("module:a", None, 2))));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn equality_ignores_payload() {
        let a = Task::install(module("module:a", None, 1));
        let b = Task::install(module("module:a", Some(4), 8));
        assert_eq!(a, b);
        assert_ne!(a, Task::update(module("module:a", None, 1), ModuleHandle(1)));
    }

    #[test]
    fn config_update_shares_install_category() {
        let t = Task::update(config("config:c"), ModuleHandle(9));
        assert_eq!(t.category, TaskCategory::ConfigInstall);
        assert_eq!(t.description(), "config-install config:c");
    }
}
