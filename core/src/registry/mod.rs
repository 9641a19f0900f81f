//! The persistent resource registry.
//!
//! Maps each entity id to the ordered set of resources claiming it. All
//! mutation happens inside one mutex; the cycle runner works on snapshots
//! taken under the same lock. The registry is restored from its store on
//! open and written back by `save` whenever something changed.

pub mod entity;
pub mod state;
pub mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::resource::{RegisteredResource, ResourceKind};
pub use entity::{AddOutcome, EntityResources, Retraction};
pub use state::{InstallationState, ResourceGroup, ResourceState, ResourceStatus};
use store::{LoadOutcome, RegistryFile, FORMAT_VERSION};

#[derive(Debug, Default)]
struct RegistryState {
    entities: BTreeMap<String, EntityResources>,
    next_serial: u64,
    dirty: bool,
}

impl RegistryState {
    fn retract_where(&mut self, pred: impl Fn(&RegisteredResource) -> bool) -> usize {
        let mut count = 0;
        for resources in self.entities.values_mut() {
            // One entity may hold several matches (a scope retraction).
            while resources.retract(&pred) != Retraction::NotFound {
                count += 1;
            }
        }
        self.entities.retain(|_, e| !e.is_empty());
        if count > 0 {
            self.dirty = true;
        }
        count
    }
}

/// Read-only copy of the registry taken for one cycle.
pub type RegistrySnapshot = BTreeMap<String, EntityResources>;

#[derive(Debug)]
pub struct ResourceRegistry {
    state: Mutex<RegistryState>,
    path: Option<PathBuf>,
}

impl ResourceRegistry {
    /// An empty registry with no backing store.
    pub fn in_memory() -> Self {
        ResourceRegistry {
            state: Mutex::new(RegistryState {
                next_serial: 1,
                ..RegistryState::default()
            }),
            path: None,
        }
    }

    /// Restore from `path`, starting empty if the file is missing or bad.
    pub fn open(path: &Path) -> Self {
        let state = match store::load(path) {
            LoadOutcome::Loaded(file) => {
                info!(
                    path = %path.display(),
                    entities = file.entities.len(),
                    "restored resource registry"
                );
                RegistryState {
                    entities: file.entities,
                    next_serial: file.next_serial.max(1),
                    dirty: false,
                }
            }
            LoadOutcome::Missing => {
                debug!(path = %path.display(), "no registry file, starting empty");
                RegistryState {
                    next_serial: 1,
                    ..RegistryState::default()
                }
            }
            LoadOutcome::Corrupt(reason) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "registry file unusable, starting empty"
                );
                RegistryState {
                    next_serial: 1,
                    // Overwrite the bad file at the next save.
                    dirty: true,
                    ..RegistryState::default()
                }
            }
        };
        ResourceRegistry {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add a resource, or do nothing if its content is already registered.
    pub fn add_or_update(&self, resource: RegisteredResource) -> AddOutcome {
        let mut state = self.state();
        let entity = resource.entity_id().to_string();
        let digest = resource.digest().to_string();
        let mut serial = None;
        let outcome = {
            let RegistryState {
                entities,
                next_serial,
                ..
            } = &mut *state;
            entities.entry(entity.clone()).or_default().add_or_update(resource, || {
                let s = *next_serial;
                *next_serial += 1;
                serial = Some(s);
                s
            })
        };
        if outcome != AddOutcome::Unchanged {
            state.dirty = true;
        }
        debug!(entity = %entity, digest = %digest, serial = ?serial, outcome = ?outcome, "add_or_update");
        outcome
    }

    /// Retract the resource with `digest` from `entity_id`.
    pub fn remove(&self, entity_id: &str, digest: &str) -> Retraction {
        let mut state = self.state();
        let outcome = match state.entities.get_mut(entity_id) {
            Some(e) => e.retract(|r| r.digest() == digest),
            None => Retraction::NotFound,
        };
        if outcome != Retraction::NotFound {
            state.dirty = true;
            state.entities.retain(|_, e| !e.is_empty());
        }
        debug!(entity = %entity_id, digest = %digest, outcome = ?outcome, "remove");
        outcome
    }

    /// Retract every resource registered under `url`.
    pub fn retract_url(&self, url: &str) -> usize {
        self.state().retract_where(|r| r.url() == url)
    }

    /// Retract every resource registered by `scope`.
    pub fn retract_scope(&self, scope: &str) -> usize {
        self.state().retract_where(|r| r.scheme() == scope)
    }

    /// Retract resources of `scope` whose url is not in `keep`.
    pub fn retract_scope_except(&self, scope: &str, keep: &HashSet<String>) -> usize {
        self.state()
            .retract_where(|r| r.scheme() == scope && !keep.contains(r.url()))
    }

    /// Drop a resource after its removal task succeeded.
    pub fn drop_resource(&self, entity_id: &str, digest: &str) -> bool {
        let mut state = self.state();
        let dropped = state
            .entities
            .get_mut(entity_id)
            .map(|e| e.drop_retired(digest))
            .unwrap_or(false);
        if dropped {
            state.entities.retain(|_, e| !e.is_empty());
            state.dirty = true;
        }
        dropped
    }

    /// Stop generating tasks for `digest` of `entity_id`.
    pub fn mark_ignored(&self, entity_id: &str, digest: &str) {
        let mut state = self.state();
        if let Some(e) = state.entities.get_mut(entity_id) {
            if e.mark_ignored(digest) {
                state.dirty = true;
            }
        }
    }

    /// Record what the runtime reports as `(entity, digest)` pairs. Entities
    /// missing from `installed` are recorded as not installed.
    pub fn sync_installed<'a>(&self, installed: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut reported: HashMap<&str, &str> = HashMap::new();
        for (entity, digest) in installed {
            reported.entry(entity).or_insert(digest);
        }
        let mut state = self.state();
        let mut changed = false;
        for (entity, resources) in state.entities.iter_mut() {
            changed |= resources.set_installed(reported.get(entity.as_str()).copied());
        }
        if changed {
            state.dirty = true;
        }
    }

    /// Record the outcome of a task that installed or removed `entity_id`.
    pub fn record_installed(&self, entity_id: &str, digest: Option<&str>) {
        let mut state = self.state();
        let changed = state
            .entities
            .get_mut(entity_id)
            .map(|e| e.set_installed(digest))
            .unwrap_or(false);
        if changed {
            state.dirty = true;
        }
    }

    /// Drop shadowed removals and empty entities. Returns entries dropped.
    pub fn compact(&self) -> usize {
        let mut state = self.state();
        let dropped: usize = state.entities.values_mut().map(|e| e.compact()).sum();
        let before = state.entities.len();
        state.entities.retain(|_, e| !e.is_empty());
        let changed = dropped + (before - state.entities.len());
        if changed > 0 {
            state.dirty = true;
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All candidates for an entity, best first.
    pub fn get(&self, entity_id: &str) -> Vec<RegisteredResource> {
        self.state()
            .entities
            .get(entity_id)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn winner(&self, entity_id: &str) -> Option<RegisteredResource> {
        self.state()
            .entities
            .get(entity_id)
            .and_then(|e| e.winner().cloned())
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.state().entities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entities.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state().entities.clone()
    }

    /// Per-entity resource states, taken under the lock.
    pub fn installation_state(&self) -> InstallationState {
        InstallationState::from_entities(&self.state().entities)
    }

    /// Staging keys still referenced by module resources.
    pub fn live_digests(&self) -> HashSet<String> {
        self.state()
            .entities
            .values()
            .flat_map(|e| e.iter())
            .filter(|r| r.kind() == ResourceKind::Module)
            .map(|r| r.digest().to_string())
            .collect()
    }

    /// Scopes that currently have resources registered.
    pub fn scopes(&self) -> BTreeSet<String> {
        self.state()
            .entities
            .values()
            .flat_map(|e| e.iter())
            .map(|r| r.scheme().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the registry if it changed since the last save.
    /// Returns whether a write happened.
    pub fn save(&self) -> Result<bool> {
        let mut state = self.state();
        let path = match &self.path {
            Some(p) => p,
            None => {
                state.dirty = false;
                return Ok(false);
            }
        };
        if !state.dirty {
            return Ok(false);
        }
        let file = RegistryFile {
            format_version: FORMAT_VERSION,
            next_serial: state.next_serial,
            entities: state.entities.clone(),
        };
        store::save(path, &file)?;
        state.dirty = false;
        debug!(path = %path.display(), entities = file.entities.len(), "saved registry");
        Ok(true)
    }

    /// Serial the next stored resource will get.
    pub fn next_serial(&self) -> u64 {
        self.state().next_serial
    }
}
