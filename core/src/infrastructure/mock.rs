//! Mock runtime for testing.
//!
//! Records every call and keeps an in-memory view of what is installed,
//! with scriptable failures, making it easy to write deterministic tests for
//! the cycle runner and the installer facade.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{InstalledItem, ModuleHandle, ModuleMetadata, ModuleRuntime, RuntimeError};
use crate::types::resource::{RegisteredResource, ResourceKind};

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    InstallModule { entity: String, digest: String },
    UpdateModule { entity: String, digest: String },
    RemoveModule { entity: String },
    StartModule { entity: String, level: u32 },
    Refresh,
    InstallConfig { entity: String, digest: String },
    RemoveConfig { entity: String },
}

/// Operations a failure can be scripted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Install,
    Update,
    Remove,
    Start,
    Refresh,
    InstallConfig,
    RemoveConfig,
}

/// A test double that records calls and simulates an installed set.
pub struct MockRuntime {
    /// All calls made against this runtime, in order.
    pub calls: Vec<RuntimeCall>,
    /// Installed items by handle.
    pub installed: BTreeMap<ModuleHandle, InstalledItem>,
    /// Modules start as part of install when set.
    pub auto_start: bool,
    /// Returned by `query_installed` while set.
    pub query_failure: Option<RuntimeError>,
    next_handle: u64,
    failures: HashMap<(MockOp, String), VecDeque<RuntimeError>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        MockRuntime {
            calls: Vec::new(),
            installed: BTreeMap::new(),
            auto_start: false,
            query_failure: None,
            next_handle: 1,
            failures: HashMap::new(),
        }
    }

    /// Seed an item as if it had been installed before the installer ran.
    pub fn preinstall(&mut self, mut item: InstalledItem) -> ModuleHandle {
        let handle = self.allocate();
        item.handle = handle;
        self.installed.insert(handle, item);
        handle
    }

    /// Fail the next `times` calls of `op` on `target` with `error`.
    /// Refresh failures use the target `"*"`.
    pub fn fail(&mut self, op: MockOp, target: &str, error: RuntimeError, times: usize) {
        let queue = self.failures.entry((op, target.to_string())).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// The installed item for an entity, if any.
    pub fn item(&self, entity: &str) -> Option<&InstalledItem> {
        self.installed.values().find(|i| i.entity_id == entity)
    }

    fn allocate(&mut self) -> ModuleHandle {
        let h = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        h
    }

    fn scripted(&mut self, op: MockOp, target: &str) -> Result<(), RuntimeError> {
        match self.failures.get_mut(&(op, target.to_string())) {
            Some(queue) => match queue.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn entity_of(&self, handle: ModuleHandle) -> Result<String, RuntimeError> {
        self.installed
            .get(&handle)
            .map(|i| i.entity_id.clone())
            .ok_or_else(|| RuntimeError::fatal(format!("mock: unknown handle {}", handle)))
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRuntime for MockRuntime {
    fn install_module(
        &mut self,
        _bytes: &[u8],
        metadata: &ModuleMetadata,
    ) -> Result<ModuleHandle, RuntimeError> {
        self.calls.push(RuntimeCall::InstallModule {
            entity: metadata.entity_id.clone(),
            digest: metadata.digest.clone(),
        });
        self.scripted(MockOp::Install, &metadata.entity_id)?;
        let handle = self.allocate();
        self.installed.insert(
            handle,
            InstalledItem {
                entity_id: metadata.entity_id.clone(),
                kind: ResourceKind::Module,
                digest: metadata.digest.clone(),
                version: metadata.version.clone(),
                handle,
                active: self.auto_start,
                managed: true,
            },
        );
        Ok(handle)
    }

    fn update_module(
        &mut self,
        handle: ModuleHandle,
        _bytes: &[u8],
        metadata: &ModuleMetadata,
    ) -> Result<(), RuntimeError> {
        self.calls.push(RuntimeCall::UpdateModule {
            entity: metadata.entity_id.clone(),
            digest: metadata.digest.clone(),
        });
        self.scripted(MockOp::Update, &metadata.entity_id)?;
        let item = self
            .installed
            .get_mut(&handle)
            .ok_or_else(|| RuntimeError::fatal(format!("mock: unknown handle {}", handle)))?;
        item.digest = metadata.digest.clone();
        item.version = metadata.version.clone();
        item.managed = true;
        Ok(())
    }

    fn remove_module(&mut self, handle: ModuleHandle) -> Result<(), RuntimeError> {
        let entity = self.entity_of(handle)?;
        self.calls.push(RuntimeCall::RemoveModule {
            entity: entity.clone(),
        });
        self.scripted(MockOp::Remove, &entity)?;
        self.installed.remove(&handle);
        Ok(())
    }

    fn start_module(&mut self, handle: ModuleHandle, start_level: u32) -> Result<(), RuntimeError> {
        let entity = self.entity_of(handle)?;
        self.calls.push(RuntimeCall::StartModule {
            entity: entity.clone(),
            level: start_level,
        });
        self.scripted(MockOp::Start, &entity)?;
        if let Some(item) = self.installed.get_mut(&handle) {
            item.active = true;
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), RuntimeError> {
        self.calls.push(RuntimeCall::Refresh);
        self.scripted(MockOp::Refresh, "*")
    }

    fn install_config(
        &mut self,
        resource: &RegisteredResource,
    ) -> Result<ModuleHandle, RuntimeError> {
        let entity = resource.entity_id().to_string();
        self.calls.push(RuntimeCall::InstallConfig {
            entity: entity.clone(),
            digest: resource.digest().to_string(),
        });
        self.scripted(MockOp::InstallConfig, &entity)?;

        let existing = self
            .installed
            .iter()
            .find(|(_, i)| i.entity_id == entity)
            .map(|(h, _)| *h);
        let handle = match existing {
            Some(h) => h,
            None => self.allocate(),
        };
        self.installed.insert(
            handle,
            InstalledItem {
                entity_id: entity,
                kind: ResourceKind::Config,
                digest: resource.digest().to_string(),
                version: resource.version().clone(),
                handle,
                active: true,
                managed: true,
            },
        );
        Ok(handle)
    }

    fn remove_config(&mut self, handle: ModuleHandle) -> Result<(), RuntimeError> {
        let entity = self.entity_of(handle)?;
        self.calls.push(RuntimeCall::RemoveConfig {
            entity: entity.clone(),
        });
        self.scripted(MockOp::RemoveConfig, &entity)?;
        self.installed.remove(&handle);
        Ok(())
    }

    fn query_installed(&self) -> Result<Vec<InstalledItem>, RuntimeError> {
        if let Some(err) = &self.query_failure {
            return Err(err.clone());
        }
        Ok(self.installed.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::version::Version;

    fn metadata(entity: &str, digest: &str) -> ModuleMetadata {
        ModuleMetadata {
            entity_id: entity.into(),
            symbolic_name: entity.trim_start_matches("module:").into(),
            version: Version::new(1, 0, 0),
            digest: digest.into(),
            location: format!("test:{}", entity),
        }
    }

    #[test]
    fn records_calls_and_tracks_installed() {
        let mut mock = MockRuntime::new();
        let h = mock.install_module(b"x", &metadata("module:a", "d1")).unwrap();
        assert_eq!(mock.calls.len(), 1);
        assert_eq!(mock.item("module:a").unwrap().digest, "d1");
        assert!(!mock.item("module:a").unwrap().active);

        mock.start_module(h, 5).unwrap();
        assert!(mock.item("module:a").unwrap().active);

        mock.update_module(h, b"y", &metadata("module:a", "d2")).unwrap();
        assert_eq!(mock.item("module:a").unwrap().digest, "d2");

        mock.remove_module(h).unwrap();
        assert!(mock.item("module:a").is_none());
        assert_eq!(mock.calls.last(), Some(&RuntimeCall::RemoveModule { entity: "module:a".into() }));
    }

    #[test]
    fn scripted_failures_run_out() {
        let mut mock = MockRuntime::new();
        mock.fail(MockOp::Install, "module:a", RuntimeError::recoverable("busy"), 1);
        assert!(mock.install_module(b"x", &metadata("module:a", "d1")).is_err());
        assert!(mock.install_module(b"x", &metadata("module:a", "d1")).is_ok());
        assert_eq!(mock.calls.len(), 2);
    }

    #[test]
    fn unknown_handle_is_fatal() {
        let mut mock = MockRuntime::new();
        let err = mock.remove_module(ModuleHandle(42)).unwrap_err();
        assert_eq!(err.kind, super::super::FailureKind::Fatal);
    }

    #[test]
    fn query_failure_is_reported() {
        let mut mock = MockRuntime::new();
        mock.query_failure = Some(RuntimeError::recoverable("down"));
        assert!(mock.query_installed().is_err());
    }
}
