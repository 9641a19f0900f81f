//! The installer facade.
//!
//! `Installer` wires a state directory to a runtime: it bootstraps and locks
//! the directory, restores the registry, and owns the cycle runner.
//! Providers register resources through a `ProviderHandle`, which may be
//! cloned into any thread; every registration that changes the registry
//! wakes the background service, if one is running.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::bootstrap::ensure_state_dir;
use crate::convergence::{CycleReport, CycleRunner};
use crate::data::{InstallerSettings, StateDir};
use crate::error::Result;
use crate::infrastructure::ModuleRuntime;
use crate::lock::StateLock;
use crate::registry::{AddOutcome, InstallationState, ResourceRegistry, Retraction};
use crate::resource::{build, validate_scope, InstallableResource, StagingArea};
use crate::service::ServiceEvent;
use crate::types::resource::RegisteredResource;

// ---------------------------------------------------------------------------
// Registrar
// ---------------------------------------------------------------------------

/// Counts from a batch registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeUpdate {
    /// New or changed resources.
    pub changed: usize,
    /// Resources that were already registered with the same content.
    pub unchanged: usize,
    /// Resources retracted by the batch.
    pub retracted: usize,
}

impl ScopeUpdate {
    pub fn is_noop(&self) -> bool {
        self.changed == 0 && self.retracted == 0
    }
}

/// Registration entry point shared by all providers.
#[derive(Clone)]
pub struct Registrar {
    registry: Arc<ResourceRegistry>,
    staging: Arc<StagingArea>,
    notify: Option<mpsc::Sender<ServiceEvent>>,
}

impl Registrar {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        staging: Arc<StagingArea>,
        notify: Option<mpsc::Sender<ServiceEvent>>,
    ) -> Self {
        Registrar {
            registry,
            staging,
            notify,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    fn wake(&self) {
        if let Some(tx) = &self.notify {
            // No receiver means no service to wake.
            let _ = tx.send(ServiceEvent::Wake);
        }
    }

    fn build_all(
        &self,
        scope: &str,
        inputs: Vec<InstallableResource>,
    ) -> Result<Vec<RegisteredResource>> {
        let mut built = Vec::with_capacity(inputs.len());
        for input in inputs {
            match build(scope, input, &self.staging) {
                Ok(r) => built.push(r),
                Err(e) => {
                    for r in &built {
                        self.staging.release(r.digest());
                    }
                    return Err(e);
                }
            }
        }
        Ok(built)
    }

    fn add(&self, resource: RegisteredResource, update: &mut ScopeUpdate) {
        let digest = resource.digest().to_string();
        let url = resource.url().to_string();
        let outcome = self.registry.add_or_update(resource);
        self.staging.release(&digest);
        match outcome {
            AddOutcome::Unchanged => update.unchanged += 1,
            AddOutcome::Superseded { previous_digest } => {
                debug!(url = %url, previous = %previous_digest, digest = %digest, "resource superseded");
                update.changed += 1;
            }
            AddOutcome::Added | AddOutcome::Revived => update.changed += 1,
        }
    }

    /// Register one resource under `scope`.
    ///
    /// Construction failures (unreadable stream, unknown type, bad payload)
    /// are returned here; installation happens on a later cycle.
    pub fn register(&self, scope: &str, input: InstallableResource) -> Result<AddOutcome> {
        let resource = build(scope, input, &self.staging)?;
        let digest = resource.digest().to_string();
        let outcome = self.registry.add_or_update(resource);
        self.staging.release(&digest);
        if outcome != AddOutcome::Unchanged {
            self.wake();
        }
        Ok(outcome)
    }

    /// Replace everything `scope` registered with `inputs`.
    ///
    /// Nothing is registered unless every input builds.
    pub fn register_scope(&self, scope: &str, inputs: Vec<InstallableResource>) -> Result<ScopeUpdate> {
        validate_scope(scope)?;
        let built = self.build_all(scope, inputs)?;
        let keep: HashSet<String> = built.iter().map(|r| r.url().to_string()).collect();

        let mut update = ScopeUpdate::default();
        for resource in built {
            self.add(resource, &mut update);
        }
        update.retracted = self.registry.retract_scope_except(scope, &keep);
        info!(scope, changed = update.changed, retracted = update.retracted, "scope registered");
        if !update.is_noop() {
            self.wake();
        }
        Ok(update)
    }

    /// Add `added` to `scope` and retract the resources registered under
    /// the provider-local ids in `removed`.
    pub fn update_scope(
        &self,
        scope: &str,
        added: Vec<InstallableResource>,
        removed: &[&str],
    ) -> Result<ScopeUpdate> {
        validate_scope(scope)?;
        let built = self.build_all(scope, added)?;

        let mut update = ScopeUpdate::default();
        for id in removed {
            update.retracted += self.registry.retract_url(&format!("{}:{}", scope, id));
        }
        for resource in built {
            self.add(resource, &mut update);
        }
        debug!(scope, changed = update.changed, retracted = update.retracted, "scope updated");
        if !update.is_noop() {
            self.wake();
        }
        Ok(update)
    }

    /// Retract the resource of `entity_id` with `digest`.
    pub fn unregister(&self, entity_id: &str, digest: &str) -> Retraction {
        let outcome = self.registry.remove(entity_id, digest);
        if outcome != Retraction::NotFound {
            self.wake();
        }
        outcome
    }

    /// Retract everything `scope` registered.
    pub fn retract_scope(&self, scope: &str) -> usize {
        let n = self.registry.retract_scope(scope);
        if n > 0 {
            info!(scope, retracted = n, "scope retracted");
            self.wake();
        }
        n
    }
}

// ---------------------------------------------------------------------------
// ProviderHandle
// ---------------------------------------------------------------------------

/// A registration handle bound to one provider scope.
#[derive(Clone)]
pub struct ProviderHandle {
    scope: String,
    registrar: Registrar,
}

impl ProviderHandle {
    pub fn new(scope: &str, registrar: Registrar) -> Result<Self> {
        validate_scope(scope)?;
        Ok(ProviderHandle {
            scope: scope.to_string(),
            registrar,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn register(&self, input: InstallableResource) -> Result<AddOutcome> {
        self.registrar.register(&self.scope, input)
    }

    /// Full snapshot of this provider's resources.
    pub fn register_all(&self, inputs: Vec<InstallableResource>) -> Result<ScopeUpdate> {
        self.registrar.register_scope(&self.scope, inputs)
    }

    pub fn update(&self, added: Vec<InstallableResource>, removed: &[&str]) -> Result<ScopeUpdate> {
        self.registrar.update_scope(&self.scope, added, removed)
    }

    pub fn unregister(&self, entity_id: &str, digest: &str) -> Retraction {
        self.registrar.unregister(entity_id, digest)
    }

    /// Retract everything this provider registered, as on disconnect.
    pub fn retract(&self) -> usize {
        self.registrar.retract_scope(&self.scope)
    }
}

// ---------------------------------------------------------------------------
// Installer
// ---------------------------------------------------------------------------

pub struct Installer<R: ModuleRuntime> {
    state_dir: StateDir,
    _lock: StateLock,
    registrar: Registrar,
    runner: CycleRunner<R>,
    pub(crate) events: mpsc::Receiver<ServiceEvent>,
    pub(crate) sender: mpsc::Sender<ServiceEvent>,
}

impl<R: ModuleRuntime> Installer<R> {
    /// Bootstrap, lock and load the state directory at `dir`.
    pub fn open(dir: &Path, runtime: R) -> Result<Self> {
        ensure_state_dir(dir)?;
        let state_dir = StateDir::open(dir)?;
        let settings = state_dir.settings().clone();
        settings.validate()?;

        let lock = StateLock::acquire(
            &state_dir.lock_path(),
            Duration::from_millis(settings.lock_timeout_ms),
        )?;
        let staging = Arc::new(StagingArea::open(&state_dir.staging_dir())?);
        let registry = Arc::new(ResourceRegistry::open(&state_dir.registry_path()));

        let (sender, events) = mpsc::channel();
        let registrar = Registrar::new(Arc::clone(&registry), Arc::clone(&staging), Some(sender.clone()));
        let runner = CycleRunner::new(registry, staging, runtime, &settings);

        info!(dir = %dir.display(), "installer opened");
        Ok(Installer {
            state_dir,
            _lock: lock,
            registrar,
            runner,
            events,
            sender,
        })
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    pub fn settings(&self) -> &InstallerSettings {
        self.state_dir.settings()
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        self.runner.registry()
    }

    pub fn registrar(&self) -> Registrar {
        self.registrar.clone()
    }

    /// A registration handle for provider `scope`.
    pub fn provider(&self, scope: &str) -> Result<ProviderHandle> {
        ProviderHandle::new(scope, self.registrar.clone())
    }

    pub fn runner(&self) -> &CycleRunner<R> {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut CycleRunner<R> {
        &mut self.runner
    }

    pub fn runtime(&self) -> &R {
        self.runner.runtime()
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        self.runner.runtime_mut()
    }

    /// Run one cycle in the calling thread.
    pub fn run_cycle(&mut self) -> CycleReport {
        // Wake-ups are for the service loop; a direct cycle covers them.
        while self.events.try_recv().is_ok() {}
        self.runner.run_cycle()
    }

    /// Run cycles until nothing is queued, at most `max_cycles`.
    pub fn run_until_settled(&mut self, max_cycles: usize) -> Vec<CycleReport> {
        while self.events.try_recv().is_ok() {}
        self.runner.run_until_settled(max_cycles)
    }

    /// Which entities are installed and which still wait for a cycle.
    pub fn installation_state(&self) -> InstallationState {
        self.registry().installation_state()
    }

    /// Persist the registry now.
    pub fn save(&self) -> Result<bool> {
        self.registry().save()
    }
}

impl<R: ModuleRuntime> Drop for Installer<R> {
    fn drop(&mut self) {
        if let Err(e) = self.registry().save() {
            tracing::error!(error = %e, "failed to persist registry on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::CycleStatus;
    use crate::error::InstallerError;
    use crate::infrastructure::mock::MockRuntime;
    use crate::registry::ResourceState;
    use crate::resource::ModuleDescriptor;
    use crate::types::resource::PropertyMap;
    use crate::types::task::TaskCategory;
    use crate::types::version::Version;

    fn jar(id: &str, version: &str, bytes: &'static [u8]) -> InstallableResource {
        InstallableResource::module(
            id,
            bytes,
            ModuleDescriptor::new("org.a", Version::parse(version).unwrap()),
        )
    }

    fn open(dir: &Path) -> Installer<MockRuntime> {
        let mut runtime = MockRuntime::new();
        runtime.auto_start = true;
        Installer::open(dir, runtime).unwrap()
    }

    fn categories(report: &CycleReport) -> Vec<TaskCategory> {
        report.executed.iter().map(|e| e.task.category).collect()
    }

    #[test]
    fn open_bootstraps_the_state_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        let installer = open(&dir);
        assert!(dir.join("settings.yaml").is_file());
        assert!(installer.state_dir().staging_dir().is_dir());
        assert!(installer.registry().is_empty());
    }

    #[test]
    fn second_open_of_same_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("settings.yaml"), "lock_timeout_ms: 50\n").unwrap();
        let _first = open(tmp.path());
        let err = Installer::open(tmp.path(), MockRuntime::new()).err().unwrap();
        assert!(matches!(err, InstallerError::Lock { .. }));
    }

    #[test]
    fn same_content_twice_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = open(tmp.path());
        let p = installer.provider("files").unwrap();
        assert_eq!(p.register(jar("a.jar", "1.0.0", b"v1")).unwrap(), AddOutcome::Added);
        let serial = installer.registry().winner("module:org.a").unwrap().serial();
        assert_eq!(p.register(jar("a.jar", "1.0.0", b"v1")).unwrap(), AddOutcome::Unchanged);
        let all = installer.registry().get("module:org.a");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].serial(), serial);
    }

    #[test]
    fn registration_errors_reach_the_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = open(tmp.path());
        let p = installer.provider("files").unwrap();
        let err = p
            .register(InstallableResource::stream("notes.txt", &b"hello"[..]))
            .unwrap_err();
        assert!(matches!(err, InstallerError::UnsupportedType { .. }));
        assert!(installer.provider("bad:scope").is_err());
        assert!(installer.registry().is_empty());
    }

    #[test]
    fn scope_snapshot_retracts_missing_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let mut installer = open(tmp.path());
        let p = installer.provider("files").unwrap();
        let mut props = PropertyMap::new();
        props.insert("port".into(), 8080i64.into());

        let update = p
            .register_all(vec![
                jar("a.jar", "1.0.0", b"v1"),
                InstallableResource::properties("org.web.cfg", props),
            ])
            .unwrap();
        assert_eq!(update.changed, 2);
        let report = installer.run_cycle();
        assert_eq!(
            categories(&report),
            vec![TaskCategory::ConfigInstall, TaskCategory::ModuleInstall]
        );

        let update = p.register_all(vec![jar("a.jar", "1.0.0", b"v1")]).unwrap();
        assert_eq!(update.unchanged, 1);
        assert_eq!(update.retracted, 1);
        let report = installer.run_cycle();
        assert_eq!(categories(&report), vec![TaskCategory::ConfigRemove]);
        assert!(installer.registry().get("config:org.web").is_empty());
    }

    #[test]
    fn failed_batch_registers_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = open(tmp.path());
        let p = installer.provider("files").unwrap();
        let err = p.register_all(vec![
            jar("a.jar", "1.0.0", b"v1"),
            InstallableResource::stream("broken.zip", &b"?"[..]),
        ]);
        assert!(err.is_err());
        assert!(installer.registry().is_empty());
    }

    #[test]
    fn incremental_update_and_provider_disconnect() {
        let tmp = tempfile::tempdir().unwrap();
        let mut installer = open(tmp.path());
        let files = installer.provider("files").unwrap();
        let remote = installer.provider("remote").unwrap();

        files.update(vec![jar("a.jar", "1.0.0", b"v1")], &[]).unwrap();
        let mut other = jar("b.jar", "1.0.0", b"b1");
        if let Some(d) = other.descriptor.as_mut() {
            d.symbolic_name = "org.b".into();
        }
        remote.register(other).unwrap();
        installer.run_until_settled(5);
        assert!(installer.runtime().item("module:org.a").is_some());
        assert!(installer.runtime().item("module:org.b").is_some());

        let update = files.update(vec![], &["a.jar"]).unwrap();
        assert_eq!(update.retracted, 1);
        assert_eq!(remote.retract(), 1);
        installer.run_until_settled(5);
        assert!(installer.runtime().installed.is_empty());
        assert!(installer.registry().is_empty());
    }

    #[test]
    fn higher_version_from_another_provider_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mut installer = open(tmp.path());
        installer
            .provider("files")
            .unwrap()
            .register(jar("a.jar", "1.0.0", b"v1"))
            .unwrap();
        installer.run_cycle();

        let newer = installer
            .provider("remote")
            .unwrap()
            .register(jar("a-1.1.jar", "1.1.0", b"v11"))
            .unwrap();
        assert_eq!(newer, AddOutcome::Added);
        let report = installer.run_cycle();
        assert_eq!(report.descriptions()[0], "module-update module:org.a");

        // The older candidate takes over when the newer one goes away.
        installer.provider("remote").unwrap().retract();
        let reports = installer.run_until_settled(5);
        let tasks: Vec<String> = reports.iter().flat_map(|r| r.descriptions()).collect();
        assert!(tasks.contains(&"module-remove module:org.a".to_string()));
        assert!(tasks.contains(&"module-install module:org.a".to_string()));
        assert_eq!(installer.registry().get("module:org.a").len(), 1);
    }

    #[test]
    fn installation_state_follows_convergence() {
        let tmp = tempfile::tempdir().unwrap();
        let mut installer = open(tmp.path());
        let p = installer.provider("files").unwrap();
        p.register(jar("a.jar", "1.0.0", b"v1")).unwrap();

        let state = installer.installation_state();
        assert_eq!(state.active.len(), 1);
        assert_eq!(state.active[0].state(), Some(ResourceState::Install));

        installer.run_cycle();
        let state = installer.installation_state();
        assert!(state.is_settled());
        assert_eq!(state.installed[0].state(), Some(ResourceState::Installed));

        let digest = installer.registry().winner("module:org.a").unwrap().digest().to_string();
        p.unregister("module:org.a", &digest);
        assert_eq!(
            installer.installation_state().active[0].state(),
            Some(ResourceState::Uninstall)
        );
        installer.run_until_settled(5);
        let state = installer.installation_state();
        assert!(state.active.is_empty() && state.installed.is_empty());
    }

    #[test]
    fn providers_register_concurrently() {
        let tmp = tempfile::tempdir().unwrap();
        let mut installer = open(tmp.path());
        let handles: Vec<ProviderHandle> = (0..4)
            .map(|n| installer.provider(&format!("p{}", n)).unwrap())
            .collect();

        std::thread::scope(|s| {
            for (n, handle) in handles.iter().enumerate() {
                let handle = handle.clone();
                s.spawn(move || {
                    for e in 0..6 {
                        let bytes = format!("p{}-e{}", n, e).into_bytes();
                        let input = InstallableResource::module(
                            &format!("e{}.jar", e),
                            std::io::Cursor::new(bytes),
                            ModuleDescriptor::new(
                                &format!("org.e{}", e % 3),
                                Version::new(1, n as u64, e),
                            ),
                        );
                        handle.register(input).unwrap();
                        // Identical bytes from every provider.
                        handle.register(jar("shared.jar", "1.0.0", b"shared")).unwrap();
                    }
                });
            }
        });

        let registry = installer.registry();
        let shared = registry.get("module:org.a");
        assert_eq!(shared.len(), 1);
        let mut serials: Vec<u64> = shared.iter().map(|r| r.serial()).collect();
        for e in 0..3 {
            let entity = format!("module:org.e{}", e);
            let all = registry.get(&entity);
            assert_eq!(all.len(), 8);
            let digests: HashSet<&str> = all.iter().map(|r| r.digest()).collect();
            assert_eq!(digests.len(), 8);
            let winner = registry.winner(&entity).unwrap();
            assert_eq!(winner.version(), &Version::new(1, 3, 3 + e));
            assert_eq!(winner.scheme(), "p3");
            serials.extend(all.iter().map(|r| r.serial()));
        }
        serials.sort_unstable();
        assert_eq!(serials, (1..=25).collect::<Vec<u64>>());

        // Every winner installs from its staged content.
        let report = installer.run_until_settled(5);
        assert_eq!(report[0].executed.len(), 4);
        for e in 0..3 {
            let winner = installer.registry().winner(&format!("module:org.e{}", e)).unwrap();
            assert_eq!(
                installer.runtime().item(winner.entity_id()).unwrap().digest,
                winner.digest()
            );
        }
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut installer = open(tmp.path());
            installer
                .provider("files")
                .unwrap()
                .register(jar("a.jar", "1.0.0", b"v1"))
                .unwrap();
            assert_eq!(installer.run_cycle().status, CycleStatus::Success);
        }
        let installer = open(tmp.path());
        let winner = installer.registry().winner("module:org.a").unwrap();
        assert_eq!(winner.url(), "files:a.jar");
        assert!(installer.state_dir().staging_dir().join(winner.digest()).is_file());
        assert!(installer.runtime().calls.is_empty());
    }
}
