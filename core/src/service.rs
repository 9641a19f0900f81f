//! Background cycle service.
//!
//! Runs cycles on a dedicated thread. The thread sleeps on the installer's
//! event channel: a registration wakes it at once, otherwise it polls the
//! runtime every `idle_poll_ms`. While work is queued it keeps cycling,
//! backing off between cycles that only retried failed tasks. A stop
//! request takes effect between cycles; a running task always finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use crate::convergence::CycleStatus;
use crate::error::{InstallerError, Result};
use crate::infrastructure::ModuleRuntime;
use crate::installer::Installer;

/// Events delivered to the service thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// The registry changed; run a cycle soon.
    Wake,
    /// Leave the loop after the current cycle.
    Shutdown,
}

/// Cloneable handle for poking a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    sender: mpsc::Sender<ServiceEvent>,
}

impl ServiceHandle {
    /// Ask for a cycle, as a registration would.
    pub fn wake(&self) -> Result<()> {
        self.sender
            .send(ServiceEvent::Wake)
            .map_err(|e| InstallerError::Service(format!("channel send failed: {}", e)))
    }
}

pub struct InstallerService<R: ModuleRuntime + 'static> {
    handle: ServiceHandle,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Installer<R>>>,
}

impl<R: ModuleRuntime + 'static> InstallerService<R> {
    /// Move `installer` onto a new thread and start cycling.
    pub fn start(installer: Installer<R>) -> Result<Self> {
        let handle = ServiceHandle {
            sender: installer.sender.clone(),
        };
        let stop = installer.runner().stop_flag();
        let thread = std::thread::Builder::new()
            .name("modinstall-cycles".into())
            .spawn(move || service_loop(installer))
            .map_err(|e| InstallerError::Service(format!("cannot spawn cycle thread: {}", e)))?;
        info!("installer service started");
        Ok(InstallerService {
            handle,
            stop,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Stop between cycles, join the thread and hand the installer back.
    pub fn shutdown(mut self) -> Result<Installer<R>> {
        self.stop.store(true, Ordering::SeqCst);
        // The loop may already be gone; joining tells.
        let _ = self.handle.sender.send(ServiceEvent::Shutdown);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| InstallerError::Service("service already stopped".into()))?;
        let installer = thread
            .join()
            .map_err(|_| InstallerError::Service("cycle thread panicked".into()))?;
        self.stop.store(false, Ordering::SeqCst);
        info!("installer service stopped");
        Ok(installer)
    }
}

impl<R: ModuleRuntime + 'static> Drop for InstallerService<R> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.store(true, Ordering::SeqCst);
            let _ = self.handle.sender.send(ServiceEvent::Shutdown);
            let _ = thread.join();
        }
    }
}

/// Drain queued events. Returns true if shutdown was requested.
fn drain_channel(events: &mpsc::Receiver<ServiceEvent>) -> bool {
    loop {
        match events.try_recv() {
            Ok(ServiceEvent::Wake) => {}
            Ok(ServiceEvent::Shutdown) => return true,
            Err(mpsc::TryRecvError::Empty) => return false,
            // The installer holds a sender itself, so this is unreachable
            // while the loop runs; treat it as shutdown regardless.
            Err(mpsc::TryRecvError::Disconnected) => return true,
        }
    }
}

fn service_loop<R: ModuleRuntime>(mut installer: Installer<R>) -> Installer<R> {
    let policy = installer.settings().retry_policy();
    let idle = installer.settings().idle_poll();
    let mut wait = Duration::ZERO;
    let mut retry_streak: u32 = 0;

    loop {
        match installer.events.recv_timeout(wait) {
            Ok(ServiceEvent::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(ServiceEvent::Wake) | Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if drain_channel(&installer.events) {
            break;
        }

        let report = installer.runner_mut().run_cycle();
        if report.status == CycleStatus::Stopped {
            break;
        }

        wait = if report.only_retries() {
            let delay = policy.delay_ms(retry_streak);
            retry_streak = retry_streak.saturating_add(1);
            debug!(cycle = report.cycle, delay_ms = delay, "only retries left, backing off");
            Duration::from_millis(delay)
        } else {
            retry_streak = 0;
            if report.has_pending() {
                Duration::ZERO
            } else {
                idle
            }
        };
    }
    installer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockOp, MockRuntime};
    use crate::infrastructure::RuntimeError;
    use crate::resource::{InstallableResource, ModuleDescriptor};
    use crate::types::version::Version;
    use std::path::Path;
    use std::time::Instant;

    fn open(dir: &Path, runtime: MockRuntime) -> Installer<MockRuntime> {
        std::fs::write(
            dir.join("settings.yaml"),
            "idle_poll_ms: 20\nretry_delay_ms: 10\nretry_backoff: exponential\nmax_retry_delay_ms: 40\n",
        )
        .unwrap();
        Installer::open(dir, runtime).unwrap()
    }

    fn jar(bytes: &'static [u8]) -> InstallableResource {
        InstallableResource::module(
            "a.jar",
            bytes,
            ModuleDescriptor::new("org.a", Version::new(1, 0, 0)),
        )
    }

    /// Poll until `done` holds for the registry or the deadline passes.
    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn registration_is_installed_in_the_background() {
        let tmp = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.auto_start = true;
        let installer = open(tmp.path(), runtime);
        let provider = installer.provider("files").unwrap();
        let registry = std::sync::Arc::clone(installer.registry());
        let service = InstallerService::start(installer).unwrap();

        provider.register(jar(b"v1")).unwrap();
        // The cycle persists the registry once the install ran.
        let path = tmp.path().join("registry.json");
        assert!(wait_for(Duration::from_secs(5), || path.is_file()));
        assert_eq!(registry.get("module:org.a").len(), 1);
        // The wake-up may still be queued if an idle cycle persisted first.
        std::thread::sleep(Duration::from_millis(100));

        let installer = service.shutdown().unwrap();
        assert!(installer.runtime().item("module:org.a").is_some());
    }

    #[test]
    fn retries_continue_until_the_runtime_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.auto_start = true;
        runtime.fail(
            MockOp::Install,
            "module:org.a",
            RuntimeError::recoverable("dependency missing"),
            3,
        );
        let installer = open(tmp.path(), runtime);
        installer.provider("files").unwrap().register(jar(b"v1")).unwrap();
        let service = InstallerService::start(installer).unwrap();

        std::thread::sleep(Duration::from_millis(400));
        let installer = service.shutdown().unwrap();
        assert!(installer.runtime().item("module:org.a").is_some());
        assert!(installer.runner().pending().is_empty());
    }

    #[test]
    fn shutdown_returns_a_usable_installer() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = open(tmp.path(), MockRuntime::new());
        let service = InstallerService::start(installer).unwrap();
        service.handle().wake().unwrap();

        let mut installer = service.shutdown().unwrap();
        installer.provider("files").unwrap().register(jar(b"v1")).unwrap();
        assert_eq!(installer.run_cycle().status, CycleStatus::Success);
    }

    #[test]
    fn drain_reports_shutdown() {
        let (tx, rx) = mpsc::channel();
        tx.send(ServiceEvent::Wake).unwrap();
        assert!(!drain_channel(&rx));
        tx.send(ServiceEvent::Wake).unwrap();
        tx.send(ServiceEvent::Shutdown).unwrap();
        assert!(drain_channel(&rx));
        drop(tx);
        assert!(drain_channel(&rx));
    }
}
