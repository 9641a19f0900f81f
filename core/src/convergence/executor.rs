//! Task executor: applies one task to the runtime and classifies the result.

use tracing::{debug, warn};

use crate::convergence::retry::RetryLedger;
use crate::infrastructure::{FailureKind, ModuleMetadata, ModuleRuntime, RuntimeError};
use crate::registry::ResourceRegistry;
use crate::resource::StagingArea;
use crate::types::resource::RegisteredResource;
use crate::types::task::{Task, TaskCategory};

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed,
    /// Done; the contained task must run in the next cycle.
    CompletedWithFollowup(Task),
    Failed(RuntimeError),
}

impl TaskOutcome {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TaskOutcome::Failed(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Executes tasks against a `ModuleRuntime`, keeping per-task failure
/// counts across cycles.
pub struct TaskExecutor {
    refresh_after_update: bool,
    ledger: RetryLedger,
}

impl TaskExecutor {
    pub fn new(refresh_after_update: bool) -> Self {
        TaskExecutor {
            refresh_after_update,
            ledger: RetryLedger::new(),
        }
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut RetryLedger {
        &mut self.ledger
    }

    /// Run `task`. Successful removals drop the retired resource from
    /// `registry`; module bytes are read from `staging`.
    pub fn execute(
        &mut self,
        task: &Task,
        cycle: u64,
        runtime: &mut dyn ModuleRuntime,
        registry: &ResourceRegistry,
        staging: &StagingArea,
    ) -> TaskOutcome {
        let outcome = match self.apply(task, runtime, registry, staging) {
            Ok(Some(followup)) => TaskOutcome::CompletedWithFollowup(followup),
            Ok(None) => TaskOutcome::Completed,
            Err(e) => TaskOutcome::Failed(e),
        };

        let key = task.key();
        match &outcome {
            TaskOutcome::Failed(e) => {
                let attempts = self.ledger.record_failure(&key, cycle);
                let since = self.ledger.failing_since(&key).unwrap_or(cycle);
                warn!(
                    task = %task,
                    cycle,
                    attempts,
                    failing_since = since,
                    kind = ?e.kind,
                    error = %e.message,
                    "task failed"
                );
            }
            _ => {
                self.ledger.record_success(&key);
                debug!(task = %task, cycle, "task completed");
            }
        }
        outcome
    }

    fn apply(
        &self,
        task: &Task,
        runtime: &mut dyn ModuleRuntime,
        registry: &ResourceRegistry,
        staging: &StagingArea,
    ) -> Result<Option<Task>, RuntimeError> {
        match task.category {
            TaskCategory::ConfigRemove => {
                runtime.remove_config(handle_of(task)?)?;
                retire(task, registry);
                Ok(None)
            }
            TaskCategory::ConfigInstall => {
                let resource = resource_of(task)?;
                runtime.install_config(resource)?;
                registry.record_installed(resource.entity_id(), Some(resource.digest()));
                Ok(None)
            }
            TaskCategory::ModuleRemove => {
                runtime.remove_module(handle_of(task)?)?;
                retire(task, registry);
                Ok(Some(Task::refresh()))
            }
            TaskCategory::ModuleUpdate => {
                let resource = resource_of(task)?;
                let (bytes, metadata) = module_content(resource, staging)?;
                runtime.update_module(handle_of(task)?, &bytes, &metadata)?;
                registry.record_installed(resource.entity_id(), Some(resource.digest()));
                Ok(self.refresh_after_update.then(Task::refresh))
            }
            TaskCategory::ModuleInstall => {
                let resource = resource_of(task)?;
                let (bytes, metadata) = module_content(resource, staging)?;
                let handle = runtime.install_module(&bytes, &metadata)?;
                registry.record_installed(resource.entity_id(), Some(resource.digest()));
                debug!(entity = %resource.entity_id(), handle = %handle, "module installed");
                Ok(None)
            }
            TaskCategory::Refresh => {
                runtime.refresh()?;
                Ok(None)
            }
            TaskCategory::ModuleStart => {
                runtime.start_module(handle_of(task)?, task.start_level)?;
                Ok(None)
            }
        }
    }
}

fn handle_of(task: &Task) -> Result<crate::infrastructure::ModuleHandle, RuntimeError> {
    task.handle
        .ok_or_else(|| RuntimeError::fatal(format!("{} has no runtime handle", task)))
}

fn resource_of(task: &Task) -> Result<&RegisteredResource, RuntimeError> {
    task.resource
        .as_ref()
        .ok_or_else(|| RuntimeError::fatal(format!("{} has no resource", task)))
}

fn module_content(
    resource: &RegisteredResource,
    staging: &StagingArea,
) -> Result<(Vec<u8>, ModuleMetadata), RuntimeError> {
    let metadata = ModuleMetadata::for_resource(resource)
        .ok_or_else(|| RuntimeError::fatal(format!("{} is not a module", resource.url())))?;
    if !staging.contains(resource.digest()) {
        return Err(RuntimeError::fatal(format!(
            "content {} of {} is missing from staging",
            resource.digest(),
            resource.url()
        )));
    }
    let bytes = staging
        .read(resource.digest())
        .map_err(|e| RuntimeError::recoverable(format!("cannot read staged content: {}", e)))?;
    Ok((bytes, metadata))
}

/// Drop the resource a successful removal retired.
fn retire(task: &Task, registry: &ResourceRegistry) {
    registry.record_installed(&task.target, None);
    if let Some(r) = &task.resource {
        registry.drop_resource(r.entity_id(), r.digest());
    }
}
