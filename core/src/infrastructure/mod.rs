//! The runtime container the installer drives.
//!
//! Provides the `ModuleRuntime` trait and a mock implementation for testing.
//! The installer only ever talks to the runtime through this trait; loading
//! modules, resolving their dependencies and applying configs is the
//! runtime's business.

pub mod mock;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::resource::{RegisteredResource, ResourceKind};
use crate::types::version::Version;

/// Opaque runtime handle of an installed module or config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleHandle(pub u64);

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One item the runtime reports as installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledItem {
    pub entity_id: String,
    pub kind: ResourceKind,
    pub digest: String,
    pub version: Version,
    pub handle: ModuleHandle,
    /// Started (modules) or applied (configs).
    pub active: bool,
    /// Installed by this installer, as opposed to by hand or at boot.
    pub managed: bool,
}

/// Metadata passed along with module bytes on install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub entity_id: String,
    pub symbolic_name: String,
    pub version: Version,
    pub digest: String,
    pub location: String,
}

impl ModuleMetadata {
    /// Metadata for a module resource; `None` for configs.
    pub fn for_resource(resource: &RegisteredResource) -> Option<Self> {
        match resource.payload() {
            crate::types::resource::ResourcePayload::Module { symbolic_name, .. } => {
                Some(ModuleMetadata {
                    entity_id: resource.entity_id().to_string(),
                    symbolic_name: symbolic_name.clone(),
                    version: resource.version().clone(),
                    digest: resource.digest().to_string(),
                    location: resource.url().to_string(),
                })
            }
            crate::types::resource::ResourcePayload::Config { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Whether retrying a failed operation can ever succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retry next cycle; the environment may change.
    Recoverable,
    /// Malformed or unsatisfiable; never retried.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} runtime failure: {message}")]
pub struct RuntimeError {
    pub kind: FailureKind,
    pub message: String,
}

impl RuntimeError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: FailureKind::Recoverable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ModuleRuntime
// ---------------------------------------------------------------------------

/// Operations the installer needs from the runtime container.
///
/// Every call may block; the cycle runner calls them one at a time.
pub trait ModuleRuntime: Send {
    fn install_module(
        &mut self,
        bytes: &[u8],
        metadata: &ModuleMetadata,
    ) -> Result<ModuleHandle, RuntimeError>;

    /// Replace the content of an installed module in place.
    fn update_module(
        &mut self,
        handle: ModuleHandle,
        bytes: &[u8],
        metadata: &ModuleMetadata,
    ) -> Result<(), RuntimeError>;

    fn remove_module(&mut self, handle: ModuleHandle) -> Result<(), RuntimeError>;

    fn start_module(&mut self, handle: ModuleHandle, start_level: u32) -> Result<(), RuntimeError>;

    /// Re-resolve modules depending on changed ones. Returns once done.
    fn refresh(&mut self) -> Result<(), RuntimeError>;

    /// Create or overwrite the configuration carried by `resource`.
    fn install_config(&mut self, resource: &RegisteredResource)
        -> Result<ModuleHandle, RuntimeError>;

    fn remove_config(&mut self, handle: ModuleHandle) -> Result<(), RuntimeError>;

    /// Everything currently installed, modules and configs.
    fn query_installed(&self) -> Result<Vec<InstalledItem>, RuntimeError>;
}
