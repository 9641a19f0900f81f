use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Installer errors
// ---------------------------------------------------------------------------

/// Errors surfaced synchronously to callers of the installer core.
///
/// Task failures are not represented here: they are reported by the runtime
/// collaborator as `RuntimeError` and handled inside the cycle runner.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// Filesystem or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource kind could not be determined or is not supported.
    #[error("unsupported resource type for '{id}': {reason}")]
    UnsupportedType { id: String, reason: String },

    /// A module resource was supplied without its descriptor.
    #[error("module resource '{0}' has no descriptor (symbolic name and version)")]
    MissingDescriptor(String),

    /// A provider-supplied digest is empty or not usable as a staging key.
    #[error("invalid digest '{0}'")]
    InvalidDigest(String),

    /// A version string could not be parsed.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// A configuration payload could not be parsed.
    #[error("malformed config payload '{id}': {reason}")]
    MalformedConfig { id: String, reason: String },

    /// A provider scope is empty or contains a colon.
    #[error("invalid provider scope '{0}'")]
    InvalidScope(String),

    /// Settings could not be read, parsed or written.
    #[error("settings error: {0}")]
    Settings(String),

    /// The state directory lock could not be acquired.
    #[error("cannot lock state directory {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    /// The persisted registry could not be written.
    #[error("persistence error: {0}")]
    Persist(String),

    /// The background cycle service could not be started or stopped.
    #[error("installer service error: {0}")]
    Service(String),
}

pub type Result<T> = std::result::Result<T, InstallerError>;
