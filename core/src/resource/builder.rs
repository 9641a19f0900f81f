//! Turning provider input into `RegisteredResource` values.
//!
//! Byte streams are consumed here exactly once: module content goes to the
//! staging area, config content is parsed into a property bag. Every
//! construction failure is returned to the registering caller.

use std::fmt;
use std::io::Read;

use crate::digest::digest_properties;
use crate::error::{InstallerError, Result};
use crate::resource::properties::{config_entity, config_identity, detect_kind, parse_config};
use crate::resource::staging::{validate_key, StagingArea};
use crate::types::resource::{PropertyMap, RegisteredResource, ResourceKind, ResourcePayload};
use crate::types::version::Version;

/// Module metadata that a provider extracts from the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub symbolic_name: String,
    pub version: Version,
    pub start_level: Option<u32>,
}

impl ModuleDescriptor {
    pub fn new(symbolic_name: &str, version: Version) -> Self {
        ModuleDescriptor {
            symbolic_name: symbolic_name.to_string(),
            version,
            start_level: None,
        }
    }

    pub fn with_start_level(mut self, level: u32) -> Self {
        self.start_level = Some(level);
        self
    }
}

pub enum ResourceContent {
    Stream(Box<dyn Read + Send>),
    Properties(PropertyMap),
}

impl fmt::Debug for ResourceContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceContent::Stream(_) => f.write_str("Stream(..)"),
            ResourceContent::Properties(p) => f.debug_tuple("Properties").field(p).finish(),
        }
    }
}

/// A resource as offered by a provider, before registration.
#[derive(Debug)]
pub struct InstallableResource {
    /// Provider-local id, usually a path.
    pub id: String,
    pub content: ResourceContent,
    /// Declared kind; derived from the id's extension when absent.
    pub kind: Option<ResourceKind>,
    /// Provider-computed digest; replaces the content hash when present.
    pub digest: Option<String>,
    pub priority: i32,
    /// Required for modules.
    pub descriptor: Option<ModuleDescriptor>,
}

impl InstallableResource {
    pub fn stream<R: Read + Send + 'static>(id: &str, reader: R) -> Self {
        InstallableResource {
            id: id.to_string(),
            content: ResourceContent::Stream(Box::new(reader)),
            kind: None,
            digest: None,
            priority: 0,
            descriptor: None,
        }
    }

    pub fn properties(id: &str, properties: PropertyMap) -> Self {
        InstallableResource {
            id: id.to_string(),
            content: ResourceContent::Properties(properties),
            kind: Some(ResourceKind::Config),
            digest: None,
            priority: 0,
            descriptor: None,
        }
    }

    pub fn module<R: Read + Send + 'static>(id: &str, reader: R, descriptor: ModuleDescriptor) -> Self {
        let mut r = InstallableResource::stream(id, reader);
        r.kind = Some(ResourceKind::Module);
        r.descriptor = Some(descriptor);
        r
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_digest(mut self, digest: &str) -> Self {
        self.digest = Some(digest.to_string());
        self
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A provider scope must be non-empty and free of `:`.
pub fn validate_scope(scope: &str) -> Result<()> {
    if scope.is_empty() || scope.contains(':') {
        return Err(InstallerError::InvalidScope(scope.to_string()));
    }
    Ok(())
}

/// Build a registered resource for `scope`, staging module bytes.
///
/// The returned resource has serial 0; the registry assigns the real one.
pub fn build(
    scope: &str,
    input: InstallableResource,
    staging: &StagingArea,
) -> Result<RegisteredResource> {
    let InstallableResource {
        id,
        content,
        kind,
        digest,
        priority,
        descriptor,
    } = input;

    // Validation failures still drop (close) the content.
    validate_scope(scope)?;
    let kind = match kind {
        Some(k) => k,
        None => detect_kind(&id)?,
    };
    if let Some(d) = &digest {
        validate_key(d)?;
    }

    match kind {
        ResourceKind::Module => {
            let descriptor = descriptor.ok_or_else(|| InstallerError::MissingDescriptor(id.clone()))?;
            let reader = match content {
                ResourceContent::Stream(r) => r,
                ResourceContent::Properties(_) => {
                    return Err(InstallerError::UnsupportedType {
                        id,
                        reason: "module content must be a byte stream".into(),
                    })
                }
            };
            let staged = staging.stage(reader, digest.as_deref())?;
            let entity = format!("{}:{}", kind.entity_prefix(), descriptor.symbolic_name);
            Ok(RegisteredResource::new(
                scope,
                &id,
                &entity,
                &staged.key,
                priority,
                descriptor.version,
                ResourcePayload::Module {
                    symbolic_name: descriptor.symbolic_name,
                    start_level: descriptor.start_level,
                },
            ))
        }
        ResourceKind::Config => {
            let properties = match content {
                ResourceContent::Properties(p) => p,
                ResourceContent::Stream(mut r) => {
                    let mut bytes = Vec::new();
                    let read = r.read_to_end(&mut bytes);
                    drop(r);
                    read?;
                    parse_config(&id, &bytes)?
                }
            };
            let digest = match digest {
                Some(d) => d,
                None => digest_properties(&properties)?,
            };
            let (factory_pid, pid) = config_identity(&id);
            let entity = config_entity(factory_pid.as_deref(), &pid);
            Ok(RegisteredResource::new(
                scope,
                &id,
                &entity,
                &digest,
                priority,
                Version::default(),
                ResourcePayload::Config {
                    pid,
                    factory_pid,
                    properties,
                },
            ))
        }
    }
}
