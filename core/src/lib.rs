//! Deployable-module installer core.
//!
//! Providers register installable resources; the installer keeps every
//! candidate per entity in a persistent registry, picks a winner per entity
//! with a total order, and converges a module runtime towards the winners in
//! cycles of ordered tasks.
//!
//! # Modules
//!
//! - [`digest`]: Content fingerprints for byte streams and property bags
//! - [`resource`]: Resource construction, ordering and byte staging
//! - [`registry`]: Persistent per-entity candidate sets
//! - [`convergence`]: Task planning, execution and the cycle runner
//! - [`infrastructure`]: The runtime collaborator trait and its mock
//! - [`installer`]: Facade and provider registration handles
//! - [`service`]: Background cycle thread
//! - [`timeline`]: Chronological topic/time replay
//! - [`data`]: State directory layout and settings

pub mod bootstrap;
pub mod convergence;
pub mod data;
pub mod digest;
pub mod error;
pub mod infrastructure;
pub mod installer;
pub mod lock;
pub mod registry;
pub mod resource;
pub mod service;
pub mod timeline;
pub mod types;

pub use error::{InstallerError, Result};
pub use installer::{Installer, ProviderHandle, Registrar};
