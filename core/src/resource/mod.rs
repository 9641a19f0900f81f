//! Resource construction, ordering and byte staging.
//!
//! `builder` turns provider input into registered resources, `ordering`
//! defines the total order used to pick winners, `staging` keeps module
//! bytes on disk under their digest.

pub mod builder;
pub mod ordering;
pub mod properties;
pub mod staging;

pub use builder::{build, validate_scope, InstallableResource, ModuleDescriptor, ResourceContent};
pub use staging::{StagedContent, StagingArea};
