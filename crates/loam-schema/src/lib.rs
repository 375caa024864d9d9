//! Component definitions, identity matching, and stack manifests for loam.
//!
//! This crate defines the schema layer: typed identifiers (`ComponentId`,
//! `StackId`, `TaskId`), the `ComponentDefinition` a controller renders for each
//! desired child, the identity key used to match desired children against
//! existing ones across reconciliation passes (`identity`), and the TOML stack
//! manifest (`StackManifest`).

pub mod definition;
pub mod identity;
pub mod manifest;
pub mod types;

pub use definition::ComponentDefinition;
pub use identity::{identity, spec_digest};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, ComponentSection, ManifestError, StackManifest,
    StackSection,
};
pub use types::{ComponentId, StackId, TaskId};
