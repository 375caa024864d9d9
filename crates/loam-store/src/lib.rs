//! Component and stack persistence for loam.
//!
//! This crate provides the storage layer the reconciler consumes: the
//! `Component` and `Stack` records, the `Store` contract (a handful of
//! primitive operations plus the higher-level mutations the reconciler calls),
//! a file-backed `FileStore` with checksummed atomic writes, and an in-memory
//! `MemoryStore` for tests and ephemeral runs.

pub mod file;
pub mod layout;
pub mod memory;
pub mod records;
pub mod store;

pub use file::FileStore;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use memory::MemoryStore;
pub use records::{validate_name, Component, ComponentState, NewComponent, Stack};
pub use store::Store;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity check failed for record '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    #[error("stack not found: {0}")]
    StackNotFound(String),
    #[error("ambiguous component reference '{reference}': matches {matches} components")]
    AmbiguousReference { reference: String, matches: usize },
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("name '{name}' is already used by {existing_id}")]
    NameConflict { name: String, existing_id: String },
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_component_not_found() {
        let e = StoreError::ComponentNotFound("c1".to_owned());
        assert!(e.to_string().contains("c1"));
    }

    #[test]
    fn store_error_display_name_conflict() {
        let e = StoreError::NameConflict {
            name: "dup".to_owned(),
            existing_id: "abc123".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("dup"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn store_error_display_ambiguous() {
        let e = StoreError::AmbiguousReference {
            reference: "web".to_owned(),
            matches: 2,
        };
        assert!(e.to_string().contains("matches 2"));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            id: "r".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }
}
