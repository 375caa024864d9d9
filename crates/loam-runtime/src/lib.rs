//! Component controllers for loam.
//!
//! A controller interprets one component type: it renders the component's
//! desired children and reacts to lifecycle hooks (created, updated,
//! children updated, shutdown, delete). Controllers are looked up by type in
//! a `ControllerRegistry`; unknown types resolve to a sentinel that fails
//! every hook.

pub mod controller;
pub mod file;
pub mod group;
pub mod mock;
pub mod registry;

pub use controller::{ComponentConfig, Controller};
pub use file::FileController;
pub use group::GroupController;
pub use mock::{Hook, HookCall, MockController};
pub use registry::ControllerRegistry;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unsupported component type: {0}")]
    UnsupportedType(String),
    /// The external resource no longer exists; deleting it is a no-op.
    #[error("resource is gone: {0}")]
    ResourceGone(String),
    #[error("invalid spec for component '{component}': {reason}")]
    InvalidSpec { component: String, reason: String },
    #[error("controller failed: {0}")]
    Failed(String),
    #[error("controller I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_message_names_the_type() {
        let e = ControllerError::UnsupportedType("widget".to_owned());
        assert_eq!(e.to_string(), "unsupported component type: widget");
    }

    #[test]
    fn invalid_spec_names_component() {
        let e = ControllerError::InvalidSpec {
            component: "motd".to_owned(),
            reason: "missing field `path`".to_owned(),
        };
        assert!(e.to_string().contains("'motd'"));
        assert!(e.to_string().contains("missing field"));
    }
}
