//! Reconciliation engine for loam stacks.
//!
//! This crate ties the component store, the controller registry and the task
//! tracker together into the `Engine`: it diffs the children a controller
//! renders against the live tree, drives components through their lifecycle,
//! orders top-level components by their dependencies, and guards the store
//! against concurrent processes.

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod graph;
pub mod lifecycle;
pub mod reconcile;

pub use concurrency::{install_signal_handler, StoreLock};
pub use config::LoamConfig;
pub use engine::{ApplySummary, Engine};
pub use graph::{Graph, GraphError};
pub use lifecycle::{validate_transition, Lifecycle};
pub use reconcile::{plan_children, ChildAction, Reconciler};

use loam_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("name collision: more than one child named '{0}'")]
    NameCollision(String),
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    #[error("stack not found: {0}")]
    StackNotFound(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("dependency error: {0}")]
    Graph(#[from] GraphError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("{0}")]
    Controller(#[from] loam_runtime::ControllerError),
    #[error("{0}")]
    Task(#[from] loam_task::TaskError),
    #[error("manifest error: {0}")]
    Manifest(#[from] loam_schema::ManifestError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ComponentNotFound(reference) => CoreError::ComponentNotFound(reference),
            StoreError::StackNotFound(reference) => CoreError::StackNotFound(reference),
            other => CoreError::Store(other),
        }
    }
}
