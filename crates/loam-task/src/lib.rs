//! Task and job tracking for loam.
//!
//! A task is one unit of asynchronous work (typically one component
//! reconciliation); a job is the tree of tasks under a root task and shares
//! the root's id. `TaskStore` holds the task records behind a mutex;
//! `TaskTracker` and `Task` drive them: starting, failing, finishing, and
//! fanning out either joined subtasks (`Task::go`) or detached ones
//! (`Task::spawn_detached`).

pub mod store;
pub mod tracker;

pub use store::{TaskDescription, TaskProgress, TaskStatus, TaskStore, TaskUpdate};
pub use tracker::{Task, TaskTracker};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no such task: {0}")]
    NotFound(String),
    #[error("no such parent task: {0}")]
    ParentNotFound(String),
    #[error("{0}")]
    Failed(String),
    #[error("task join error: {0}")]
    Join(String),
}
