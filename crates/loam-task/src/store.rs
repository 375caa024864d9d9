use crate::TaskError;
use chrono::{DateTime, SecondsFormat, Utc};
use loam_schema::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDescription {
    pub id: TaskId,
    /// Id of the root task of this task's tree.
    pub job_id: TaskId,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub message: String,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub finished: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
}

/// A partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub started: Option<String>,
    pub finished: Option<String>,
    pub progress: Option<TaskProgress>,
}

/// Fixed-width RFC 3339 so timestamps also sort lexically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

/// In-memory task records. Every operation runs under one lock.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Mutex<HashMap<TaskId, TaskDescription>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskDescription>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tasks ordered by creation time, optionally restricted to some jobs.
    pub fn describe_tasks(&self, job_ids: Option<&[TaskId]>) -> Vec<TaskDescription> {
        let mut out: Vec<TaskDescription> = self
            .tasks()
            .values()
            .filter(|t| job_ids.map_or(true, |jobs| jobs.contains(&t.job_id)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn get(&self, id: &TaskId) -> Result<TaskDescription, TaskError> {
        self.tasks()
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Create a pending root task; its id doubles as the job id.
    pub fn create_root_task(&self, name: &str) -> TaskDescription {
        let id = TaskId::new(uuid::Uuid::new_v4().to_string());
        let task = Self::pending(id.clone(), id, None, name);
        self.tasks().insert(task.id.clone(), task.clone());
        task
    }

    /// Create a pending task under `parent_id`, inheriting its job.
    pub fn create_task(
        &self,
        parent_id: Option<&TaskId>,
        name: &str,
    ) -> Result<TaskDescription, TaskError> {
        let Some(parent_id) = parent_id else {
            return Ok(self.create_root_task(name));
        };
        let mut tasks = self.tasks();
        let job_id = tasks
            .get(parent_id)
            .map(|parent| parent.job_id.clone())
            .ok_or_else(|| TaskError::ParentNotFound(parent_id.to_string()))?;
        let task = Self::pending(
            TaskId::new(uuid::Uuid::new_v4().to_string()),
            job_id,
            Some(parent_id.clone()),
            name,
        );
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn pending(id: TaskId, job_id: TaskId, parent_id: Option<TaskId>, name: &str) -> TaskDescription {
        let created = now();
        TaskDescription {
            id,
            job_id,
            parent_id,
            name: name.to_owned(),
            status: TaskStatus::Pending,
            message: String::new(),
            created: created.clone(),
            updated: created,
            started: None,
            finished: None,
            progress: None,
        }
    }

    pub fn update_task(&self, id: &TaskId, update: TaskUpdate) -> Result<(), TaskError> {
        let mut tasks = self.tasks();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(message) = update.message {
            task.message = message;
        }
        if update.started.is_some() {
            task.started = update.started;
        }
        if update.finished.is_some() {
            task.finished = update.finished;
        }
        if update.progress.is_some() {
            task.progress = update.progress;
        }
        task.updated = now();
        Ok(())
    }

    /// Evict every job whose tasks have all settled and whose most recent
    /// update is older than `max_age`. Returns the number of tasks removed.
    pub fn evict_tasks(&self, max_age: chrono::Duration) -> usize {
        self.evict_tasks_before(Utc::now() - max_age)
    }

    pub fn evict_tasks_before(&self, cutoff: DateTime<Utc>) -> usize {
        let cutoff = timestamp(cutoff);
        let mut tasks = self.tasks();

        let mut last_update: HashMap<TaskId, String> = HashMap::new();
        let mut busy: HashSet<TaskId> = HashSet::new();
        for task in tasks.values() {
            let latest = last_update.entry(task.job_id.clone()).or_default();
            if task.updated > *latest {
                latest.clone_from(&task.updated);
            }
            if !task.status.is_settled() {
                busy.insert(task.job_id.clone());
            }
        }
        let expired: HashSet<TaskId> = last_update
            .into_iter()
            .filter(|(job, updated)| *updated < cutoff && !busy.contains(job))
            .map(|(job, _)| job)
            .collect();

        let before = tasks.len();
        tasks.retain(|_, task| !expired.contains(&task.job_id));
        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!("evicted {evicted} tasks from {} jobs", expired.len());
        }
        evicted
    }
}
