use crate::store::{now, TaskProgress, TaskStatus, TaskStore, TaskUpdate};
use crate::TaskError;
use loam_schema::TaskId;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Creates jobs and keeps count of detached tasks still in flight.
#[derive(Clone)]
pub struct TaskTracker {
    store: Arc<TaskStore>,
    detached: tokio_util::task::TaskTracker,
}

impl TaskTracker {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            detached: tokio_util::task::TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Start a new job: a running root task. The job gets its own token, a
    /// child of `cancel`, and the root task's token is a child of that.
    pub fn start_job(&self, name: &str, cancel: &CancellationToken) -> Task {
        let description = self.store.create_root_task(name);
        let job_cancel = cancel.child_token();
        let task = Task::new(
            self.clone(),
            description.id,
            description.job_id,
            name,
            job_cancel.child_token(),
            job_cancel,
        );
        task.start();
        task
    }

    /// Resolves once every detached task has settled, including detached
    /// tasks spawned while waiting.
    pub async fn wait_idle(&self) {
        self.detached.close();
        self.detached.wait().await;
        self.detached.reopen();
    }

    pub fn detached_in_flight(&self) -> usize {
        self.detached.len()
    }
}

#[derive(Default)]
struct State {
    error: Option<String>,
    subtasks: JoinSet<Result<(), String>>,
    outcome: Option<Result<(), String>>,
}

struct Inner {
    tracker: TaskTracker,
    id: TaskId,
    job_id: TaskId,
    name: String,
    cancel: CancellationToken,
    /// Token of the whole job; detached children derive from it.
    job_cancel: CancellationToken,
    state: Mutex<State>,
}

/// Handle on one running task. Clones share the same task.
///
/// A task fails with the first error passed to [`Task::fail`] or, failing
/// that, the first failing joined subtask. Reporting problems (for instance
/// the record having been evicted) never fail the task itself.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("job_id", &self.inner.job_id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Task {
    fn new(
        tracker: TaskTracker,
        id: TaskId,
        job_id: TaskId,
        name: &str,
        cancel: CancellationToken,
        job_cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracker,
                id,
                job_id,
                name: name.to_owned(),
                cancel,
                job_cancel,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    pub fn job_id(&self) -> &TaskId {
        &self.inner.job_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, update: TaskUpdate) {
        if let Err(e) = self.inner.tracker.store.update_task(&self.inner.id, update) {
            debug!("task {}: reporting failed: {e}", self.inner.id);
        }
    }

    fn start(&self) {
        self.report(TaskUpdate {
            status: Some(TaskStatus::Running),
            started: Some(now()),
            ..TaskUpdate::default()
        });
    }

    /// Record a failure. Only the first one is kept.
    pub fn fail(&self, error: impl fmt::Display) {
        let mut state = self.state();
        if state.error.is_none() {
            state.error = Some(error.to_string());
        }
    }

    pub fn report_message(&self, message: impl Into<String>) {
        self.report(TaskUpdate {
            message: Some(message.into()),
            ..TaskUpdate::default()
        });
    }

    pub fn report_progress(&self, current: u64, total: u64) {
        self.report(TaskUpdate {
            progress: Some(TaskProgress { current, total }),
            ..TaskUpdate::default()
        });
    }

    fn child(&self, name: &str, cancel: CancellationToken) -> Task {
        let tracker = &self.inner.tracker;
        let description = match tracker.store.create_task(Some(&self.inner.id), name) {
            Ok(description) => description,
            Err(e) => {
                warn!("task {name}: {e}; tracking it as a new job");
                tracker.store.create_root_task(name)
            }
        };
        let task = Task::new(
            tracker.clone(),
            description.id,
            description.job_id,
            name,
            cancel,
            self.inner.job_cancel.clone(),
        );
        task.start();
        task
    }

    /// Spawn a joined subtask: `finish` on this task waits for it, and its
    /// failure fails this task. Cancelling this task cancels the subtask.
    pub fn go<F, Fut, E>(&self, name: &str, f: F) -> TaskId
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let child = self.child(name, self.inner.cancel.child_token());
        let id = child.id().clone();
        self.state().subtasks.spawn(run(child, f));
        id
    }

    /// Spawn a detached task in the same job. Nothing waits for it except
    /// [`TaskTracker::wait_idle`]. Its token derives from the job's token, so
    /// a failing or cancelled spawner leaves it running; cancelling the token
    /// the job was started from cancels it.
    pub fn spawn_detached<F, Fut, E>(&self, name: &str, f: F) -> TaskId
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let child = self.child(name, self.inner.job_cancel.child_token());
        let id = child.id().clone();
        self.inner.tracker.detached.spawn(async move {
            if let Err(e) = run(child, f).await {
                debug!("detached task failed: {e}");
            }
        });
        id
    }

    /// Wait for every joined subtask, including ones spawned while waiting.
    /// The first failure cancels this task, and with it the remaining subtasks.
    pub async fn join(&self) -> Result<(), TaskError> {
        let mut first: Option<TaskError> = None;
        loop {
            let mut set = std::mem::take(&mut self.state().subtasks);
            if set.is_empty() {
                break;
            }
            while let Some(joined) = set.join_next().await {
                let error = match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(message)) => TaskError::Failed(message),
                    Err(e) => TaskError::Join(e.to_string()),
                };
                if first.is_none() {
                    self.inner.cancel.cancel();
                    first = Some(error);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Wait for joined subtasks, then record the outcome. Calling it again
    /// returns the recorded outcome.
    pub async fn finish(&self) -> Result<(), TaskError> {
        if let Some(outcome) = self.state().outcome.clone() {
            return outcome.map_err(TaskError::Failed);
        }
        if self.state().error.is_some() {
            self.inner.cancel.cancel();
        }
        let joined = self.join().await;
        let failure = self
            .state()
            .error
            .clone()
            .or_else(|| joined.err().map(|e| e.to_string()));

        let status = if failure.is_some() {
            TaskStatus::Failure
        } else {
            TaskStatus::Success
        };
        self.report(TaskUpdate {
            status: Some(status),
            message: failure.clone(),
            finished: Some(now()),
            ..TaskUpdate::default()
        });
        debug!("task {} ({}) finished: {status}", self.inner.name, self.inner.id);
        self.inner.cancel.cancel();

        let outcome = failure.map_or(Ok(()), Err);
        self.state().outcome = Some(outcome.clone());
        outcome.map_err(TaskError::Failed)
    }
}

async fn run<F, Fut, E>(task: Task, f: F) -> Result<(), String>
where
    F: FnOnce(Task) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    if let Err(e) = f(task.clone()).await {
        task.fail(e);
    }
    task.finish().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn tracker() -> TaskTracker {
        TaskTracker::new(Arc::new(TaskStore::new()))
    }

    fn status(tracker: &TaskTracker, id: &TaskId) -> TaskStatus {
        tracker.store().get(id).unwrap().status
    }

    #[tokio::test]
    async fn finish_waits_for_joined_subtasks() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        assert_eq!(status(&tracker, root.id()), TaskStatus::Running);

        let child = root.go("child", |_task| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(())
        });
        root.finish().await.unwrap();

        assert_eq!(status(&tracker, &child), TaskStatus::Success);
        assert_eq!(status(&tracker, root.id()), TaskStatus::Success);
        let child_record = tracker.store().get(&child).unwrap();
        assert_eq!(child_record.job_id, *root.id());
        assert_eq!(child_record.parent_id.as_ref(), Some(root.id()));
        assert!(child_record.finished.is_some());
    }

    #[tokio::test]
    async fn failing_subtask_fails_the_parent() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        let sibling = root.go("slow", |task| async move {
            task.cancellation().cancelled().await;
            Err::<(), _>("cancelled")
        });
        root.go("bad", |_task| async { Err::<(), _>("boom") });

        let err = root.finish().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        let record = tracker.store().get(root.id()).unwrap();
        assert_eq!(record.status, TaskStatus::Failure);
        assert_eq!(record.message, "boom");
        // The failure cancelled the remaining sibling.
        assert_eq!(status(&tracker, &sibling), TaskStatus::Failure);
    }

    #[tokio::test]
    async fn first_failure_wins() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        root.fail("first");
        root.fail("second");
        assert_eq!(root.finish().await.unwrap_err().to_string(), "first");
        // Finishing twice reports the same outcome.
        assert_eq!(root.finish().await.unwrap_err().to_string(), "first");
    }

    #[tokio::test]
    async fn detached_tasks_outlive_their_parent() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        let (release, released) = oneshot::channel::<()>();
        let child = root.spawn_detached("child", |_task| async move {
            released.await.map_err(|e| e.to_string())
        });

        root.finish().await.unwrap();
        assert_eq!(status(&tracker, root.id()), TaskStatus::Success);
        assert_eq!(status(&tracker, &child), TaskStatus::Running);
        assert_eq!(tracker.detached_in_flight(), 1);

        release.send(()).unwrap();
        tracker.wait_idle().await;
        assert_eq!(status(&tracker, &child), TaskStatus::Success);
        assert_eq!(tracker.detached_in_flight(), 0);
    }

    #[tokio::test]
    async fn detached_tasks_follow_the_job_token_not_the_spawner() {
        let tracker = tracker();
        let engine_cancel = CancellationToken::new();
        let root = tracker.start_job("root", &engine_cancel);
        let (tx, rx) = oneshot::channel::<CancellationToken>();
        root.go("spawner", move |task| async move {
            task.spawn_detached("follow-up", move |detached| async move {
                let token = detached.cancellation().clone();
                tx.send(token.clone()).map_err(|_| "receiver dropped")?;
                token.cancelled().await;
                Ok::<_, &str>(())
            });
            Err::<(), _>("boom")
        });

        assert_eq!(root.finish().await.unwrap_err().to_string(), "boom");
        assert!(root.is_cancelled());
        let detached = rx.await.unwrap();
        assert!(!detached.is_cancelled());
        assert_eq!(tracker.detached_in_flight(), 1);

        engine_cancel.cancel();
        assert!(detached.is_cancelled());
        tracker.wait_idle().await;
        assert_eq!(tracker.detached_in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_idle_covers_nested_detached_tasks() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        root.spawn_detached("a", |task| async move {
            task.spawn_detached("b", |_task| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(())
            });
            Ok::<_, String>(())
        });
        root.finish().await.unwrap();
        tracker.wait_idle().await;

        let tasks = tracker.store().describe_tasks(Some(&[root.job_id().clone()][..]));
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Success));
    }

    #[tokio::test]
    async fn job_cancellation_reaches_detached_tasks() {
        let tracker = tracker();
        let cancel = CancellationToken::new();
        let root = tracker.start_job("root", &cancel);
        let child = root.spawn_detached("child", |task| async move {
            task.cancellation().cancelled().await;
            Err::<(), _>("cancelled")
        });
        root.finish().await.unwrap();
        // Finishing the parent does not cancel detached children.
        assert_eq!(status(&tracker, &child), TaskStatus::Running);

        cancel.cancel();
        tracker.wait_idle().await;
        let record = tracker.store().get(&child).unwrap();
        assert_eq!(record.status, TaskStatus::Failure);
        assert_eq!(record.message, "cancelled");
    }

    #[tokio::test]
    async fn progress_and_messages_are_reported() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        root.report_message("rendering");
        root.report_progress(2, 5);
        let record = tracker.store().get(root.id()).unwrap();
        assert_eq!(record.message, "rendering");
        assert_eq!(record.progress, Some(TaskProgress { current: 2, total: 5 }));
        root.finish().await.unwrap();
        // A successful finish keeps the last reported message.
        assert_eq!(tracker.store().get(root.id()).unwrap().message, "rendering");
    }

    #[tokio::test]
    async fn evicted_parent_does_not_break_children() {
        let tracker = tracker();
        let root = tracker.start_job("root", &CancellationToken::new());
        root.finish().await.unwrap();
        tracker
            .store()
            .evict_tasks_before(chrono::Utc::now() + chrono::Duration::seconds(1));

        let child = root.go("late", |_task| async { Ok::<_, String>(()) });
        root.join().await.unwrap();
        let record = tracker.store().get(&child).unwrap();
        assert_eq!(record.job_id, child);
        assert_eq!(record.status, TaskStatus::Success);
    }
}
