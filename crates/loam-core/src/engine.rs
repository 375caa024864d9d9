use crate::graph::Graph;
use crate::lifecycle::ensure_not_cancelled;
use crate::reconcile::{plan_children, ChildAction, Reconciler};
use crate::CoreError;
use loam_runtime::ControllerRegistry;
use loam_schema::{ComponentSection, StackId, StackManifest, TaskId};
use loam_store::{Component, FileStore, NewComponent, Stack, Store, StoreError};
use loam_task::{Task, TaskDescription, TaskStore, TaskTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What applying a manifest did to the stack's top-level components.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplySummary {
    pub job_id: TaskId,
    pub stack: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub disposed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Entry point for every stack operation.
///
/// Each operation runs as one job in the task tracker. Operations return once
/// their own job finished; follow-up reconciles of children keep running in
/// the background until [`Engine::wait_idle`] says otherwise.
pub struct Engine {
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, controllers: ControllerRegistry) -> Self {
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), Arc::new(controllers)));
        Self {
            store,
            reconciler,
            tracker: TaskTracker::new(Arc::new(TaskStore::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Engine over a file store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, controllers: ControllerRegistry) -> Result<Self, CoreError> {
        let store = FileStore::open(root)?;
        Ok(Self::new(Arc::new(store), controllers))
    }

    /// Use `cancel` as the root token of every job.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    async fn run_job<T, Fut>(
        &self,
        name: &str,
        work: impl FnOnce(Task) -> Fut,
    ) -> Result<(TaskId, T), CoreError>
    where
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let task = self.tracker.start_job(name, &self.cancel);
        info!("job {} started: {name}", task.id());
        let result = work(task.clone()).await;
        if let Err(e) = &result {
            task.fail(e);
        }
        let finished = task.finish().await;
        let value = result?;
        finished?;
        Ok((task.id().clone(), value))
    }

    fn resolve_stack(&self, stack_ref: Option<&str>) -> Result<Option<Stack>, CoreError> {
        Ok(stack_ref
            .map(|reference| self.store.stack_by_ref(reference))
            .transpose()?)
    }

    fn resolve_component(
        &self,
        stack_ref: Option<&str>,
        reference: &str,
    ) -> Result<Component, CoreError> {
        let stack = self.resolve_stack(stack_ref)?;
        Ok(self
            .store
            .component_by_ref(reference, stack.as_ref().map(|s| &s.id))?)
    }

    /// Create or update the manifest's stack, diff its top-level components
    /// against the manifest, then reconcile the stack layer by layer.
    pub async fn apply_manifest(&self, manifest: &StackManifest) -> Result<ApplySummary, CoreError> {
        manifest.validate()?;
        let stack = self.ensure_stack(manifest)?;
        let name = format!("apply {}", stack.name);
        let (_, summary) = self
            .run_job(&name, |task| async move {
                let summary = self.apply_components(&task, &stack, manifest).await?;
                let layers = self.stack_layers(&stack.id)?;
                self.reconcile_layers(&task, layers).await?;
                Ok(summary)
            })
            .await?;
        Ok(summary)
    }

    fn ensure_stack(&self, manifest: &StackManifest) -> Result<Stack, CoreError> {
        let name = &manifest.stack.name;
        match self.store.stack_by_ref(name) {
            Ok(stack) if stack.environment == manifest.environment => Ok(stack),
            Ok(stack) => {
                debug!("updating environment of stack {name}");
                Ok(self
                    .store
                    .update_stack_environment(&stack.id, manifest.environment.clone())?)
            }
            Err(StoreError::StackNotFound(_)) => {
                info!("creating stack {name}");
                Ok(self.store.create_stack(name, manifest.environment.clone())?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_components(
        &self,
        task: &Task,
        stack: &Stack,
        manifest: &StackManifest,
    ) -> Result<ApplySummary, CoreError> {
        let cancel = task.cancellation();
        let lifecycle = self.reconciler.lifecycle();
        let existing = self.store.top_level_components(&stack.id)?;
        let desired = manifest
            .components
            .iter()
            .map(ComponentSection::definition)
            .collect();
        let (replaced, actions) = self
            .reconciler
            .replace_first(task, plan_children(&existing, desired)?)
            .await?;
        let depends_on: HashMap<&str, &Vec<String>> = manifest
            .components
            .iter()
            .map(|c| (c.name.as_str(), &c.depends_on))
            .collect();

        let mut summary = ApplySummary {
            job_id: task.job_id().clone(),
            stack: stack.name.clone(),
            created: Vec::new(),
            updated: Vec::new(),
            disposed: replaced.into_iter().map(|c| c.name).collect(),
            unchanged: Vec::new(),
        };
        for action in actions {
            ensure_not_cancelled(cancel)?;
            let deps = depends_on
                .get(action.name())
                .map(|deps| (*deps).clone())
                .unwrap_or_default();
            match action {
                ChildAction::Create(definition) => {
                    let created = self.store.create_component(
                        NewComponent::top_level(stack.id.clone(), definition).with_depends_on(deps),
                    )?;
                    info!("created {} in stack {}", created.name, stack.name);
                    summary.created.push(created.name);
                }
                ChildAction::Dispose(component) => {
                    lifecycle.dispose(&component)?;
                    summary.disposed.push(component.name);
                }
                ChildAction::Transition {
                    component,
                    definition,
                } => {
                    let updated = lifecycle
                        .ensure_transition(cancel, &component, definition)
                        .await?;
                    self.store.update_component_dependencies(&updated.id, deps)?;
                    summary.updated.push(updated.name);
                }
                ChildAction::Unchanged(component) => {
                    self.store
                        .update_component_dependencies(&component.id, deps)?;
                    summary.unchanged.push(component.name);
                }
            }
        }
        Ok(summary)
    }

    /// Dependency graph over the names of the stack's live top-level components.
    pub fn dependency_graph(&self, stack_ref: &str) -> Result<Graph<String>, CoreError> {
        let stack = self.store.stack_by_ref(stack_ref)?;
        let components = self.store.top_level_components(&stack.id)?;
        Self::graph_of(&components)
    }

    fn graph_of(components: &[Component]) -> Result<Graph<String>, CoreError> {
        let live: Vec<&Component> = components.iter().filter(|c| !c.is_disposed()).collect();
        let mut graph = Graph::new();
        for component in &live {
            if !graph.insert(component.name.clone()) {
                warn!("stack has more than one live component named {}", component.name);
            }
        }
        for component in &live {
            for dependency in &component.depends_on {
                if live.iter().any(|c| c.name == *dependency) {
                    graph.depend_on(component.name.clone(), dependency.clone())?;
                } else {
                    warn!(
                        "{} depends on {dependency}, which is not a live component",
                        component.name
                    );
                }
            }
        }
        Ok(graph)
    }

    /// Top-level components in reconciliation order. Disposed components go
    /// into the first layer: nothing waits for their shutdown.
    fn stack_layers(&self, stack: &StackId) -> Result<Vec<Vec<Component>>, CoreError> {
        let components = self.store.top_level_components(stack)?;
        let graph = Self::graph_of(&components)?;
        let by_name: HashMap<&str, &Component> = components
            .iter()
            .filter(|c| !c.is_disposed())
            .map(|c| (c.name.as_str(), c))
            .collect();

        let mut layers: Vec<Vec<Component>> = graph
            .topo_sorted_layers()
            .into_iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|name| by_name.get(name.as_str()).map(|c| (*c).clone()))
                    .collect()
            })
            .collect();
        let disposed: Vec<Component> = components.into_iter().filter(Component::is_disposed).collect();
        if !disposed.is_empty() {
            if layers.is_empty() {
                layers.push(Vec::new());
            }
            layers[0].extend(disposed);
        }
        Ok(layers)
    }

    pub fn reconciliation_order(&self, stack_ref: &str) -> Result<Vec<Vec<Component>>, CoreError> {
        let stack = self.store.stack_by_ref(stack_ref)?;
        self.stack_layers(&stack.id)
    }

    /// Reconcile each layer's components as joined subtasks, one layer after
    /// the other. A layer waits for its components' own passes, not for the
    /// follow-up reconciles of their children.
    async fn reconcile_layers(&self, task: &Task, layers: Vec<Vec<Component>>) -> Result<(), CoreError> {
        let total = layers.len() as u64;
        for (index, layer) in layers.into_iter().enumerate() {
            ensure_not_cancelled(task.cancellation())?;
            debug!("reconciling layer {index} ({} components)", layer.len());
            for component in layer {
                let reconciler = Arc::clone(&self.reconciler);
                task.go(&format!("reconcile {}", component.name), move |t| {
                    reconciler.reconcile_scheduled(t, component.id)
                });
            }
            task.join().await?;
            task.report_progress(index as u64 + 1, total);
        }
        Ok(())
    }

    /// Reconcile every top-level component of a stack, ordered by `depends_on`.
    pub async fn reconcile_stack(&self, stack_ref: &str) -> Result<TaskId, CoreError> {
        ensure_not_cancelled(&self.cancel)?;
        let stack = self.store.stack_by_ref(stack_ref)?;
        let layers = self.stack_layers(&stack.id)?;
        let (job_id, ()) = self
            .run_job(&format!("reconcile stack {}", stack.name), |task| async move {
                self.reconcile_layers(&task, layers).await
            })
            .await?;
        Ok(job_id)
    }

    pub async fn reconcile_component(
        &self,
        stack_ref: Option<&str>,
        reference: &str,
    ) -> Result<TaskId, CoreError> {
        let component = self.resolve_component(stack_ref, reference)?;
        let (job_id, ()) = self
            .run_job(&format!("reconcile {}", component.name), |task| async move {
                self.reconciler.reconcile(&task, component).await
            })
            .await?;
        Ok(job_id)
    }

    /// Dispose a component and shut its subtree down, children first.
    pub async fn dispose_component(
        &self,
        stack_ref: Option<&str>,
        reference: &str,
    ) -> Result<TaskId, CoreError> {
        let component = self.resolve_component(stack_ref, reference)?;
        let (job_id, ()) = self
            .run_job(&format!("dispose {}", component.name), |task| async move {
                let disposed = self.reconciler.lifecycle().dispose(&component)?;
                self.reconciler.reconcile(&task, disposed).await
            })
            .await?;
        Ok(job_id)
    }

    pub async fn refresh_component(
        &self,
        stack_ref: Option<&str>,
        reference: &str,
    ) -> Result<TaskId, CoreError> {
        let component = self.resolve_component(stack_ref, reference)?;
        let (job_id, ()) = self
            .run_job(&format!("refresh {}", component.name), |task| async move {
                self.reconciler
                    .lifecycle()
                    .refresh(task.cancellation(), &component)
                    .await
            })
            .await?;
        Ok(job_id)
    }

    pub fn stacks(&self) -> Result<Vec<Stack>, CoreError> {
        Ok(self.store.list_stacks()?)
    }

    pub fn components(&self, stack_ref: &str) -> Result<Vec<Component>, CoreError> {
        let stack = self.store.stack_by_ref(stack_ref)?;
        Ok(self.store.components_by_stack(&stack.id)?)
    }

    /// Tasks of one job, or of every job.
    pub fn tasks(&self, job: Option<&TaskId>) -> Vec<TaskDescription> {
        self.tracker
            .store()
            .describe_tasks(job.map(std::slice::from_ref))
    }

    pub fn evict_tasks(&self, max_age: chrono::Duration) -> usize {
        self.tracker.store().evict_tasks(max_age)
    }

    /// Wait until no follow-up reconcile is running.
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await;
    }
}
