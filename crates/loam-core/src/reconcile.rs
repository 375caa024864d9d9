//! Component-tree reconciliation.
//!
//! One pass over a component renders its desired children, diffs them
//! against the live children by identity, and applies the resulting actions.
//! Every child that was created, disposed or transitioned gets a follow-up
//! reconcile as a detached task in the same job, so a pass finishing does not
//! mean its subtree has converged; wait on the task tracker for that. A child
//! replaced by a new one of the same name is the exception: it is shut down
//! inside the pass, before its replacement exists.

use crate::lifecycle::{ensure_not_cancelled, run_hook, Lifecycle};
use crate::CoreError;
use loam_runtime::ControllerRegistry;
use loam_schema::{ComponentDefinition, ComponentId, StackId};
use loam_store::{Component, NewComponent, Store};
use loam_task::Task;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ChildAction {
    Create(ComponentDefinition),
    Dispose(Component),
    Transition {
        component: Component,
        definition: ComponentDefinition,
    },
    Unchanged(Component),
}

impl ChildAction {
    pub fn identity(&self) -> String {
        match self {
            ChildAction::Create(definition) => definition.identity(),
            ChildAction::Dispose(component)
            | ChildAction::Transition { component, .. }
            | ChildAction::Unchanged(component) => component.identity(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ChildAction::Create(definition) => &definition.name,
            ChildAction::Dispose(component)
            | ChildAction::Transition { component, .. }
            | ChildAction::Unchanged(component) => &component.name,
        }
    }
}

/// Diff live children against desired ones, keyed by identity.
///
/// Disposed children in `existing` are ignored. Two desired children with
/// the same name fail the whole diff before any action is produced. Actions
/// come out sorted by identity.
pub fn plan_children(
    existing: &[Component],
    desired: Vec<ComponentDefinition>,
) -> Result<Vec<ChildAction>, CoreError> {
    let mut names = HashSet::new();
    for definition in &desired {
        if !names.insert(definition.name.as_str()) {
            return Err(CoreError::NameCollision(definition.name.clone()));
        }
    }

    let mut live: BTreeMap<String, &Component> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for component in existing.iter().filter(|c| !c.is_disposed()) {
        let identity = component.identity();
        if live.contains_key(&identity) {
            duplicates.push(component);
        } else {
            live.insert(identity, component);
        }
    }
    let mut wanted: BTreeMap<String, ComponentDefinition> = desired
        .into_iter()
        .map(|definition| (definition.identity(), definition))
        .collect();

    let identities: BTreeSet<String> = live.keys().chain(wanted.keys()).cloned().collect();
    let mut actions = Vec::with_capacity(identities.len() + duplicates.len());
    for identity in identities {
        let action = match (live.get(&identity), wanted.remove(&identity)) {
            (Some(component), Some(definition)) if component.spec != definition.spec => {
                ChildAction::Transition {
                    component: (*component).clone(),
                    definition,
                }
            }
            (Some(component), Some(_)) => ChildAction::Unchanged((*component).clone()),
            (Some(component), None) => ChildAction::Dispose((*component).clone()),
            (None, Some(definition)) => ChildAction::Create(definition),
            (None, None) => continue,
        };
        actions.push(action);
    }
    // Live siblings sharing an identity should not exist; keep the first.
    for component in duplicates {
        warn!("disposing duplicate child {} ({})", component.name, component.id);
        actions.push(ChildAction::Dispose(component.clone()));
    }
    Ok(actions)
}

pub(crate) type ReconcileFuture = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>>;

pub struct Reconciler {
    store: Arc<dyn Store>,
    controllers: Arc<ControllerRegistry>,
    lifecycle: Lifecycle,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, controllers: Arc<ControllerRegistry>) -> Self {
        let lifecycle = Lifecycle::new(Arc::clone(&store), Arc::clone(&controllers));
        Self {
            store,
            controllers,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Reconcile the component `reference` names (id, or name within `stack`).
    pub async fn reconcile_component(
        self: &Arc<Self>,
        task: &Task,
        stack: Option<&StackId>,
        reference: &str,
    ) -> Result<(), CoreError> {
        let component = self.store.component_by_ref(reference, stack)?;
        self.reconcile(task, component).await
    }

    /// Reconcile `id` as a task of its own. A record that has already been
    /// removed counts as reconciled.
    pub(crate) fn reconcile_scheduled(self: Arc<Self>, task: Task, id: ComponentId) -> ReconcileFuture {
        Box::pin(async move {
            let component = match self.store.component(&id) {
                Ok(component) => component,
                Err(loam_store::StoreError::ComponentNotFound(_)) => {
                    debug!("component {id} is already gone");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            self.reconcile(&task, component).await
        })
    }

    fn schedule(self: &Arc<Self>, task: &Task, component: &Component) {
        let this = Arc::clone(self);
        let id = component.id.clone();
        task.spawn_detached(&format!("reconcile {}", component.name), move |t| {
            this.reconcile_scheduled(t, id)
        });
    }

    /// One pass over `component`: render and diff an active component, or shut
    /// a disposed one down.
    pub async fn reconcile(self: &Arc<Self>, task: &Task, component: Component) -> Result<(), CoreError> {
        let cancel = task.cancellation();
        ensure_not_cancelled(cancel)?;
        if component.is_disposed() {
            return self.shut_down(task, &component).await;
        }

        debug!("reconciling {} ({})", component.name, component.id);
        task.report_message(format!("rendering {}", component.name));
        let controller = self.controllers.get(&component.component_type);
        let config = self.lifecycle.config(&component)?;
        let existing = self.store.children(&component.id)?;
        let desired = run_hook(cancel, controller.render(&config)).await?;
        let (_, actions) = self.replace_first(task, plan_children(&existing, desired)?).await?;

        let total = actions.len() as u64;
        for (done, action) in actions.into_iter().enumerate() {
            ensure_not_cancelled(cancel)?;
            match action {
                ChildAction::Create(definition) => {
                    let child = self
                        .store
                        .create_component(NewComponent::child(&component, definition))?;
                    info!("created {} under {}", child.name, component.name);
                    self.schedule(task, &child);
                }
                ChildAction::Dispose(child) => {
                    let child = self.lifecycle.dispose(&child)?;
                    self.schedule(task, &child);
                }
                ChildAction::Transition {
                    component: child,
                    definition,
                } => {
                    let child = self
                        .lifecycle
                        .ensure_transition(cancel, &child, definition)
                        .await?;
                    self.schedule(task, &child);
                }
                ChildAction::Unchanged(_) => {}
            }
            task.report_progress(done as u64 + 1, total);
        }

        let component = self.lifecycle.ensure_initialize(cancel, &component).await?;
        self.notify_parent(task, &component).await
    }

    /// Shut down every disposed child whose name a created sibling takes
    /// over, as joined subtasks. Returns the shut-down children and the
    /// remaining actions. The old and new child may own the same resource, so
    /// the old one has to be gone before its replacement is created.
    pub(crate) async fn replace_first(
        self: &Arc<Self>,
        task: &Task,
        actions: Vec<ChildAction>,
    ) -> Result<(Vec<Component>, Vec<ChildAction>), CoreError> {
        let created: HashSet<String> = actions
            .iter()
            .filter_map(|action| match action {
                ChildAction::Create(definition) => Some(definition.name.clone()),
                _ => None,
            })
            .collect();
        let (replaced, rest): (Vec<ChildAction>, Vec<ChildAction>) =
            actions.into_iter().partition(|action| {
                matches!(action, ChildAction::Dispose(child) if created.contains(&child.name))
            });
        let mut shut_down = Vec::with_capacity(replaced.len());
        for action in replaced {
            let ChildAction::Dispose(child) = action else {
                continue;
            };
            ensure_not_cancelled(task.cancellation())?;
            let child = self.lifecycle.dispose(&child)?;
            debug!("replacing {} ({})", child.name, child.id);
            let this = Arc::clone(self);
            let id = child.id.clone();
            task.go(&format!("replace {}", child.name), move |t| {
                this.reconcile_scheduled(t, id)
            });
            shut_down.push(child);
        }
        if !shut_down.is_empty() {
            task.join().await?;
        }
        Ok((shut_down, rest))
    }

    /// Tell a live parent that one of its children finished a pass.
    async fn notify_parent(&self, task: &Task, component: &Component) -> Result<(), CoreError> {
        let Some(parent_id) = &component.parent_id else {
            return Ok(());
        };
        let parent = match self.store.component(parent_id) {
            Ok(parent) if !parent.is_disposed() => parent,
            Ok(_) | Err(loam_store::StoreError::ComponentNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let controller = self.controllers.get(&parent.component_type);
        let config = self.lifecycle.config(&parent)?;
        run_hook(task.cancellation(), controller.children_updated(&config)).await
    }

    /// Dispose and reconcile every remaining child as joined subtasks, then
    /// shut the component itself down.
    async fn shut_down(self: &Arc<Self>, task: &Task, component: &Component) -> Result<(), CoreError> {
        debug!("shutting down {} ({})", component.name, component.id);
        task.report_message(format!("shutting down {}", component.name));
        for child in self.store.children(&component.id)? {
            ensure_not_cancelled(task.cancellation())?;
            let child = self.lifecycle.dispose(&child)?;
            let this = Arc::clone(self);
            let id = child.id.clone();
            task.go(&format!("dispose {}", child.name), move |t| {
                this.reconcile_scheduled(t, id)
            });
        }
        task.join().await?;
        self.lifecycle
            .ensure_shutdown(task.cancellation(), component)
            .await
    }
}
