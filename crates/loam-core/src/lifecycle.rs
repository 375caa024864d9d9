use crate::CoreError;
use loam_runtime::{ComponentConfig, ControllerError, ControllerRegistry};
use loam_schema::ComponentDefinition;
use loam_store::{Component, ComponentState, Store};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub fn validate_transition(from: ComponentState, to: ComponentState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ComponentState::Active, ComponentState::Active | ComponentState::Disposed)
            | (ComponentState::Disposed, ComponentState::Disposed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), CoreError> {
    if cancel.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run a controller hook, giving up as soon as `cancel` fires.
pub(crate) async fn run_hook<T>(
    cancel: &CancellationToken,
    hook: impl Future<Output = Result<T, ControllerError>>,
) -> Result<T, CoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        result = hook => result.map_err(CoreError::from),
    }
}

/// Drives controller hooks around the store's lifecycle mutations.
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn Store>,
    controllers: Arc<ControllerRegistry>,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn Store>, controllers: Arc<ControllerRegistry>) -> Self {
        Self { store, controllers }
    }

    /// The component as its controller sees it, with the stack environment.
    pub fn config(&self, component: &Component) -> Result<ComponentConfig, CoreError> {
        let stack = self.store.get_stack(&component.stack_id)?;
        Ok(ComponentConfig::new(component, &stack))
    }

    /// Fire `component_created` once, then record the initialization.
    pub async fn ensure_initialize(
        &self,
        cancel: &CancellationToken,
        component: &Component,
    ) -> Result<Component, CoreError> {
        if component.initialized.is_some() {
            return Ok(component.clone());
        }
        validate_transition(component.state(), ComponentState::Active)?;
        let controller = self.controllers.get(&component.component_type);
        let config = self.config(component)?;
        run_hook(cancel, controller.component_created(&config)).await?;
        ensure_not_cancelled(cancel)?;
        let initialized = self.store.mark_initialized(&component.id)?;
        debug!("initialized {} ({})", component.name, component.id);
        Ok(initialized)
    }

    /// Persist a new spec for a matched child, then fire `component_updated`.
    pub async fn ensure_transition(
        &self,
        cancel: &CancellationToken,
        component: &Component,
        definition: ComponentDefinition,
    ) -> Result<Component, CoreError> {
        validate_transition(component.state(), ComponentState::Active)?;
        ensure_not_cancelled(cancel)?;
        let updated =
            self.store
                .update_component_spec(&component.id, definition.spec, definition.key)?;
        info!("updated {} ({})", updated.name, updated.id);
        let controller = self.controllers.get(&updated.component_type);
        let config = self.config(&updated)?;
        run_hook(cancel, controller.component_updated(&config)).await?;
        Ok(updated)
    }

    pub fn dispose(&self, component: &Component) -> Result<Component, CoreError> {
        validate_transition(component.state(), ComponentState::Disposed)?;
        let disposed = self.store.dispose_component(&component.id)?;
        if !component.is_disposed() {
            info!("disposed {} ({})", component.name, component.id);
        }
        Ok(disposed)
    }

    /// Shut a disposed component down, delete its resources and remove its
    /// record. Its children must already be gone.
    pub async fn ensure_shutdown(
        &self,
        cancel: &CancellationToken,
        component: &Component,
    ) -> Result<(), CoreError> {
        validate_transition(component.state(), ComponentState::Disposed)?;
        let controller = self.controllers.get(&component.component_type);
        let config = self.config(component)?;

        run_hook(cancel, controller.shutdown_component(&config)).await?;
        match run_hook(cancel, controller.delete_component(&config)).await {
            Ok(()) => {}
            Err(CoreError::Controller(ControllerError::ResourceGone(what))) => {
                debug!("{}: resource already gone: {what}", component.name);
            }
            Err(e) => return Err(e),
        }
        ensure_not_cancelled(cancel)?;
        self.store.remove_component(&component.id)?;
        info!("removed {} ({})", component.name, component.id);
        Ok(())
    }

    /// Fire `refresh` on an active component. Disposed components are skipped.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
        component: &Component,
    ) -> Result<(), CoreError> {
        if component.is_disposed() {
            debug!("not refreshing disposed {}", component.name);
            return Ok(());
        }
        let controller = self.controllers.get(&component.component_type);
        let config = self.config(component)?;
        run_hook(cancel, controller.refresh(&config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_runtime::{Hook, MockController};
    use loam_store::{MemoryStore, NewComponent};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(ComponentState::Active, ComponentState::Active).is_ok());
        assert!(validate_transition(ComponentState::Active, ComponentState::Disposed).is_ok());
        assert!(validate_transition(ComponentState::Disposed, ComponentState::Disposed).is_ok());
    }

    #[test]
    fn disposal_is_one_way() {
        let err = validate_transition(ComponentState::Disposed, ComponentState::Active).unwrap_err();
        assert_eq!(err.to_string(), "invalid state transition: disposed -> active");
    }

    fn setup() -> (Lifecycle, Arc<MemoryStore>, MockController, Component) {
        let store = Arc::new(MemoryStore::new());
        let mock = MockController::new();
        let mut registry = ControllerRegistry::new();
        registry.register("mock", Arc::new(mock.clone()));
        let stack = store
            .create_stack("dev", BTreeMap::from([("PORT".to_owned(), "8080".to_owned())]))
            .unwrap();
        let component = store
            .create_component(NewComponent::top_level(
                stack.id,
                ComponentDefinition::new("mock", "web", json!({"v": 1})).with_key("web"),
            ))
            .unwrap();
        let lifecycle = Lifecycle::new(store.clone(), Arc::new(registry));
        (lifecycle, store, mock, component)
    }

    #[tokio::test]
    async fn initialize_fires_created_once() {
        let (lifecycle, store, mock, component) = setup();
        let cancel = CancellationToken::new();
        let first = lifecycle.ensure_initialize(&cancel, &component).await.unwrap();
        assert!(first.initialized.is_some());
        lifecycle.ensure_initialize(&cancel, &first).await.unwrap();
        assert_eq!(mock.hooks_for("web"), vec![Hook::Created]);
        assert!(store.component(&component.id).unwrap().initialized.is_some());
    }

    #[tokio::test]
    async fn failed_created_hook_leaves_component_uninitialized() {
        let (lifecycle, store, mock, component) = setup();
        mock.fail_on(Hook::Created, None);
        let cancel = CancellationToken::new();
        assert!(lifecycle.ensure_initialize(&cancel, &component).await.is_err());
        assert!(store.component(&component.id).unwrap().initialized.is_none());
    }

    #[tokio::test]
    async fn transition_persists_spec_before_updated_hook() {
        let (lifecycle, store, mock, component) = setup();
        let cancel = CancellationToken::new();
        let definition = ComponentDefinition::new("mock", "web", json!({"v": 2})).with_key("web");
        let updated = lifecycle
            .ensure_transition(&cancel, &component, definition)
            .await
            .unwrap();
        assert_eq!(updated.spec, json!({"v": 2}));
        assert_eq!(store.component(&component.id).unwrap().spec, json!({"v": 2}));
        assert_eq!(mock.hooks_for("web"), vec![Hook::Updated]);
    }

    #[tokio::test]
    async fn disposed_component_cannot_transition() {
        let (lifecycle, _store, mock, component) = setup();
        let disposed = lifecycle.dispose(&component).unwrap();
        let cancel = CancellationToken::new();
        let definition = ComponentDefinition::new("mock", "web", json!({"v": 2}));
        assert!(matches!(
            lifecycle.ensure_transition(&cancel, &disposed, definition).await,
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_runs_hooks_then_removes() {
        let (lifecycle, store, mock, component) = setup();
        let disposed = lifecycle.dispose(&component).unwrap();
        let cancel = CancellationToken::new();
        lifecycle.ensure_shutdown(&cancel, &disposed).await.unwrap();
        assert_eq!(mock.hooks_for("web"), vec![Hook::Shutdown, Hook::Delete]);
        assert!(store.component(&component.id).is_err());
    }

    #[tokio::test]
    async fn resource_gone_counts_as_deleted() {
        let (lifecycle, store, mock, component) = setup();
        mock.gone_on_delete();
        let disposed = lifecycle.dispose(&component).unwrap();
        lifecycle
            .ensure_shutdown(&CancellationToken::new(), &disposed)
            .await
            .unwrap();
        assert!(store.component(&component.id).is_err());
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_record() {
        let (lifecycle, store, mock, component) = setup();
        mock.fail_on(Hook::Delete, Some("web"));
        let disposed = lifecycle.dispose(&component).unwrap();
        assert!(lifecycle
            .ensure_shutdown(&CancellationToken::new(), &disposed)
            .await
            .is_err());
        assert!(store.component(&component.id).unwrap().is_disposed());
    }

    #[tokio::test]
    async fn cancelled_hook_fails_with_cancelled() {
        let (lifecycle, store, mock, component) = setup();
        mock.hang_on(Hook::Created);
        let cancel = CancellationToken::new();
        let pending = {
            let lifecycle = lifecycle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { lifecycle.ensure_initialize(&cancel, &component).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(matches!(pending.await.unwrap(), Err(CoreError::Cancelled)));
        assert!(store
            .list_components()
            .unwrap()
            .iter()
            .all(|c| c.initialized.is_none()));
    }

    #[tokio::test]
    async fn refresh_sees_stack_environment() {
        let (lifecycle, _store, mock, component) = setup();
        lifecycle
            .refresh(&CancellationToken::new(), &component)
            .await
            .unwrap();
        assert_eq!(mock.hooks_for("web"), vec![Hook::Refresh]);
        let config = lifecycle.config(&component).unwrap();
        assert_eq!(config.environment.get("PORT").map(String::as_str), Some("8080"));
    }
}
