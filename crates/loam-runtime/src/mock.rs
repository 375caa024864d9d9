use crate::controller::{ComponentConfig, Controller};
use crate::ControllerError;
use async_trait::async_trait;
use loam_schema::{ComponentDefinition, ComponentId};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Created,
    Render,
    Refresh,
    Updated,
    ChildrenUpdated,
    Shutdown,
    Delete,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Created => "component_created",
            Hook::Render => "render",
            Hook::Refresh => "refresh",
            Hook::Updated => "component_updated",
            Hook::ChildrenUpdated => "children_updated",
            Hook::Shutdown => "shutdown_component",
            Hook::Delete => "delete_component",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub hook: Hook,
    pub id: ComponentId,
    pub name: String,
}

#[derive(Default)]
struct Behaviour {
    calls: Vec<HookCall>,
    /// `(hook, component name)`; a `None` name matches every component.
    failures: Vec<(Hook, Option<String>)>,
    hangs: HashSet<Hook>,
    gone_on_delete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct MockSpec {
    #[serde(default)]
    children: Vec<ComponentDefinition>,
}

/// Controller that records every hook call and renders `spec.children`.
///
/// Clones share their record, so a test can keep one clone and register
/// another.
#[derive(Clone, Default)]
pub struct MockController {
    behaviour: Arc<Mutex<Behaviour>>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    fn behaviour(&self) -> MutexGuard<'_, Behaviour> {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.behaviour().calls.clone()
    }

    /// Hooks called on components named `name`, in call order.
    pub fn hooks_for(&self, name: &str) -> Vec<Hook> {
        self.behaviour()
            .calls
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.hook)
            .collect()
    }

    /// Names of the components `hook` was called on, in call order.
    pub fn components_for(&self, hook: Hook) -> Vec<String> {
        self.behaviour()
            .calls
            .iter()
            .filter(|c| c.hook == hook)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.behaviour().calls.clear();
    }

    /// Make `hook` fail, for the component named `component` or for all.
    pub fn fail_on(&self, hook: Hook, component: Option<&str>) {
        self.behaviour()
            .failures
            .push((hook, component.map(str::to_owned)));
    }

    /// Make `hook` never return.
    pub fn hang_on(&self, hook: Hook) {
        self.behaviour().hangs.insert(hook);
    }

    /// Make `delete_component` report `ResourceGone`.
    pub fn gone_on_delete(&self) {
        self.behaviour().gone_on_delete = true;
    }

    async fn call(&self, hook: Hook, config: &ComponentConfig) -> Result<(), ControllerError> {
        let (fails, hangs, gone) = {
            let mut behaviour = self.behaviour();
            behaviour.calls.push(HookCall {
                hook,
                id: config.id.clone(),
                name: config.name.clone(),
            });
            let fails = behaviour
                .failures
                .iter()
                .any(|(h, name)| *h == hook && name.as_ref().map_or(true, |n| *n == config.name));
            (
                fails,
                behaviour.hangs.contains(&hook),
                hook == Hook::Delete && behaviour.gone_on_delete,
            )
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if fails {
            return Err(ControllerError::Failed(format!(
                "mock {hook} failure on {}",
                config.name
            )));
        }
        if gone {
            return Err(ControllerError::ResourceGone(config.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for MockController {
    async fn component_created(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::Created, config).await
    }

    async fn render(
        &self,
        config: &ComponentConfig,
    ) -> Result<Vec<ComponentDefinition>, ControllerError> {
        self.call(Hook::Render, config).await?;
        if config.spec.is_null() {
            return Ok(Vec::new());
        }
        let spec: MockSpec = config.decode_spec()?;
        Ok(spec.children)
    }

    async fn refresh(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::Refresh, config).await
    }

    async fn component_updated(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::Updated, config).await
    }

    async fn children_updated(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::ChildrenUpdated, config).await
    }

    async fn shutdown_component(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::Shutdown, config).await
    }

    async fn delete_component(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        self.call(Hook::Delete, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn config(name: &str, spec: Value) -> ComponentConfig {
        ComponentConfig {
            id: name.into(),
            stack_id: "s".into(),
            component_type: "mock".to_owned(),
            name: name.to_owned(),
            spec,
            environment: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let mock = MockController::new();
        let cfg = config("a", Value::Null);
        mock.component_created(&cfg).await.unwrap();
        mock.render(&cfg).await.unwrap();
        mock.shutdown_component(&cfg).await.unwrap();
        assert_eq!(
            mock.hooks_for("a"),
            vec![Hook::Created, Hook::Render, Hook::Shutdown]
        );
        assert_eq!(mock.components_for(Hook::Render), vec!["a".to_owned()]);
    }

    #[tokio::test]
    async fn clones_share_the_record() {
        let mock = MockController::new();
        let registered = mock.clone();
        registered.refresh(&config("a", Value::Null)).await.unwrap();
        assert_eq!(mock.calls().len(), 1);
        mock.clear_calls();
        assert!(registered.calls().is_empty());
    }

    #[tokio::test]
    async fn renders_children_from_spec() {
        let mock = MockController::new();
        let cfg = config(
            "parent",
            json!({"children": [{"type": "mock", "name": "kid", "spec": {"n": 1}}]}),
        );
        let children = mock.render(&cfg).await.unwrap();
        assert_eq!(children, vec![ComponentDefinition::new("mock", "kid", json!({"n": 1}))]);
    }

    #[tokio::test]
    async fn failures_can_target_one_component() {
        let mock = MockController::new();
        mock.fail_on(Hook::Created, Some("b"));
        mock.component_created(&config("a", Value::Null)).await.unwrap();
        let err = mock
            .component_created(&config("b", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "controller failed: mock component_created failure on b"
        );
    }

    #[tokio::test]
    async fn delete_can_report_gone() {
        let mock = MockController::new();
        mock.gone_on_delete();
        assert!(matches!(
            mock.delete_component(&config("a", Value::Null)).await,
            Err(ControllerError::ResourceGone(_))
        ));
        mock.shutdown_component(&config("a", Value::Null)).await.unwrap();
    }
}
