use crate::ControllerError;
use async_trait::async_trait;
use loam_schema::{ComponentDefinition, ComponentId, StackId};
use loam_store::{Component, Stack};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a controller sees of a component when one of its hooks runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentConfig {
    pub id: ComponentId,
    pub stack_id: StackId,
    #[serde(rename = "type")]
    pub component_type: String,
    pub name: String,
    pub spec: Value,
    /// Environment of the owning stack.
    pub environment: BTreeMap<String, String>,
}

impl ComponentConfig {
    pub fn new(component: &Component, stack: &Stack) -> Self {
        Self {
            id: component.id.clone(),
            stack_id: component.stack_id.clone(),
            component_type: component.component_type.clone(),
            name: component.name.clone(),
            spec: component.spec.clone(),
            environment: stack.environment.clone(),
        }
    }

    /// Decode the spec into a controller's model type.
    pub fn decode_spec<T: DeserializeOwned>(&self) -> Result<T, ControllerError> {
        serde_json::from_value(self.spec.clone()).map_err(|e| ControllerError::InvalidSpec {
            component: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Type-specific behaviour of a component.
///
/// Every hook defaults to a no-op, and `render` to no children, so a
/// controller only implements what its component type needs.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Called once, the first time the component is reconciled.
    async fn component_created(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Desired children, called on every reconciliation pass.
    async fn render(
        &self,
        _config: &ComponentConfig,
    ) -> Result<Vec<ComponentDefinition>, ControllerError> {
        Ok(Vec::new())
    }

    /// Read back the state of the underlying resources.
    async fn refresh(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Called after the component's spec changed in place, before its
    /// children are reconciled.
    async fn component_updated(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Called after one of the component's children finished reconciling.
    async fn children_updated(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Blocking graceful shutdown.
    async fn shutdown_component(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Delete external resources. `ResourceGone` means there was nothing left.
    async fn delete_component(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Ok(())
    }
}
