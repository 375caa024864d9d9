use crate::controller::{ComponentConfig, Controller};
use crate::file::FileController;
use crate::group::GroupController;
use crate::ControllerError;
use async_trait::async_trait;
use loam_schema::ComponentDefinition;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stand-in for component types nobody registered: every hook fails with
/// `UnsupportedType`.
struct UnsupportedController {
    component_type: String,
}

impl UnsupportedController {
    fn unsupported(&self) -> ControllerError {
        ControllerError::UnsupportedType(self.component_type.clone())
    }
}

#[async_trait]
impl Controller for UnsupportedController {
    async fn component_created(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }

    async fn render(
        &self,
        _config: &ComponentConfig,
    ) -> Result<Vec<ComponentDefinition>, ControllerError> {
        Err(self.unsupported())
    }

    async fn refresh(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }

    async fn component_updated(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }

    async fn children_updated(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }

    async fn shutdown_component(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }

    async fn delete_component(&self, _config: &ComponentConfig) -> Result<(), ControllerError> {
        Err(self.unsupported())
    }
}

/// Component type to controller.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<String, Arc<dyn Controller>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `group` and `file` controllers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("group", Arc::new(GroupController));
        registry.register("file", Arc::new(FileController));
        registry
    }

    /// Register `controller` for `component_type`, returning the one it replaces.
    pub fn register(
        &mut self,
        component_type: &str,
        controller: Arc<dyn Controller>,
    ) -> Option<Arc<dyn Controller>> {
        self.controllers
            .insert(component_type.to_owned(), controller)
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.controllers.contains_key(component_type)
    }

    pub fn get(&self, component_type: &str) -> Arc<dyn Controller> {
        match self.controllers.get(component_type) {
            Some(controller) => Arc::clone(controller),
            None => Arc::new(UnsupportedController {
                component_type: component_type.to_owned(),
            }),
        }
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<&str> {
        self.controllers.keys().map(String::as_str).collect()
    }
}
