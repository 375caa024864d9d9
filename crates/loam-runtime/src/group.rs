use crate::controller::{ComponentConfig, Controller};
use crate::ControllerError;
use async_trait::async_trait;
use loam_schema::ComponentDefinition;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct GroupSpec {
    #[serde(default)]
    children: Vec<ComponentDefinition>,
}

/// Renders `spec.children` verbatim and does nothing else. Explicit `key`s in
/// the listed children are forwarded, so keyed children update in place.
pub struct GroupController;

#[async_trait]
impl Controller for GroupController {
    async fn render(
        &self,
        config: &ComponentConfig,
    ) -> Result<Vec<ComponentDefinition>, ControllerError> {
        if config.spec.is_null() {
            return Ok(Vec::new());
        }
        let spec: GroupSpec = config.decode_spec()?;
        Ok(spec.children)
    }
}
