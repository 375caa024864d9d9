use crate::identity::identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A desired child, as rendered by a controller.
///
/// The reconciler matches definitions against existing children by
/// [`identity`](Self::identity); a definition with no match becomes a new
/// component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    #[serde(rename = "type")]
    pub component_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub spec: Value,
}

impl ComponentDefinition {
    pub fn new(component_type: impl Into<String>, name: impl Into<String>, spec: Value) -> Self {
        Self {
            component_type: component_type.into(),
            name: name.into(),
            key: None,
            spec,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn identity(&self) -> String {
        identity(
            &self.component_type,
            &self.name,
            &self.spec,
            self.key.as_deref(),
        )
    }
}
