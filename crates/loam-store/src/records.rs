use crate::StoreError;
use loam_schema::{identity, ComponentDefinition, ComponentId, StackId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a component, derived from its `disposed` timestamp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComponentState {
    Active,
    Disposed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Active => write!(f, "active"),
            ComponentState::Disposed => write!(f, "disposed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub stack_id: StackId,
    #[serde(default)]
    pub parent_id: Option<ComponentId>,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub key: Option<String>,
    /// Names of sibling components that must be reconciled first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub initialized: Option<String>,
    #[serde(default)]
    pub disposed: Option<String>,
    /// blake3 checksum for integrity verification, written by `FileStore`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Component {
    pub fn state(&self) -> ComponentState {
        if self.disposed.is_some() {
            ComponentState::Disposed
        } else {
            ComponentState::Active
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_some()
    }

    pub fn identity(&self) -> String {
        identity(
            &self.component_type,
            &self.name,
            &self.spec,
            self.key.as_deref(),
        )
    }

    pub fn definition(&self) -> ComponentDefinition {
        ComponentDefinition {
            component_type: self.component_type.clone(),
            name: self.name.clone(),
            key: self.key.clone(),
            spec: self.spec.clone(),
        }
    }
}

/// Everything needed to create a component; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComponent {
    pub stack_id: StackId,
    pub parent_id: Option<ComponentId>,
    pub definition: ComponentDefinition,
    pub depends_on: Vec<String>,
}

impl NewComponent {
    pub fn child(parent: &Component, definition: ComponentDefinition) -> Self {
        Self {
            stack_id: parent.stack_id.clone(),
            parent_id: Some(parent.id.clone()),
            definition,
            depends_on: Vec::new(),
        }
    }

    pub fn top_level(stack_id: StackId, definition: ComponentDefinition) -> Self {
        Self {
            stack_id,
            parent_id: None,
            definition,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stack {
    pub id: StackId,
    pub name: String,
    /// Variables injected into every component's configuration.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(format!(
            "'{name}': name must be 1-64 characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(format!(
            "'{name}': name must match [a-zA-Z0-9_-]"
        )));
    }
    Ok(())
}
