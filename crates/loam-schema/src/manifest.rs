use crate::definition::ComponentDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("stack.name must not be empty")]
    EmptyStackName,
    #[error("component name must not be empty")]
    EmptyComponentName,
    #[error("component '{0}' has an empty type")]
    EmptyComponentType(String),
    #[error("component '{0}' is declared more than once")]
    DuplicateComponent(String),
    #[error("component '{component}' depends on undeclared component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },
    #[error("component '{0}' depends on itself")]
    SelfDependency(String),
}

/// A declarative stack: its environment and top-level components.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StackManifest {
    pub manifest_version: u32,
    pub stack: StackSection,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComponentSection {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub spec: Value,
}

impl StackManifest {
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }
        if self.stack.name.trim().is_empty() {
            return Err(ManifestError::EmptyStackName);
        }

        let mut declared = BTreeSet::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(ManifestError::EmptyComponentName);
            }
            if component.component_type.trim().is_empty() {
                return Err(ManifestError::EmptyComponentType(component.name.clone()));
            }
            if !declared.insert(component.name.as_str()) {
                return Err(ManifestError::DuplicateComponent(component.name.clone()));
            }
        }

        for component in &self.components {
            for dep in &component.depends_on {
                if *dep == component.name {
                    return Err(ManifestError::SelfDependency(dep.clone()));
                }
                if !declared.contains(dep.as_str()) {
                    return Err(ManifestError::UnknownDependency {
                        component: component.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ComponentSection {
    pub fn definition(&self) -> ComponentDefinition {
        ComponentDefinition {
            component_type: self.component_type.clone(),
            name: self.name.clone(),
            key: self.key.clone(),
            spec: self.spec.clone(),
        }
    }
}

pub fn parse_manifest_str(input: &str) -> Result<StackManifest, ManifestError> {
    let manifest: StackManifest = toml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<StackManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
