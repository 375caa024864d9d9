use crate::controller::{ComponentConfig, Controller};
use crate::ControllerError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub content: String,
}

/// Manages one file on the host: `{ "path": ..., "content": ... }`.
pub struct FileController;

impl FileController {
    fn spec(config: &ComponentConfig) -> Result<FileSpec, ControllerError> {
        let spec: FileSpec = config.decode_spec()?;
        if spec.path.as_os_str().is_empty() {
            return Err(ControllerError::InvalidSpec {
                component: config.name.clone(),
                reason: "path must not be empty".to_owned(),
            });
        }
        Ok(spec)
    }

    fn write(spec: &FileSpec) -> Result<(), ControllerError> {
        let dir = match spec.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(spec.content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&spec.path).map_err(|e| ControllerError::Io(e.error))?;
        debug!("wrote {} ({} bytes)", spec.path.display(), spec.content.len());
        Ok(())
    }

    fn read(path: &Path) -> Result<Option<String>, ControllerError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Controller for FileController {
    async fn component_created(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        Self::write(&Self::spec(config)?)
    }

    async fn component_updated(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        let spec = Self::spec(config)?;
        if Self::read(&spec.path)?.as_deref() == Some(spec.content.as_str()) {
            return Ok(());
        }
        Self::write(&spec)
    }

    async fn refresh(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        let spec = Self::spec(config)?;
        match Self::read(&spec.path)? {
            None => warn!("{}: {} is missing", config.name, spec.path.display()),
            Some(content) if content != spec.content => {
                warn!("{}: {} has drifted from its spec", config.name, spec.path.display());
            }
            Some(_) => debug!("{}: {} is up to date", config.name, spec.path.display()),
        }
        Ok(())
    }

    async fn delete_component(&self, config: &ComponentConfig) -> Result<(), ControllerError> {
        let spec = Self::spec(config)?;
        match fs::remove_file(&spec.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ControllerError::ResourceGone(
                spec.path.display().to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
