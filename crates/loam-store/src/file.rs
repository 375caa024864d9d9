use crate::layout::StoreLayout;
use crate::records::{Component, Stack};
use crate::store::Store;
use crate::{fsync_dir, StoreError};
use loam_schema::{ComponentId, StackId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// A record persisted as one JSON file with an embedded blake3 checksum.
trait Record: Serialize + DeserializeOwned + Clone {
    fn checksum(&self) -> Option<&str>;
    fn set_checksum(&mut self, checksum: Option<String>);

    /// Checksum over the record content, excluding the checksum field itself.
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.set_checksum(None);
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

impl Record for Component {
    fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
    fn set_checksum(&mut self, checksum: Option<String>) {
        self.checksum = checksum;
    }
}

impl Record for Stack {
    fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
    fn set_checksum(&mut self, checksum: Option<String>) {
        self.checksum = checksum;
    }
}

/// File-backed store: one checksummed JSON file per component and per stack.
///
/// Writes go through a temp file, `fsync`, rename, and a directory `fsync`.
/// Read-modify-write cycles are serialized by an in-process mutex; separate
/// processes are kept out by the core's store lock.
pub struct FileStore {
    layout: StoreLayout,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and initialize if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        Ok(Self {
            layout,
            write_lock: Mutex::new(()),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn write_record<R: Record>(dir: &Path, name: &str, record: &R) -> Result<(), StoreError> {
        let mut with_checksum = record.clone();
        with_checksum.set_checksum(Some(with_checksum.compute_checksum()?));
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(name))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }

    /// `Ok(None)` when the file does not exist.
    fn read_record<R: Record>(dir: &Path, name: &str) -> Result<Option<R>, StoreError> {
        // References come from users; never let one escape the record directory.
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Ok(None);
        }
        let path = dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: R = serde_json::from_str(&content)?;

        if let Some(expected) = record.checksum() {
            let actual = record.compute_checksum()?;
            if actual != expected {
                return Err(StoreError::IntegrityFailure {
                    id: name.to_owned(),
                    expected: expected.to_owned(),
                    actual,
                });
            }
        }
        Ok(Some(record))
    }

    fn list_records<R: Record>(dir: &Path) -> Result<Vec<R>, StoreError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            // Skip temp files left behind by interrupted writes.
            if name_str.starts_with('.') {
                continue;
            }
            match Self::read_record(dir, name_str) {
                Ok(Some(record)) => results.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping corrupted record '{name_str}': {e}");
                }
            }
        }
        Ok(results)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another writer panicked mid-call; the
        // record files themselves are replaced atomically.
        self.write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for FileStore {
    fn get_component(&self, id: &ComponentId) -> Result<Component, StoreError> {
        Self::read_record(&self.layout.components_dir(), id)?
            .ok_or_else(|| StoreError::ComponentNotFound(id.to_string()))
    }

    fn list_components(&self) -> Result<Vec<Component>, StoreError> {
        Self::list_records(&self.layout.components_dir())
    }

    fn insert_component(&self, component: &Component) -> Result<(), StoreError> {
        let _guard = self.lock();
        Self::write_record(&self.layout.components_dir(), &component.id, component)
    }

    fn modify_component(
        &self,
        id: &ComponentId,
        f: &mut dyn FnMut(&mut Component),
    ) -> Result<Component, StoreError> {
        let _guard = self.lock();
        let dir = self.layout.components_dir();
        let mut component: Component = Self::read_record(&dir, id)?
            .ok_or_else(|| StoreError::ComponentNotFound(id.to_string()))?;
        f(&mut component);
        component.checksum = None;
        Self::write_record(&dir, id, &component)?;
        Ok(component)
    }

    fn delete_component(&self, id: &ComponentId) -> Result<bool, StoreError> {
        let _guard = self.lock();
        let path = self.layout.components_dir().join(id);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get_stack(&self, id: &StackId) -> Result<Stack, StoreError> {
        Self::read_record(&self.layout.stacks_dir(), id)?
            .ok_or_else(|| StoreError::StackNotFound(id.to_string()))
    }

    fn list_stacks(&self) -> Result<Vec<Stack>, StoreError> {
        let mut stacks: Vec<Stack> = Self::list_records(&self.layout.stacks_dir())?;
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }

    fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        let _guard = self.lock();
        Self::write_record(&self.layout.stacks_dir(), &stack.id, stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NewComponent;
    use loam_schema::ComponentDefinition;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn new_component(store: &FileStore) -> Component {
        let stack = store.create_stack("dev", BTreeMap::new()).unwrap();
        store
            .create_component(NewComponent::top_level(
                stack.id,
                ComponentDefinition::new("file", "motd", json!({"content": "hi"})),
            ))
            .unwrap()
    }

    #[test]
    fn component_roundtrip_embeds_checksum() {
        let (_dir, store) = test_store();
        let created = new_component(&store);
        let loaded = store.get_component(&created.id).unwrap();
        assert_eq!(loaded.name, "motd");
        assert_eq!(loaded.spec, json!({"content": "hi"}));
        assert!(loaded.checksum.is_some(), "writes must embed a checksum");
    }

    #[test]
    fn tampered_record_fails_integrity_check() {
        let (dir, store) = test_store();
        let created = new_component(&store);
        let path = StoreLayout::new(dir.path())
            .components_dir()
            .join(&created.id);
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("motd", "mott")).unwrap();
        assert!(matches!(
            store.get_component(&created.id),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn list_skips_corrupt_records() {
        let (dir, store) = test_store();
        new_component(&store);
        fs::write(
            StoreLayout::new(dir.path()).components_dir().join("garbage"),
            "NOT JSON",
        )
        .unwrap();
        assert_eq!(store.list_components().unwrap().len(), 1);
    }

    #[test]
    fn modify_rewrites_checksum() {
        let (_dir, store) = test_store();
        let created = new_component(&store);
        let disposed = store.dispose_component(&created.id).unwrap();
        assert!(disposed.disposed.is_some());
        let loaded = store.get_component(&created.id).unwrap();
        assert!(loaded.is_disposed());
    }

    #[test]
    fn delete_reports_whether_record_existed() {
        let (_dir, store) = test_store();
        let created = new_component(&store);
        assert!(store.delete_component(&created.id).unwrap());
        assert!(!store.delete_component(&created.id).unwrap());
        assert!(matches!(
            store.get_component(&created.id),
            Err(StoreError::ComponentNotFound(_))
        ));
    }

    #[test]
    fn reopen_sees_previous_records() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileStore::open(dir.path()).unwrap();
            new_component(&store).id
        };
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_component(&id).unwrap().name, "motd");
        assert_eq!(store.stack_by_ref("dev").unwrap().name, "dev");
    }
}
