use crate::records::{Component, Stack};
use crate::store::Store;
use crate::StoreError;
use loam_schema::{ComponentId, StackId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    components: HashMap<ComponentId, Component>,
    stacks: HashMap<StackId, Stack>,
}

/// In-memory store. Every primitive runs under a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn get_component(&self, id: &ComponentId) -> Result<Component, StoreError> {
        self.state()
            .components
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ComponentNotFound(id.to_string()))
    }

    fn list_components(&self) -> Result<Vec<Component>, StoreError> {
        Ok(self.state().components.values().cloned().collect())
    }

    fn insert_component(&self, component: &Component) -> Result<(), StoreError> {
        self.state()
            .components
            .insert(component.id.clone(), component.clone());
        Ok(())
    }

    fn modify_component(
        &self,
        id: &ComponentId,
        f: &mut dyn FnMut(&mut Component),
    ) -> Result<Component, StoreError> {
        let mut state = self.state();
        let component = state
            .components
            .get_mut(id)
            .ok_or_else(|| StoreError::ComponentNotFound(id.to_string()))?;
        f(component);
        Ok(component.clone())
    }

    fn delete_component(&self, id: &ComponentId) -> Result<bool, StoreError> {
        Ok(self.state().components.remove(id).is_some())
    }

    fn get_stack(&self, id: &StackId) -> Result<Stack, StoreError> {
        self.state()
            .stacks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::StackNotFound(id.to_string()))
    }

    fn list_stacks(&self) -> Result<Vec<Stack>, StoreError> {
        let mut stacks: Vec<Stack> = self.state().stacks.values().cloned().collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }

    fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError> {
        self.state().stacks.insert(stack.id.clone(), stack.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NewComponent;
    use loam_schema::ComponentDefinition;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn modify_is_visible_to_readers() {
        let store = MemoryStore::new();
        let stack = store.create_stack("dev", BTreeMap::new()).unwrap();
        let c = store
            .create_component(NewComponent::top_level(
                stack.id,
                ComponentDefinition::new("group", "root", json!(null)),
            ))
            .unwrap();
        store.mark_initialized(&c.id).unwrap();
        assert!(store.get_component(&c.id).unwrap().initialized.is_some());
    }

    #[test]
    fn missing_component_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_component(&"nope".into()),
            Err(StoreError::ComponentNotFound(_))
        ));
        assert!(matches!(
            store.dispose_component(&"nope".into()),
            Err(StoreError::ComponentNotFound(_))
        ));
    }
}
