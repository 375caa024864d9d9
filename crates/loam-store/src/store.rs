use crate::records::{validate_name, Component, NewComponent, Stack};
use crate::{now, StoreError};
use loam_schema::{ComponentId, StackId};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Persistence contract consumed by the reconciler.
///
/// Implementors provide the record primitives; the lifecycle mutations are
/// provided on top of them. `modify_component` must be atomic with respect to
/// other writers of the same record, since a parent's pass may dispose a child
/// while the child's own pass is marking it initialized.
pub trait Store: Send + Sync {
    fn get_component(&self, id: &ComponentId) -> Result<Component, StoreError>;

    fn list_components(&self) -> Result<Vec<Component>, StoreError>;

    fn insert_component(&self, component: &Component) -> Result<(), StoreError>;

    fn modify_component(
        &self,
        id: &ComponentId,
        f: &mut dyn FnMut(&mut Component),
    ) -> Result<Component, StoreError>;

    /// Returns `false` when there was nothing to delete.
    fn delete_component(&self, id: &ComponentId) -> Result<bool, StoreError>;

    fn get_stack(&self, id: &StackId) -> Result<Stack, StoreError>;

    fn list_stacks(&self) -> Result<Vec<Stack>, StoreError>;

    fn insert_stack(&self, stack: &Stack) -> Result<(), StoreError>;

    fn component(&self, id: &ComponentId) -> Result<Component, StoreError> {
        self.get_component(id)
    }

    /// Resolve a component by id, or by name within `stack`.
    ///
    /// Name lookups ignore disposed components and prefer top-level ones, so
    /// `web` names the stack's `web` even if some group also has a `web` child.
    fn component_by_ref(
        &self,
        reference: &str,
        stack: Option<&StackId>,
    ) -> Result<Component, StoreError> {
        match self.get_component(&ComponentId::from(reference)) {
            Ok(component) if stack.map_or(true, |s| component.stack_id == *s) => {
                return Ok(component)
            }
            Ok(_) | Err(StoreError::ComponentNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let named: Vec<Component> = self
            .list_components()?
            .into_iter()
            .filter(|c| c.name == reference && !c.is_disposed())
            .filter(|c| stack.map_or(true, |s| c.stack_id == *s))
            .collect();

        let top_level: Vec<&Component> = named.iter().filter(|c| c.parent_id.is_none()).collect();
        let candidates: Vec<&Component> = if top_level.is_empty() {
            named.iter().collect()
        } else {
            top_level
        };

        match candidates.as_slice() {
            [] => Err(StoreError::ComponentNotFound(reference.to_owned())),
            [one] => Ok((*one).clone()),
            many => Err(StoreError::AmbiguousReference {
                reference: reference.to_owned(),
                matches: many.len(),
            }),
        }
    }

    fn components_by_stack(&self, stack: &StackId) -> Result<Vec<Component>, StoreError> {
        let mut out: Vec<Component> = self
            .list_components()?
            .into_iter()
            .filter(|c| c.stack_id == *stack)
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Top-level components of a stack, disposed ones included.
    fn top_level_components(&self, stack: &StackId) -> Result<Vec<Component>, StoreError> {
        Ok(self
            .components_by_stack(stack)?
            .into_iter()
            .filter(|c| c.parent_id.is_none())
            .collect())
    }

    /// Direct children of `parent`, disposed ones included.
    fn children(&self, parent: &ComponentId) -> Result<Vec<Component>, StoreError> {
        let mut out: Vec<Component> = self
            .list_components()?
            .into_iter()
            .filter(|c| c.parent_id.as_ref() == Some(parent))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn create_component(&self, new: NewComponent) -> Result<Component, StoreError> {
        validate_name(&new.definition.name)?;
        if let Some(parent) = &new.parent_id {
            // Fails with ComponentNotFound for a dangling parent.
            self.get_component(parent)?;
        }
        let timestamp = now();
        let component = Component {
            id: ComponentId::new(uuid::Uuid::new_v4().to_string()),
            stack_id: new.stack_id,
            parent_id: new.parent_id,
            name: new.definition.name,
            component_type: new.definition.component_type,
            spec: new.definition.spec,
            key: new.definition.key.filter(|k| !k.is_empty()),
            depends_on: new.depends_on,
            created_at: timestamp.clone(),
            updated_at: timestamp,
            initialized: None,
            disposed: None,
            checksum: None,
        };
        self.insert_component(&component)?;
        debug!(
            "created component {} ({}) in stack {}",
            component.name, component.id, component.stack_id
        );
        Ok(component)
    }

    /// Mark a component disposed. Idempotent: the first timestamp is kept.
    fn dispose_component(&self, id: &ComponentId) -> Result<Component, StoreError> {
        self.modify_component(id, &mut |c: &mut Component| {
            if c.disposed.is_none() {
                let timestamp = now();
                c.disposed = Some(timestamp.clone());
                c.updated_at = timestamp;
            }
        })
    }

    fn update_component_spec(
        &self,
        id: &ComponentId,
        spec: Value,
        key: Option<String>,
    ) -> Result<Component, StoreError> {
        let key = key.filter(|k| !k.is_empty());
        self.modify_component(id, &mut |c: &mut Component| {
            c.spec = spec.clone();
            c.key = key.clone();
            c.updated_at = now();
        })
    }

    fn update_component_dependencies(
        &self,
        id: &ComponentId,
        depends_on: Vec<String>,
    ) -> Result<Component, StoreError> {
        self.modify_component(id, &mut |c: &mut Component| {
            if c.depends_on != depends_on {
                c.depends_on = depends_on.clone();
                c.updated_at = now();
            }
        })
    }

    fn mark_initialized(&self, id: &ComponentId) -> Result<Component, StoreError> {
        self.modify_component(id, &mut |c: &mut Component| {
            if c.initialized.is_none() {
                let timestamp = now();
                c.initialized = Some(timestamp.clone());
                c.updated_at = timestamp;
            }
        })
    }

    /// Physically remove a record. Removing a missing record is not an error.
    fn remove_component(&self, id: &ComponentId) -> Result<(), StoreError> {
        if self.delete_component(id)? {
            debug!("removed component {id}");
        }
        Ok(())
    }

    fn create_stack(
        &self,
        name: &str,
        environment: BTreeMap<String, String>,
    ) -> Result<Stack, StoreError> {
        validate_name(name)?;
        if let Some(existing) = self.list_stacks()?.into_iter().find(|s| s.name == name) {
            return Err(StoreError::NameConflict {
                name: name.to_owned(),
                existing_id: existing.id.into_inner(),
            });
        }
        let stack = Stack {
            id: StackId::new(uuid::Uuid::new_v4().to_string()),
            name: name.to_owned(),
            environment,
            created_at: now(),
            checksum: None,
        };
        self.insert_stack(&stack)?;
        Ok(stack)
    }

    fn update_stack_environment(
        &self,
        id: &StackId,
        environment: BTreeMap<String, String>,
    ) -> Result<Stack, StoreError> {
        let mut stack = self.get_stack(id)?;
        stack.environment = environment;
        self.insert_stack(&stack)?;
        Ok(stack)
    }

    /// Resolve a stack by id or by name.
    fn stack_by_ref(&self, reference: &str) -> Result<Stack, StoreError> {
        match self.get_stack(&StackId::from(reference)) {
            Ok(stack) => return Ok(stack),
            Err(StoreError::StackNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.list_stacks()?
            .into_iter()
            .find(|s| s.name == reference)
            .ok_or_else(|| StoreError::StackNotFound(reference.to_owned()))
    }
}
