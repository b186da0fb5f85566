use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::accessor::Entity;
use super::synthesis::{FieldSlot, ProxyType};
use crate::core::{OrmError, Result};
use crate::schema::{EntitySchema, SchemaCatalog};

struct Registration {
    type_id: TypeId,
    schema: EntitySchema,
    accessors: Vec<&'static str>,
}

/// Collects entity types before their schemas are normalized together.
#[derive(Default)]
pub struct EntityRegistryBuilder {
    registrations: Vec<Registration>,
}

impl EntityRegistryBuilder {
    pub fn register<T: Entity>(mut self) -> Self {
        self.push::<T>();
        self
    }

    pub(crate) fn push<T: Entity>(&mut self) {
        let type_id = TypeId::of::<T>();
        if self.registrations.iter().any(|r| r.type_id == type_id) {
            return;
        }
        self.registrations.push(Registration {
            type_id,
            schema: T::schema(),
            accessors: T::accessors().iter().map(|a| a.name).collect(),
        });
    }

    /// Normalizes all schemas together, synthesizes each proxy type and
    /// checks it against the type's accessor table.
    pub fn build(self) -> Result<EntityRegistry> {
        let mut catalog = SchemaCatalog::new();
        for registration in &self.registrations {
            catalog.insert(registration.schema.clone())?;
        }
        catalog.normalize()?;

        let mut registry = EntityRegistry::default();
        for registration in self.registrations {
            let schema = catalog.get(&registration.schema.name).ok_or_else(|| {
                OrmError::Schema(format!("'{}' vanished during normalization", registration.schema.name))
            })?;
            let proxy_type = ProxyType::synthesize_shared(schema)?;
            check_accessors(&proxy_type, &registration.accessors)?;

            debug!(entity = %schema.name, "registered entity");
            registry
                .by_name
                .insert(schema.name.to_ascii_lowercase(), Arc::clone(&proxy_type));
            registry.by_type.insert(registration.type_id, proxy_type);
        }
        Ok(registry)
    }
}

fn check_accessors(proxy_type: &ProxyType, accessors: &[&'static str]) -> Result<()> {
    let declared: Vec<&str> = proxy_type
        .fields()
        .iter()
        .filter(|f| matches!(f.slot, FieldSlot::Declared(_)))
        .map(|f| f.name.as_str())
        .collect();

    let aligned = declared.len() == accessors.len()
        && declared
            .iter()
            .zip(accessors)
            .all(|(field, accessor)| field.eq_ignore_ascii_case(accessor));
    if !aligned {
        return Err(OrmError::Schema(format!(
            "accessors of '{}' {:?} do not match its declared fields {:?}",
            proxy_type.entity(),
            accessors,
            declared
        )));
    }
    Ok(())
}

/// Proxy types of every registered entity, by Rust type and by name.
#[derive(Default, Clone)]
pub struct EntityRegistry {
    by_type: HashMap<TypeId, Arc<ProxyType>>,
    by_name: HashMap<String, Arc<ProxyType>>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn get<T: Entity>(&self) -> Result<Arc<ProxyType>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| OrmError::UnknownEntity(T::NAME.to_string()))
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<ProxyType>> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.values().map(|t| t.entity())
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
