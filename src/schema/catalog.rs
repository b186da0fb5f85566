use std::collections::HashSet;

use tracing::debug;

use super::descriptor::{Constraint, EntitySchema, PropertyDescriptor, RelationKind};
use super::naming::{back_reference_key_name, reference_key_name};
use crate::core::{DataType, OrmError, Result};
use crate::tracker::validation::compile_pattern;

/// The set of schemas that are normalized together.
///
/// A collection on one entity adds a key to another, so the schema pass has
/// to see every participating schema at once.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: Vec<EntitySchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = EntitySchema>) -> Result<Self> {
        let mut catalog = Self::new();
        for schema in schemas {
            catalog.insert(schema)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, schema: EntitySchema) -> Result<()> {
        if self.get(&schema.name).is_some() {
            return Err(OrmError::Schema(format!(
                "entity '{}' is registered twice",
                schema.name
            )));
        }
        self.schemas.push(schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.schemas.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.schemas
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn schemas(&self) -> &[EntitySchema] {
        &self.schemas
    }

    pub fn into_schemas(self) -> Vec<EntitySchema> {
        self.schemas
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Runs the schema pass: synthesizes missing relation keys, links keys the
    /// user declared, then validates every schema.
    ///
    /// Running it again on a normalized catalog changes nothing.
    pub fn normalize(&mut self) -> Result<()> {
        self.check_targets()?;
        self.link_references()?;
        self.link_collections()?;
        for schema in &self.schemas {
            validate_schema(schema)?;
        }
        Ok(())
    }

    fn key_type_of(&self, entity: &str) -> DataType {
        self.get(entity)
            .and_then(|s| s.primary_key_property())
            .map(|p| p.data_type)
            .unwrap_or(DataType::Integer)
    }

    fn check_targets(&self) -> Result<()> {
        for schema in &self.schemas {
            for relation in schema.relations() {
                let target = relation.related_entity.as_deref().ok_or_else(|| {
                    OrmError::Schema(format!(
                        "relation '{}.{}' has no target entity",
                        schema.name, relation.name
                    ))
                })?;
                if self.get(target).is_none() {
                    return Err(OrmError::Schema(format!(
                        "relation '{}.{}' targets unknown entity '{}'",
                        schema.name, relation.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    fn link_references(&mut self) -> Result<()> {
        for s in 0..self.schemas.len() {
            for p in 0..self.schemas[s].properties.len() {
                let property = &self.schemas[s].properties[p];
                if property.relation != RelationKind::ReferenceOne {
                    continue;
                }
                let target = property.related_entity.clone().unwrap_or_default();
                let key_type = self.key_type_of(&target);
                let wanted = property
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| reference_key_name(&property.name));

                let schema = &mut self.schemas[s];
                let key_name = match schema.find(&wanted) {
                    Some(existing) if existing.is_scalar() => existing.name.clone(),
                    Some(_) => {
                        return Err(OrmError::Schema(format!(
                            "foreign key '{}.{}' must be a scalar property",
                            schema.name, wanted
                        )));
                    }
                    None => {
                        debug!(entity = %schema.name, key = %wanted, "synthesizing reference key");
                        schema.properties.push(
                            PropertyDescriptor::scalar(wanted.clone(), key_type)
                                .nullable(true)
                                .synthesized(),
                        );
                        wanted
                    }
                };

                let property = &mut schema.properties[p];
                property.foreign_key = Some(key_name);
                property.data_type = key_type;
            }
        }
        Ok(())
    }

    fn link_collections(&mut self) -> Result<()> {
        let mut owners: Vec<usize> = (0..self.schemas.len()).collect();
        owners.sort_by(|a, b| self.schemas[*a].name.cmp(&self.schemas[*b].name));

        for s in owners {
            for p in 0..self.schemas[s].properties.len() {
                let owner = &self.schemas[s];
                let property = &owner.properties[p];
                if property.relation != RelationKind::ReferenceMany {
                    continue;
                }
                let owner_name = owner.name.clone();
                let key_type = self.key_type_of(&owner_name);
                let wanted = property
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| back_reference_key_name(&owner_name));
                let target_name = property.related_entity.clone().unwrap_or_default();
                let t = self.position(&target_name).ok_or_else(|| {
                    OrmError::Schema(format!("unknown collection target '{}'", target_name))
                })?;

                let target = &mut self.schemas[t];
                let key_name = match target.find(&wanted) {
                    Some(existing) if existing.is_scalar() => existing.name.clone(),
                    Some(_) => {
                        return Err(OrmError::Schema(format!(
                            "back-reference '{}.{}' must be a scalar property",
                            target.name, wanted
                        )));
                    }
                    None => {
                        debug!(entity = %target.name, key = %wanted, owner = %owner_name, "synthesizing back-reference key");
                        target.properties.push(
                            PropertyDescriptor::scalar(wanted.clone(), key_type)
                                .nullable(true)
                                .synthesized(),
                        );
                        wanted
                    }
                };

                let property = &mut self.schemas[s].properties[p];
                property.foreign_key = Some(key_name);
                property.data_type = key_type;
            }
        }
        Ok(())
    }
}

/// Checks the invariants of a single normalized schema.
pub fn validate_schema(schema: &EntitySchema) -> Result<()> {
    let mut seen = HashSet::new();
    for property in &schema.properties {
        if !seen.insert(property.name.to_ascii_lowercase()) {
            return Err(OrmError::Schema(format!(
                "property '{}.{}' is declared more than once",
                schema.name, property.name
            )));
        }
        for constraint in &property.constraints {
            if let Constraint::Pattern(pattern) = constraint {
                compile_pattern(pattern).map_err(|err| {
                    OrmError::Schema(format!(
                        "pattern on '{}.{}' does not compile: {}",
                        schema.name, property.name, err
                    ))
                })?;
            }
        }
    }

    let key = schema.primary_key_property().ok_or_else(|| {
        OrmError::Schema(format!(
            "entity '{}' has no primary key property '{}'",
            schema.name, schema.primary_key
        ))
    })?;
    if !key.is_scalar() {
        return Err(OrmError::Schema(format!(
            "primary key '{}.{}' must be a scalar",
            schema.name, key.name
        )));
    }
    if !key.data_type.is_integral() && !schema.allow_non_integral_key {
        return Err(OrmError::Schema(format!(
            "primary key '{}.{}' is {} but must be integral",
            schema.name, key.name, key.data_type
        )));
    }

    for relation in schema.relations() {
        if relation.relation == RelationKind::ReferenceOne && relation.foreign_key.is_none() {
            return Err(OrmError::Schema(format!(
                "reference '{}.{}' has no foreign key",
                schema.name, relation.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> EntitySchema {
        EntitySchema::new("Customer")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("name", DataType::Text))
            .property(PropertyDescriptor::reference_many("orders", "Order"))
    }

    fn order() -> EntitySchema {
        EntitySchema::new("Order")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::reference_one("customer", "Customer"))
    }

    #[test]
    fn test_reference_key_is_synthesized_once() {
        let mut catalog = SchemaCatalog::from_schemas([customer(), order()]).unwrap();
        catalog.normalize().unwrap();
        let order = catalog.get("Order").unwrap();
        let key = order.find("customer_id").unwrap();
        assert!(key.is_synthesized);
        assert!(key.nullable);
        assert_eq!(
            order.find("customer").unwrap().foreign_key.as_deref(),
            Some("customer_id")
        );
        // The collection on Customer resolves to the same key on Order.
        assert_eq!(
            catalog.get("Customer").unwrap().find("orders").unwrap().foreign_key.as_deref(),
            Some("customer_id")
        );

        let before = catalog.get("Order").unwrap().properties.len();
        catalog.normalize().unwrap();
        assert_eq!(catalog.get("Order").unwrap().properties.len(), before);
    }

    #[test]
    fn test_declared_key_is_linked() {
        let order = order().property(
            PropertyDescriptor::scalar("Customer_ID", DataType::Integer).nullable(true),
        );
        let mut catalog = SchemaCatalog::from_schemas([customer(), order]).unwrap();
        catalog.normalize().unwrap();
        let order = catalog.get("Order").unwrap();
        assert_eq!(order.properties.iter().filter(|p| p.is_synthesized).count(), 0);
        assert_eq!(
            order.find("customer").unwrap().foreign_key.as_deref(),
            Some("Customer_ID")
        );
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let mut catalog = SchemaCatalog::from_schemas([order()]).unwrap();
        assert!(matches!(catalog.normalize(), Err(OrmError::Schema(_))));
    }

    #[test]
    fn test_non_integral_key_needs_override() {
        let schema = EntitySchema::new("Tag")
            .primary_key("code")
            .property(PropertyDescriptor::scalar("code", DataType::Text));
        assert!(validate_schema(&schema).is_err());
        assert!(validate_schema(&schema.allow_non_integral_key(true)).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let schema = EntitySchema::new("Tag")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("ID", DataType::Integer));
        assert!(validate_schema(&schema).is_err());
    }
}
