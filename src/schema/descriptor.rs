use serde::{Deserialize, Serialize};

use crate::core::{DataType, Value};

/// How a property relates to other entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Scalar,
    ReferenceOne,
    ReferenceMany,
}

impl RelationKind {
    pub fn is_relation(&self) -> bool {
        !matches!(self, Self::Scalar)
    }
}

/// A declared per-property constraint checked by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Range { min: Option<f64>, max: Option<f64> },
    Pattern(String),
}

/// Describes one persistent property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
    pub relation: RelationKind,
    /// Target entity name for relation properties.
    #[serde(default)]
    pub related_entity: Option<String>,
    /// For `ReferenceOne`: the owning foreign-key field.
    /// For `ReferenceMany`: the back-reference field on the target.
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Set for fields added by the schema pass rather than declared by the user.
    #[serde(default)]
    pub is_synthesized: bool,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl PropertyDescriptor {
    pub fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            relation: RelationKind::Scalar,
            related_entity: None,
            foreign_key: None,
            default_value: None,
            is_synthesized: false,
            constraints: Vec::new(),
        }
    }

    /// A single reference to `target`. The data type describes the foreign key.
    pub fn reference_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relation: RelationKind::ReferenceOne,
            related_entity: Some(target.into()),
            nullable: true,
            ..Self::scalar(name, DataType::Integer)
        }
    }

    pub fn reference_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relation: RelationKind::ReferenceMany,
            related_entity: Some(target.into()),
            nullable: true,
            ..Self::scalar(name, DataType::Integer)
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn foreign_key(mut self, name: impl Into<String>) -> Self {
        self.foreign_key = Some(name.into());
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn synthesized(mut self) -> Self {
        self.is_synthesized = true;
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.relation == RelationKind::Scalar
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Passive description of a persistent entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub primary_key: String,
    #[serde(default)]
    pub allow_non_integral_key: bool,
    pub properties: Vec<PropertyDescriptor>,
}

impl EntitySchema {
    /// Creates an empty schema whose primary key defaults to `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            primary_key: "id".to_string(),
            allow_non_integral_key: false,
            properties: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn allow_non_integral_key(mut self, allow: bool) -> Self {
        self.allow_non_integral_key = allow;
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Namespace-qualified name, e.g. `sales.Order`.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.matches_name(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PropertyDescriptor> {
        self.properties.iter_mut().find(|p| p.matches_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn primary_key_property(&self) -> Option<&PropertyDescriptor> {
        self.find(&self.primary_key)
    }

    pub fn scalars(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_scalar())
    }

    pub fn relations(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.relation.is_relation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder() {
        let schema = EntitySchema::new("Order")
            .namespace("sales")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("Title", DataType::Text))
            .property(PropertyDescriptor::reference_one("customer", "Customer"));

        assert_eq!(schema.qualified_name(), "sales.Order");
        assert!(schema.contains("title"));
        assert_eq!(schema.scalars().count(), 2);
        assert_eq!(schema.relations().count(), 1);
        assert_eq!(schema.primary_key_property().unwrap().name, "id");
    }

    #[test]
    fn test_schema_json_shape() {
        let schema = EntitySchema::new("Tag")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("label", DataType::Text).default_value("new"));
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: EntitySchema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
    }
}
