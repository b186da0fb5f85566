use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::core::{DataType, OrmError, Result, Value};
use crate::schema::{Constraint, EntitySchema, RelationKind, validate_schema};

lazy_static::lazy_static! {
    static ref SYNTHESIS_CACHE: Mutex<HashMap<String, Arc<ProxyType>>> = Mutex::new(HashMap::new());
}

/// Where a field's value is stored inside a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldSlot {
    /// A field of the plain struct, reached through its accessor table.
    Declared(usize),
    /// A key added by the schema pass, stored next to the struct.
    Shadow(usize),
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub slot: FieldSlot,
    pub default_value: Option<Value>,
    /// Textual field with no default: construction fills `""` when it is null.
    pub backfill_text: bool,
    pub is_key: bool,
    pub is_synthesized: bool,
    pub constraints: Vec<Constraint>,
    /// The `ReferenceOne` relation this field is the foreign key of.
    pub reference: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RelationBinding {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Owning key for a reference; back-reference on the target for a collection.
    pub foreign_key: String,
    /// Field index of the owning key. Set for references only.
    pub key_field: Option<usize>,
}

/// Column and relation shape handed to the query layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub entity: String,
    pub qualified_name: String,
    pub primary_key: String,
    pub columns: Vec<ManifestColumn>,
    pub relations: Vec<ManifestRelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestColumn {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub synthesized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestRelation {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub foreign_key: String,
}

/// Everything a proxy needs to know about its entity, derived once from a
/// normalized [`EntitySchema`].
///
/// Fields are the scalar properties in declaration order, followed by the
/// keys the schema pass appended. Name lookups are case-insensitive.
#[derive(Debug)]
pub struct ProxyType {
    entity: String,
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
    declared: Vec<usize>,
    shadow_count: usize,
    key_index: usize,
    relations: Vec<RelationBinding>,
    relation_index: HashMap<String, usize>,
    columns: Vec<String>,
    manifest: Manifest,
}

impl ProxyType {
    /// Builds the proxy type for `schema`. Pure: the same schema always yields
    /// the same field order, slots and manifest.
    pub fn synthesize(schema: &EntitySchema) -> Result<Self> {
        validate_schema(schema)?;

        let mut fields = Vec::new();
        let mut declared = Vec::new();
        let mut shadow_count = 0;

        for property in schema.scalars() {
            let slot = if property.is_synthesized {
                shadow_count += 1;
                FieldSlot::Shadow(shadow_count - 1)
            } else {
                declared.push(fields.len());
                FieldSlot::Declared(declared.len() - 1)
            };

            if let Some(default) = &property.default_value {
                if !property.data_type.is_compatible(default) {
                    return Err(OrmError::Schema(format!(
                        "default {} of '{}.{}' is not a {}",
                        default, schema.name, property.name, property.data_type
                    )));
                }
            }

            let is_key = property.matches_name(&schema.primary_key);
            fields.push(FieldSpec {
                name: property.name.clone(),
                data_type: property.data_type,
                nullable: property.nullable,
                slot,
                default_value: property.default_value.clone(),
                backfill_text: property.data_type.is_textual()
                    && !is_key
                    && !property.is_synthesized
                    && property.default_value.is_none(),
                is_key,
                is_synthesized: property.is_synthesized,
                constraints: property.constraints.clone(),
                reference: None,
            });
        }

        let index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.to_ascii_lowercase(), i))
            .collect();

        let key_index = *index
            .get(&schema.primary_key.to_ascii_lowercase())
            .ok_or_else(|| {
                OrmError::Schema(format!("primary key of '{}' is not a scalar", schema.name))
            })?;

        let mut relations = Vec::new();
        for property in schema.relations() {
            let foreign_key = property.foreign_key.clone().ok_or_else(|| {
                OrmError::Schema(format!(
                    "relation '{}.{}' was not normalized",
                    schema.name, property.name
                ))
            })?;

            let key_field = if property.relation == RelationKind::ReferenceOne {
                let i = *index.get(&foreign_key.to_ascii_lowercase()).ok_or_else(|| {
                    OrmError::Schema(format!(
                        "foreign key '{}' of '{}.{}' is missing",
                        foreign_key, schema.name, property.name
                    ))
                })?;
                fields[i].reference = Some(relations.len());
                Some(i)
            } else {
                None
            };

            relations.push(RelationBinding {
                name: property.name.clone(),
                kind: property.relation,
                target: property.related_entity.clone().unwrap_or_default(),
                foreign_key,
                key_field,
            });
        }

        let relation_index = relations
            .iter()
            .enumerate()
            .map(|(r, b)| (b.name.to_ascii_lowercase(), r))
            .collect();

        let columns = fields.iter().map(|f| f.name.clone()).collect();
        let manifest = Manifest {
            entity: schema.name.clone(),
            qualified_name: schema.qualified_name(),
            primary_key: fields[key_index].name.clone(),
            columns: fields
                .iter()
                .map(|f| ManifestColumn {
                    name: f.name.clone(),
                    data_type: f.data_type,
                    nullable: f.nullable,
                    primary_key: f.is_key,
                    synthesized: f.is_synthesized,
                    default: f.default_value.clone(),
                })
                .collect(),
            relations: relations
                .iter()
                .map(|b| ManifestRelation {
                    name: b.name.clone(),
                    kind: b.kind,
                    target: b.target.clone(),
                    foreign_key: b.foreign_key.clone(),
                })
                .collect(),
        };

        Ok(Self {
            entity: schema.name.clone(),
            fields,
            index,
            declared,
            shadow_count,
            key_index,
            relations,
            relation_index,
            columns,
            manifest,
        })
    }

    /// Like [`ProxyType::synthesize`], but returns the process-wide shared
    /// instance for schemas that were synthesized before.
    pub fn synthesize_shared(schema: &EntitySchema) -> Result<Arc<Self>> {
        let key = serde_json::to_string(schema)?;
        let mut cache = SYNTHESIS_CACHE.lock()?;
        if let Some(existing) = cache.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let synthesized = Arc::new(Self::synthesize(schema)?);
        debug!(entity = %schema.name, fields = synthesized.fields.len(), "synthesized proxy type");
        cache.insert(key, Arc::clone(&synthesized));
        Ok(synthesized)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldSpec> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_ascii_lowercase()).copied()
    }

    /// Like [`ProxyType::index_of`], failing with `UnknownField`.
    pub fn require_index(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| OrmError::UnknownField(name.to_string(), self.entity.clone()))
    }

    /// Field index of the `k`-th declared field.
    pub fn declared_field(&self, k: usize) -> Option<usize> {
        self.declared.get(k).copied()
    }

    pub fn declared_count(&self) -> usize {
        self.declared.len()
    }

    pub fn shadow_count(&self) -> usize {
        self.shadow_count
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn key_field(&self) -> &FieldSpec {
        &self.fields[self.key_index]
    }

    pub fn relations(&self) -> &[RelationBinding] {
        &self.relations
    }

    pub fn relation(&self, r: usize) -> Option<&RelationBinding> {
        self.relations.get(r)
    }

    pub fn relation_index_of(&self, name: &str) -> Option<usize> {
        self.relation_index.get(&name.to_ascii_lowercase()).copied()
    }

    /// Column order of value bags and fetch requests.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyDescriptor, SchemaCatalog};

    fn normalized() -> Vec<EntitySchema> {
        let customer = EntitySchema::new("Customer")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("name", DataType::Text))
            .property(PropertyDescriptor::reference_many("orders", "Order"));
        let order = EntitySchema::new("Order")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("status", DataType::Text).default_value("open"))
            .property(PropertyDescriptor::reference_one("customer", "Customer"));
        let mut catalog = SchemaCatalog::from_schemas([customer, order]).unwrap();
        catalog.normalize().unwrap();
        catalog.into_schemas()
    }

    #[test]
    fn test_field_layout() {
        let schemas = normalized();
        let order = ProxyType::synthesize(&schemas[1]).unwrap();

        assert_eq!(order.columns(), ["id", "status", "customer_id"]);
        assert_eq!(order.field(0).unwrap().slot, FieldSlot::Declared(0));
        assert_eq!(order.field(2).unwrap().slot, FieldSlot::Shadow(0));
        assert_eq!(order.key_index(), 0);
        assert_eq!(order.index_of("CUSTOMER_ID"), Some(2));
        assert!(!order.field(1).unwrap().backfill_text);

        let reference = order.relation(0).unwrap();
        assert_eq!(reference.key_field, Some(2));
        assert_eq!(order.field(2).unwrap().reference, Some(0));

        let customer = ProxyType::synthesize(&schemas[0]).unwrap();
        assert!(customer.field(1).unwrap().backfill_text);
        assert_eq!(customer.relation(0).unwrap().key_field, None);
    }

    #[test]
    fn test_unknown_field() {
        let schemas = normalized();
        let order = ProxyType::synthesize(&schemas[1]).unwrap();
        assert!(matches!(
            order.require_index("missing"),
            Err(OrmError::UnknownField(field, entity)) if field == "missing" && entity == "Order"
        ));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let schemas = normalized();
        let a = ProxyType::synthesize(&schemas[1]).unwrap();
        let b = ProxyType::synthesize(&schemas[1]).unwrap();
        assert_eq!(a.manifest(), b.manifest());
        assert_eq!(
            serde_json::to_string(a.manifest()).unwrap(),
            serde_json::to_string(b.manifest()).unwrap()
        );

        let shared = ProxyType::synthesize_shared(&schemas[1]).unwrap();
        let again = ProxyType::synthesize_shared(&schemas[1]).unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
    }

    #[test]
    fn test_unnormalized_schema_is_rejected() {
        let order = EntitySchema::new("Order")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::reference_one("customer", "Customer"));
        assert!(ProxyType::synthesize(&order).is_err());
    }

    #[test]
    fn test_incompatible_default_is_rejected() {
        let schema = EntitySchema::new("Tag")
            .property(PropertyDescriptor::scalar("id", DataType::Integer))
            .property(PropertyDescriptor::scalar("weight", DataType::Integer).default_value("heavy"));
        assert!(matches!(ProxyType::synthesize(&schema), Err(OrmError::Schema(_))));
    }
}
