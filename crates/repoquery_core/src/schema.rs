//! Entity schema registry.
//!
//! # Responsibility
//! - Describe each persisted entity: table, identifier and properties.
//! - Answer `properties_of(entity)` for the query resolver.
//!
//! # Invariants
//! - Every schema has exactly one `Identifier` property.
//! - `Reference` properties are the owning side and carry the foreign key
//!   column; `Collection` properties have no column and are resolved by query.
//! - Property names are unique within one schema.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Semantic type of one entity property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Identifier,
    Integer,
    Text,
    /// Many-to-one link; the column holds the target identifier.
    Reference { target: &'static str },
    /// Inverse one-to-many view over `target.mapped_by`.
    Collection {
        target: &'static str,
        mapped_by: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub column: Option<&'static str>,
    pub kind: PropertyKind,
}

impl Property {
    pub const fn id(name: &'static str, column: &'static str) -> Self {
        Self::column(name, column, PropertyKind::Identifier)
    }

    pub const fn integer(name: &'static str, column: &'static str) -> Self {
        Self::column(name, column, PropertyKind::Integer)
    }

    pub const fn text(name: &'static str, column: &'static str) -> Self {
        Self::column(name, column, PropertyKind::Text)
    }

    pub const fn reference(name: &'static str, column: &'static str, target: &'static str) -> Self {
        Self::column(name, column, PropertyKind::Reference { target })
    }

    pub const fn collection(
        name: &'static str,
        target: &'static str,
        mapped_by: &'static str,
    ) -> Self {
        Self {
            name,
            column: None,
            kind: PropertyKind::Collection { target, mapped_by },
        }
    }

    const fn column(name: &'static str, column: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            column: Some(column),
            kind,
        }
    }

    /// Association target entity, for reference and collection properties.
    pub fn target(&self) -> Option<&'static str> {
        match self.kind {
            PropertyKind::Reference { target } | PropertyKind::Collection { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, PropertyKind::Collection { .. })
    }
}

/// Mapping of one entity onto one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    properties: Vec<Property>,
}

impl EntitySchema {
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn property_by_column(&self, column: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|property| property.column.is_some_and(|value| value.eq_ignore_ascii_case(column)))
    }

    pub fn id_property(&self) -> Option<&Property> {
        self.properties
            .iter()
            .find(|property| property.kind == PropertyKind::Identifier)
    }

    /// Identifier column; schemas are validated on registration to have one.
    pub fn id_column(&self) -> &'static str {
        self.id_property()
            .and_then(|property| property.column)
            .unwrap_or("rowid")
    }

    /// Properties stored in this entity's own table, in declaration order.
    pub fn stored_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties
            .iter()
            .filter(|property| property.column.is_some())
    }

    /// Renders `alias.column AS "label", ...` for every stored property.
    ///
    /// Labels are property names, prefixed with `label_prefix.` when set.
    pub fn select_list(&self, alias: &str, label_prefix: Option<&str>) -> String {
        self.stored_properties()
            .filter_map(|property| {
                let column = property.column?;
                let label = match label_prefix {
                    Some(prefix) => format!("{prefix}.{}", property.name),
                    None => property.name.to_string(),
                };
                Some(format!("{alias}.{column} AS \"{label}\""))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Output labels produced by [`EntitySchema::select_list`].
    pub fn labels(&self, label_prefix: Option<&str>) -> Vec<String> {
        self.stored_properties()
            .map(|property| match label_prefix {
                Some(prefix) => format!("{prefix}.{}", property.name),
                None => property.name.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    DuplicateEntity(&'static str),
    MissingIdentifier(&'static str),
    DuplicateProperty {
        entity: &'static str,
        property: &'static str,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEntity(name) => write!(f, "entity already registered: {name}"),
            Self::MissingIdentifier(name) => {
                write!(f, "entity `{name}` declares no identifier property")
            }
            Self::DuplicateProperty { entity, property } => {
                write!(f, "entity `{entity}` declares property `{property}` twice")
            }
        }
    }
}

impl Error for SchemaError {}

/// Registry of entity schemas keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<&'static str, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: EntitySchema) -> Result<(), SchemaError> {
        if self.entities.contains_key(schema.name) {
            return Err(SchemaError::DuplicateEntity(schema.name));
        }
        if schema.id_property().and_then(|id| id.column).is_none() {
            return Err(SchemaError::MissingIdentifier(schema.name));
        }
        for (index, property) in schema.properties.iter().enumerate() {
            if schema.properties[..index]
                .iter()
                .any(|earlier| earlier.name == property.name)
            {
                return Err(SchemaError::DuplicateProperty {
                    entity: schema.name,
                    property: property.name,
                });
            }
        }

        self.entities.insert(schema.name, schema);
        Ok(())
    }

    pub fn get(&self, entity: &str) -> Option<&EntitySchema> {
        self.entities.get(entity)
    }

    pub fn by_table(&self, table: &str) -> Option<&EntitySchema> {
        self.entities
            .values()
            .find(|schema| schema.table.eq_ignore_ascii_case(table))
    }

    pub fn properties_of(&self, entity: &str) -> Option<&[Property]> {
        self.get(entity).map(EntitySchema::properties)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySchema, Property, SchemaError, SchemaRegistry};

    fn member() -> EntitySchema {
        EntitySchema::new("Member", "member")
            .with(Property::id("id", "member_id"))
            .with(Property::text("username", "username"))
            .with(Property::reference("team", "team_id", "Team"))
    }

    #[test]
    fn select_list_labels_columns_by_property_name() {
        let schema = member();
        assert_eq!(
            schema.select_list("m", None),
            "m.member_id AS \"id\", m.username AS \"username\", m.team_id AS \"team\""
        );
        assert_eq!(
            schema.labels(Some("members")),
            vec!["members.id", "members.username", "members.team"]
        );
    }

    #[test]
    fn register_rejects_duplicates_and_missing_identifier() {
        let mut registry = SchemaRegistry::new();
        registry.register(member()).expect("first registration");
        assert_eq!(
            registry.register(member()),
            Err(SchemaError::DuplicateEntity("Member"))
        );

        let no_id = EntitySchema::new("Orphan", "orphan").with(Property::text("name", "name"));
        assert_eq!(
            registry.register(no_id),
            Err(SchemaError::MissingIdentifier("Orphan"))
        );
        assert_eq!(registry.properties_of("Member").map(<[_]>::len), Some(3));
    }
}
