//! Schema descriptor loading and validation
//!
//! A descriptor document declares the expected schema:
//!
//! ```json
//! {
//!   "version": 3,
//!   "entity_tables": { "User": { "name": "text" } },
//!   "relationship_tables": { "FOLLOWS": { "from": "User", "to": "User", "properties": { "since": "date" } } }
//! }
//! ```
//!
//! JSON is the default format; a `.toml` extension selects TOML. Keys keep
//! their declaration order, which fixes the order of generated operations.

use super::{ColumnSpec, ColumnType, EntityTable, RelationshipTable};
use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Prefix reserved for the store's own catalog tables
pub const INTERNAL_TABLE_PREFIX: &str = "_graph_";

/// Column names the store manages itself
pub const RESERVED_COLUMNS: &[&str] = &["id", "from_id", "to_id"];

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn identifier_pattern() -> &'static Regex {
    IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("static pattern"))
}

/// Errors raised while reading or validating a schema descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("cannot read schema descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed schema descriptor {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("unknown type '{type_name}' for {location}")]
    UnknownType { location: String, type_name: String },

    #[error("invalid {kind} name '{name}'")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("column '{column}' on '{table}' is reserved")]
    ReservedColumn { table: String, column: String },

    #[error("table '{name}' is declared more than once with different definitions")]
    ConflictingTable { name: String },

    #[error("column '{column}' on '{table}' is declared as both {first} and {second}")]
    ConflictingColumn {
        table: String,
        column: String,
        first: ColumnType,
        second: ColumnType,
    },

    #[error("relationship '{name}' has the same name as an entity table")]
    NameCollision { name: String },

    #[error("relationship '{relationship}' references undeclared table '{table}'")]
    UndeclaredEndpoint { relationship: String, table: String },
}

/// The expected schema, validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    pub version: u64,
    pub entity_tables: Vec<EntityTable>,
    pub relationship_tables: Vec<RelationshipTable>,
}

impl SchemaDescriptor {
    /// Load and validate a descriptor file, logging its version and content hash.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let raw: RawDescriptor = if is_toml {
            toml::from_str(&contents).map_err(|e| DescriptorError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&contents).map_err(|e| DescriptorError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        let descriptor = raw.validate()?;
        tracing::info!(
            path = %path.display(),
            version = descriptor.version,
            hash = %descriptor.content_hash(),
            entity_tables = descriptor.entity_tables.len(),
            relationship_tables = descriptor.relationship_tables.len(),
            "schema descriptor loaded"
        );
        Ok(descriptor)
    }

    /// Parse a JSON descriptor from memory
    pub fn from_json_str(contents: &str) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor =
            serde_json::from_str(contents).map_err(|e| DescriptorError::Malformed {
                path: PathBuf::from("<inline>"),
                reason: e.to_string(),
            })?;
        raw.validate()
    }

    /// Parse a TOML descriptor from memory
    pub fn from_toml_str(contents: &str) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor = toml::from_str(contents).map_err(|e| DescriptorError::Malformed {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        raw.validate()
    }

    /// Build a descriptor from already-typed parts, applying the same validation as `load`.
    pub fn from_parts(
        version: u64,
        entity_tables: Vec<EntityTable>,
        relationship_tables: Vec<RelationshipTable>,
    ) -> Result<Self, DescriptorError> {
        let mut entities: Vec<EntityTable> = Vec::new();
        for table in entity_tables {
            check_identifier("table", &table.name)?;
            let columns = collect_columns(
                &table.name,
                table.columns.into_iter().map(|c| (c.name, c.ty)),
            )?;
            push_entity(&mut entities, EntityTable { name: table.name, columns })?;
        }

        let mut relationships: Vec<RelationshipTable> = Vec::new();
        for rel in relationship_tables {
            check_identifier("relationship", &rel.name)?;
            if entities.iter().any(|t| t.name.eq_ignore_ascii_case(&rel.name)) {
                return Err(DescriptorError::NameCollision { name: rel.name });
            }
            for endpoint in [&rel.from_table, &rel.to_table] {
                if !entities.iter().any(|t| &t.name == endpoint) {
                    return Err(DescriptorError::UndeclaredEndpoint {
                        relationship: rel.name.clone(),
                        table: endpoint.clone(),
                    });
                }
            }
            let properties = collect_columns(
                &rel.name,
                rel.properties.into_iter().map(|c| (c.name, c.ty)),
            )?;
            let rel = RelationshipTable { properties, ..rel };
            match relationships.iter().find(|r| r.name.eq_ignore_ascii_case(&rel.name)) {
                Some(existing) if *existing == rel => {}
                Some(_) => return Err(DescriptorError::ConflictingTable { name: rel.name }),
                None => relationships.push(rel),
            }
        }

        Ok(Self {
            version,
            entity_tables: entities,
            relationship_tables: relationships,
        })
    }

    /// Hex blake3 digest of the normalized descriptor.
    ///
    /// Formatting, whitespace and collapsed duplicate declarations do not
    /// change the hash; any change in tables, columns, types or version does.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_string()
    }

    pub fn entity_table(&self, name: &str) -> Option<&EntityTable> {
        self.entity_tables.iter().find(|t| t.name == name)
    }

    pub fn relationship_table(&self, name: &str) -> Option<&RelationshipTable> {
        self.relationship_tables.iter().find(|r| r.name == name)
    }
}

fn check_identifier(kind: &'static str, name: &str) -> Result<(), DescriptorError> {
    let lowered = name.to_ascii_lowercase();
    if !identifier_pattern().is_match(name)
        || lowered.starts_with(INTERNAL_TABLE_PREFIX)
        || lowered.starts_with("sqlite_")
    {
        return Err(DescriptorError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn collect_columns(
    table: &str,
    declared: impl IntoIterator<Item = (String, ColumnType)>,
) -> Result<Vec<ColumnSpec>, DescriptorError> {
    let mut columns: Vec<ColumnSpec> = Vec::new();
    for (name, ty) in declared {
        check_identifier("column", &name)?;
        if RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            return Err(DescriptorError::ReservedColumn {
                table: table.to_string(),
                column: name,
            });
        }
        // The engine treats column names case-insensitively.
        match columns.iter().find(|c| c.name.eq_ignore_ascii_case(&name)) {
            Some(existing) if existing.ty == ty && existing.name == name => {}
            Some(existing) => {
                return Err(DescriptorError::ConflictingColumn {
                    table: table.to_string(),
                    column: name,
                    first: existing.ty,
                    second: ty,
                });
            }
            None => columns.push(ColumnSpec::new(name, ty)),
        }
    }
    Ok(columns)
}

fn push_entity(entities: &mut Vec<EntityTable>, table: EntityTable) -> Result<(), DescriptorError> {
    match entities.iter().find(|t| t.name.eq_ignore_ascii_case(&table.name)) {
        Some(existing) if *existing == table => Ok(()),
        Some(_) => Err(DescriptorError::ConflictingTable { name: table.name }),
        None => {
            entities.push(table);
            Ok(())
        }
    }
}

/// Map entries in document order, duplicates included.
struct Ordered<T>(Vec<(String, T)>);

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Ordered(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Ordered<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(Ordered(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    version: u64,
    #[serde(default)]
    entity_tables: Ordered<Ordered<String>>,
    #[serde(default)]
    relationship_tables: Ordered<RawRelationship>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelationship {
    from: String,
    to: String,
    #[serde(default)]
    properties: Ordered<String>,
}

fn parse_columns(owner: &str, raw: Ordered<String>) -> Result<Vec<ColumnSpec>, DescriptorError> {
    raw.0
        .into_iter()
        .map(|(name, type_name)| {
            let ty = type_name.parse::<ColumnType>().map_err(|_| DescriptorError::UnknownType {
                location: format!("'{}.{}'", owner, name),
                type_name,
            })?;
            Ok(ColumnSpec::new(name, ty))
        })
        .collect()
}

impl RawDescriptor {
    fn validate(self) -> Result<SchemaDescriptor, DescriptorError> {
        let entities = self
            .entity_tables
            .0
            .into_iter()
            .map(|(name, columns)| {
                let columns = parse_columns(&name, columns)?;
                Ok(EntityTable { name, columns })
            })
            .collect::<Result<Vec<_>, DescriptorError>>()?;

        let relationships = self
            .relationship_tables
            .0
            .into_iter()
            .map(|(name, raw)| {
                let properties = parse_columns(&name, raw.properties)?;
                Ok(RelationshipTable {
                    name,
                    from_table: raw.from,
                    to_table: raw.to,
                    properties,
                })
            })
            .collect::<Result<Vec<_>, DescriptorError>>()?;

        SchemaDescriptor::from_parts(self.version, entities, relationships)
    }
}
