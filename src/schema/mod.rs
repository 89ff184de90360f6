//! Schema model - declared and live shapes of the graph store
//!
//! The graph store holds two kinds of tables:
//! - Entity tables: typed columns keyed by an implicit `id`
//! - Relationship tables: `from_id`/`to_id` endpoints plus typed properties
//!
//! Every column carries one of six primitive types; anything else is rejected.

pub mod descriptor;
pub mod diff;
pub mod live;

pub use descriptor::{DescriptorError, SchemaDescriptor};
pub use diff::{compute_diff, MigrationOp, MissingColumn, SchemaDiff, TableKind};
pub use live::{LiveColumn, LiveRelationship, LiveSchemaSnapshot};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Primitive column and property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
}

impl ColumnType {
    /// Name used in schema descriptor documents
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
        }
    }

    /// Declared type written into the storage engine DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Date => "DATE",
        }
    }

    /// Map a declared engine type back to a primitive type.
    ///
    /// Returns `None` for declared types this crate never writes; those columns
    /// still count as present but carry no primitive type.
    pub fn from_declared(declared: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|ty| ty.sql_type().eq_ignore_ascii_case(declared.trim()))
    }

    pub fn all() -> &'static [ColumnType] {
        &[
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Date,
        ]
    }
}

impl FromStr for ColumnType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| DescriptorError::UnknownType {
                location: String::new(),
                type_name: s.to_string(),
            })
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, typed column (or relationship property).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// An entity table with its columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTable {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl EntityTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnSpec::new(name, ty));
        self
    }
}

/// A relationship table connecting two entity tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTable {
    pub name: String,
    pub from_table: String,
    pub to_table: String,
    pub properties: Vec<ColumnSpec>,
}

impl RelationshipTable {
    pub fn new(
        name: impl Into<String>,
        from_table: impl Into<String>,
        to_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_table: from_table.into(),
            to_table: to_table.into(),
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.properties.push(ColumnSpec::new(name, ty));
        self
    }
}
