//! Storage Layer - SQLite-backed graph store
//!
//! A database is a directory holding `graph.db`. Inside it:
//! - one table per entity type: (id, <typed columns>)
//! - one table per relationship type: (id, from_id, to_id, <typed properties>)
//! - _graph_relationships(name, from_table, to_table)
//! - _graph_schema_state(version, content_hash, reconciled_at)

pub mod schema;
pub mod sqlite;

pub use sqlite::{GraphStore, SchemaState, DATABASE_FILE};
