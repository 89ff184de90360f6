//! Schema diff - strictly additive operations that bring the live schema up to the descriptor
//!
//! Operation order is fixed:
//! 1. missing entity tables (descriptor order)
//! 2. missing columns on tables that already exist (descriptor order)
//! 3. missing relationship tables, once both endpoints exist or are scheduled
//!
//! Nothing is ever dropped, renamed or retyped. A column whose type drifted
//! from the descriptor is left alone.

use super::{ColumnSpec, EntityTable, LiveSchemaSnapshot, RelationshipTable, SchemaDescriptor};
use crate::config::ReconcileScope;

/// Whether a table holds entities or relationships
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Entity,
    Relationship,
}

/// A column (or relationship property) the live table lacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingColumn {
    pub table: String,
    pub kind: TableKind,
    pub column: ColumnSpec,
}

/// A single additive schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOp {
    CreateEntityTable(EntityTable),
    AddColumn(MissingColumn),
    CreateRelationshipTable(RelationshipTable),
}

impl MigrationOp {
    /// Short human-readable form used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            MigrationOp::CreateEntityTable(t) => format!("create entity table {}", t.name),
            MigrationOp::AddColumn(m) => {
                format!("add column {}.{} ({})", m.table, m.column.name, m.column.ty)
            }
            MigrationOp::CreateRelationshipTable(r) => format!(
                "create relationship table {} ({} -> {})",
                r.name, r.from_table, r.to_table
            ),
        }
    }
}

impl std::fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Everything the live schema is missing. Computed fresh on every startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub missing_entity_tables: Vec<EntityTable>,
    pub missing_columns: Vec<MissingColumn>,
    pub missing_relationship_tables: Vec<RelationshipTable>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.missing_entity_tables.len()
            + self.missing_columns.len()
            + self.missing_relationship_tables.len()
    }

    /// Operations in dependency-safe execution order
    pub fn operations(&self) -> Vec<MigrationOp> {
        let mut ops = Vec::with_capacity(self.len());
        ops.extend(
            self.missing_entity_tables
                .iter()
                .cloned()
                .map(MigrationOp::CreateEntityTable),
        );
        ops.extend(self.missing_columns.iter().cloned().map(MigrationOp::AddColumn));
        ops.extend(
            self.missing_relationship_tables
                .iter()
                .cloned()
                .map(MigrationOp::CreateRelationshipTable),
        );
        ops
    }

    /// Keep only the part of the diff the configured scope allows.
    ///
    /// Relationship creations whose endpoints drop out of scope (and are not
    /// live) are removed too, so no relationship can reference a missing table.
    pub fn restrict(mut self, scope: ReconcileScope, live: &LiveSchemaSnapshot) -> Self {
        match scope {
            ReconcileScope::All => {}
            ReconcileScope::EntitiesOnly => {
                self.missing_columns.retain(|m| m.kind == TableKind::Entity);
                self.missing_relationship_tables.clear();
            }
            ReconcileScope::RelationshipsOnly => {
                self.missing_entity_tables.clear();
                self.missing_columns.retain(|m| m.kind == TableKind::Relationship);
            }
        }

        let scheduled = &self.missing_entity_tables;
        self.missing_relationship_tables.retain(|rel| {
            let ready = endpoints_available(rel, live, scheduled);
            if !ready {
                tracing::warn!(
                    relationship = %rel.name,
                    from = %rel.from_table,
                    to = %rel.to_table,
                    "skipping relationship table: endpoint tables do not exist yet"
                );
            }
            ready
        });
        self
    }
}

fn endpoints_available(
    rel: &RelationshipTable,
    live: &LiveSchemaSnapshot,
    scheduled: &[EntityTable],
) -> bool {
    [&rel.from_table, &rel.to_table].into_iter().all(|endpoint| {
        live.has_entity_table(endpoint) || scheduled.iter().any(|t| &t.name == endpoint)
    })
}

/// Compare the descriptor against the live schema.
pub fn compute_diff(descriptor: &SchemaDescriptor, live: &LiveSchemaSnapshot) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for table in &descriptor.entity_tables {
        if live.has_entity_table(&table.name) {
            push_missing_columns(&mut diff, &table.name, TableKind::Entity, &table.columns, live);
        } else if live.has_relationship_table(&table.name) {
            tracing::warn!(
                table = %table.name,
                "declared entity table exists as a relationship table; leaving it untouched"
            );
        } else {
            diff.missing_entity_tables.push(table.clone());
        }
    }

    for rel in &descriptor.relationship_tables {
        if live.has_relationship_table(&rel.name) {
            push_missing_columns(&mut diff, &rel.name, TableKind::Relationship, &rel.properties, live);
        } else if live.has_entity_table(&rel.name) {
            tracing::warn!(
                relationship = %rel.name,
                "declared relationship table exists as an entity table; leaving it untouched"
            );
        } else {
            diff.missing_relationship_tables.push(rel.clone());
        }
    }

    diff.restrict(ReconcileScope::All, live)
}

fn push_missing_columns(
    diff: &mut SchemaDiff,
    table: &str,
    kind: TableKind,
    declared: &[ColumnSpec],
    live: &LiveSchemaSnapshot,
) {
    for column in declared {
        if !live.has_column(table, &column.name) {
            diff.missing_columns.push(MissingColumn {
                table: table.to_string(),
                kind,
                column: column.clone(),
            });
        }
    }
}
