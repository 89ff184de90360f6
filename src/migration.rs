//! Migration Applier - executes a schema diff against the store
//!
//! Only three primitives exist: create entity table, create relationship table,
//! add column. An "already exists" failure (another process won a startup
//! race) counts as done. Any other failure stops the run.

use crate::schema::{ColumnSpec, EntityTable, MigrationOp, RelationshipTable, SchemaDiff};
use crate::{Error, Result};

/// The additive DDL surface of a storage engine
pub trait AdditiveDdl {
    fn create_entity_table(&self, table: &EntityTable) -> rusqlite::Result<()>;
    fn create_relationship_table(&self, rel: &RelationshipTable) -> rusqlite::Result<()>;
    fn add_column(&self, table: &str, column: &ColumnSpec) -> rusqlite::Result<()>;
}

/// Outcome of applying a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations that changed the schema
    pub applied: usize,
    /// Operations whose target already existed
    pub already_present: usize,
    /// Descriptions of the operations that changed the schema, in execution order
    pub operations: Vec<String>,
    /// Descriptions of the operations whose target already existed
    pub present_operations: Vec<String>,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.applied + self.already_present
    }
}

/// Whether an engine error means the structure is already there
pub fn is_already_exists(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            msg.contains("already exists") || msg.contains("duplicate column name")
        }
        _ => false,
    }
}

/// Apply every operation of `diff` in order
pub fn apply<D: AdditiveDdl + ?Sized>(ddl: &D, diff: &SchemaDiff) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    for op in diff.operations() {
        let description = op.describe();
        let outcome = match &op {
            MigrationOp::CreateEntityTable(table) => ddl.create_entity_table(table),
            MigrationOp::AddColumn(missing) => ddl.add_column(&missing.table, &missing.column),
            MigrationOp::CreateRelationshipTable(rel) => ddl.create_relationship_table(rel),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(operation = %description, "applied schema change");
                report.applied += 1;
                report.operations.push(description);
            }
            Err(e) if is_already_exists(&e) => {
                tracing::info!(operation = %description, "schema change already present");
                report.already_present += 1;
                report.present_operations.push(description);
            }
            Err(source) => {
                tracing::error!(operation = %description, error = %source, "schema change failed");
                return Err(Error::Reconciliation {
                    operation: description,
                    source,
                });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, LiveSchemaSnapshot, SchemaDescriptor, compute_diff};
    use crate::storage::GraphStore;
    use std::cell::Cell;

    /// Fails with a generic engine error once `limit` operations have run
    struct FailAfter<'a> {
        inner: &'a GraphStore,
        limit: usize,
        calls: Cell<usize>,
    }

    impl FailAfter<'_> {
        fn gate(&self) -> rusqlite::Result<()> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n >= self.limit {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                    Some("disk I/O error".into()),
                ));
            }
            Ok(())
        }
    }

    impl AdditiveDdl for FailAfter<'_> {
        fn create_entity_table(&self, table: &EntityTable) -> rusqlite::Result<()> {
            self.gate()?;
            self.inner.create_entity_table(table)
        }
        fn create_relationship_table(&self, rel: &RelationshipTable) -> rusqlite::Result<()> {
            self.gate()?;
            self.inner.create_relationship_table(rel)
        }
        fn add_column(&self, table: &str, column: &ColumnSpec) -> rusqlite::Result<()> {
            self.gate()?;
            self.inner.add_column(table, column)
        }
    }

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor::from_json_str(
            r#"{
                "version": 1,
                "entity_tables": {"User": {"name": "text"}, "Widget": {"name": "text"}},
                "relationship_tables": {"OWNS": {"from": "User", "to": "Widget"}}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_apply_then_idempotent() {
        let store = GraphStore::open_in_memory().unwrap();
        let desc = descriptor();

        let live = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
        let report = apply(&store, &compute_diff(&desc, &live)).unwrap();
        assert_eq!(report.applied, 3);

        let live = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
        let second = compute_diff(&desc, &live);
        assert!(second.is_empty());
        assert_eq!(apply(&store, &second).unwrap().total(), 0);
    }

    #[test]
    fn test_reapplying_stale_diff_counts_as_present() {
        let store = GraphStore::open_in_memory().unwrap();
        let desc = descriptor();
        let diff = compute_diff(&desc, &LiveSchemaSnapshot::introspect(store.conn()).unwrap());

        apply(&store, &diff).unwrap();
        // Same diff again, as a racing process would see it.
        let report = apply(&store, &diff).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.already_present, 3);
        assert!(report.operations.is_empty());
        assert_eq!(report.present_operations.len(), 3);
        assert_eq!(report.present_operations[0], diff.operations()[0].describe());
    }

    #[test]
    fn test_fault_never_leaves_orphaned_relationship() {
        let desc = descriptor();
        for limit in 0..3 {
            let store = GraphStore::open_in_memory().unwrap();
            let diff = compute_diff(&desc, &LiveSchemaSnapshot::introspect(store.conn()).unwrap());
            let faulty = FailAfter {
                inner: &store,
                limit,
                calls: Cell::new(0),
            };

            let err = apply(&faulty, &diff).unwrap_err();
            assert!(matches!(err, Error::Reconciliation { .. }));

            let live = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
            assert_eq!(live.table_count(), limit);
            for rel in live.relationship_tables.values() {
                assert!(live.has_entity_table(&rel.from_table));
                assert!(live.has_entity_table(&rel.to_table));
            }
        }
    }

    #[test]
    fn test_already_exists_classification() {
        let store = GraphStore::open_in_memory().unwrap();
        let table = EntityTable::new("User").column("name", ColumnType::Text);
        store.create_entity_table(&table).unwrap();
        assert!(is_already_exists(&store.create_entity_table(&table).unwrap_err()));
        assert!(is_already_exists(
            &store.add_column("User", &ColumnSpec::new("name", ColumnType::Text)).unwrap_err()
        ));
        assert!(!is_already_exists(
            &store.add_column("Nope", &ColumnSpec::new("x", ColumnType::Text)).unwrap_err()
        ));
    }
}
