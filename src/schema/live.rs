//! Live schema introspection

use super::descriptor::{INTERNAL_TABLE_PREFIX, RESERVED_COLUMNS};
use super::ColumnType;
use crate::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;

/// A column as it exists in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub declared_type: String,
    /// `None` when the declared type is not one of the primitive types
    pub ty: Option<ColumnType>,
}

/// A relationship table as it exists in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRelationship {
    pub from_table: String,
    pub to_table: String,
    pub properties: Vec<LiveColumn>,
}

/// The schema currently present in the store.
///
/// May contain tables and columns the descriptor no longer mentions; those
/// are reported here and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchemaSnapshot {
    pub entity_tables: BTreeMap<String, Vec<LiveColumn>>,
    pub relationship_tables: BTreeMap<String, LiveRelationship>,
}

impl LiveSchemaSnapshot {
    /// Read the current schema from an open connection
    pub fn introspect(conn: &Connection) -> Result<Self> {
        let mut relationships: BTreeMap<String, (String, String)> = BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT name, from_table, to_table FROM _graph_relationships")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (name, from, to) = row?;
                relationships.insert(name, (from, to));
            }
        }

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut snapshot = Self::default();
        for table in tables {
            if table.to_ascii_lowercase().starts_with(INTERNAL_TABLE_PREFIX) {
                continue;
            }
            let columns = table_columns(conn, &table)?;
            match relationships.remove(&table) {
                Some((from_table, to_table)) => {
                    snapshot.relationship_tables.insert(
                        table,
                        LiveRelationship {
                            from_table,
                            to_table,
                            properties: columns,
                        },
                    );
                }
                None => {
                    snapshot.entity_tables.insert(table, columns);
                }
            }
        }

        if !relationships.is_empty() {
            tracing::warn!(
                missing = ?relationships.keys().collect::<Vec<_>>(),
                "relationship catalog lists tables that do not exist"
            );
        }

        Ok(snapshot)
    }

    pub fn has_entity_table(&self, name: &str) -> bool {
        self.entity_tables.keys().any(|t| t.eq_ignore_ascii_case(name))
    }

    pub fn has_relationship_table(&self, name: &str) -> bool {
        self.relationship_tables.keys().any(|t| t.eq_ignore_ascii_case(name))
    }

    /// Whether any table, entity or relationship, has this name
    pub fn has_table(&self, name: &str) -> bool {
        self.has_entity_table(name) || self.has_relationship_table(name)
    }

    /// Columns of an entity table or properties of a relationship table
    pub fn columns(&self, table: &str) -> Option<&[LiveColumn]> {
        self.entity_tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, cols)| cols.as_slice())
            .or_else(|| {
                self.relationship_tables
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(table))
                    .map(|(_, rel)| rel.properties.as_slice())
            })
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|cols| cols.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
    }

    /// True when every table, relationship and column here also exists,
    /// with the same declared type, in `other`.
    pub fn is_subset_of(&self, other: &LiveSchemaSnapshot) -> bool {
        let entities_kept = self.entity_tables.iter().all(|(name, cols)| {
            other
                .entity_tables
                .get(name)
                .is_some_and(|after| columns_kept(cols, after))
        });
        let relationships_kept = self.relationship_tables.iter().all(|(name, rel)| {
            other.relationship_tables.get(name).is_some_and(|after| {
                after.from_table == rel.from_table
                    && after.to_table == rel.to_table
                    && columns_kept(&rel.properties, &after.properties)
            })
        });
        entities_kept && relationships_kept
    }

    pub fn table_count(&self) -> usize {
        self.entity_tables.len() + self.relationship_tables.len()
    }
}

fn columns_kept(before: &[LiveColumn], after: &[LiveColumn]) -> bool {
    before.iter().all(|col| after.iter().any(|a| a == col))
}

/// User-visible columns of a table, in engine column order
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveColumn>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        let (name, declared_type) = row?;
        if RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            continue;
        }
        columns.push(LiveColumn {
            ty: ColumnType::from_declared(&declared_type),
            name,
            declared_type,
        });
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::AdditiveDdl;
    use crate::schema::{ColumnSpec, EntityTable, RelationshipTable};
    use crate::storage::GraphStore;

    #[test]
    fn test_empty_store_has_no_user_tables() {
        let store = GraphStore::open_in_memory().unwrap();
        let snapshot = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
        assert_eq!(snapshot.table_count(), 0);
    }

    #[test]
    fn test_introspect_classifies_tables() {
        let store = GraphStore::open_in_memory().unwrap();
        store
            .create_entity_table(&EntityTable::new("User").column("name", ColumnType::Text))
            .unwrap();
        store
            .create_relationship_table(
                &RelationshipTable::new("FOLLOWS", "User", "User").property("since", ColumnType::Date),
            )
            .unwrap();
        store
            .conn()
            .execute("CREATE TABLE legacy (id INTEGER PRIMARY KEY, blob_col BLOB)", [])
            .unwrap();

        let snapshot = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
        assert!(snapshot.has_entity_table("User"));
        assert!(snapshot.has_entity_table("legacy"));
        assert!(snapshot.has_relationship_table("FOLLOWS"));
        assert!(!snapshot.has_entity_table("FOLLOWS"));

        let user = &snapshot.entity_tables["User"];
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].ty, Some(ColumnType::Text));

        let follows = &snapshot.relationship_tables["FOLLOWS"];
        assert_eq!(follows.from_table, "User");
        assert_eq!(follows.properties[0].name, "since");

        let legacy = &snapshot.entity_tables["legacy"];
        assert_eq!(legacy[0].declared_type, "BLOB");
        assert_eq!(legacy[0].ty, None);
    }

    #[test]
    fn test_subset_detects_removed_column() {
        let store = GraphStore::open_in_memory().unwrap();
        store
            .create_entity_table(&EntityTable::new("Widget").column("name", ColumnType::Text))
            .unwrap();
        let before = LiveSchemaSnapshot::introspect(store.conn()).unwrap();

        store.add_column("Widget", &ColumnSpec::new("color", ColumnType::Text)).unwrap();
        let after = LiveSchemaSnapshot::introspect(store.conn()).unwrap();
        assert!(before.is_subset_of(&after));
        assert!(!after.is_subset_of(&before));
        assert!(after.has_column("widget", "COLOR"));
    }
}
