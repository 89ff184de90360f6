//! SQLite storage implementation

use std::path::{Path, PathBuf};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use crate::migration::AdditiveDdl;
use crate::schema::{ColumnSpec, EntityTable, RelationshipTable};
use crate::{Error, Result};
use super::schema::{self, quote_ident};

/// File name of the engine database inside a database directory
pub const DATABASE_FILE: &str = "graph.db";

/// One open engine handle on a database directory
pub struct GraphStore {
    conn: Connection,
    dir: PathBuf,
}

/// Last reconciled descriptor, as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaState {
    pub version: u64,
    pub content_hash: String,
    pub reconciled_at: String,
}

impl GraphStore {
    /// Open a database directory (creates it if it doesn't exist) and ensure the catalog exists
    pub fn open(dir: &Path) -> Result<Self> {
        let store = Self::connect(dir)?;
        store.initialize_catalog().map_err(|e| open_error(dir, e))?;
        Ok(store)
    }

    /// Whether `dir` already holds a database file. Creates nothing.
    pub fn exists(dir: &Path) -> bool {
        dir.join(DATABASE_FILE).is_file()
    }

    /// Open a handle without touching the catalog.
    ///
    /// The count query is what turns a corrupt file into an open failure;
    /// SQLite itself defers reading the header until the first statement.
    pub fn connect(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| open_error(dir, e))?;
        let conn = Connection::open(dir.join(DATABASE_FILE)).map_err(|e| open_error(dir, e))?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| open_error(dir, e))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| open_error(dir, e))?;
        Ok(Self {
            conn,
            dir: dir.to_path_buf(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self {
            conn,
            dir: PathBuf::from(":memory:"),
        };
        store.initialize_catalog()?;
        Ok(store)
    }

    /// Initialize the internal catalog tables
    fn initialize_catalog(&self) -> rusqlite::Result<()> {
        for stmt in schema::all_catalog_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Close the handle, reporting any error the engine raises on close
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Storage(e))
    }

    // ========== Reconciliation State ==========

    /// Get the last reconciled descriptor version and hash
    pub fn load_state(&self) -> Result<Option<SchemaState>> {
        self.conn
            .query_row(
                "SELECT version, content_hash, reconciled_at FROM _graph_schema_state WHERE id = 1",
                [],
                |row| {
                    Ok(SchemaState {
                        version: row.get::<_, i64>(0)? as u64,
                        content_hash: row.get(1)?,
                        reconciled_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Record the descriptor the live schema was reconciled against
    pub fn record_state(&self, version: u64, content_hash: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO _graph_schema_state (id, version, content_hash, reconciled_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                content_hash = excluded.content_hash,
                reconciled_at = excluded.reconciled_at
            "#,
            params![version as i64, content_hash, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ========== Data Operations ==========

    /// Insert a row into an entity table, returning its id
    pub fn insert_node(&self, table: &str, values: &[(&str, Value)]) -> Result<i64> {
        self.insert_row(table, values.iter().map(|(c, v)| (*c, v.clone())).collect())
    }

    /// Insert a relationship row between two entity ids
    pub fn insert_edge(
        &self,
        relationship: &str,
        from_id: i64,
        to_id: i64,
        properties: &[(&str, Value)],
    ) -> Result<i64> {
        let mut values = vec![("from_id", Value::Integer(from_id)), ("to_id", Value::Integer(to_id))];
        values.extend(properties.iter().map(|(c, v)| (*c, v.clone())));
        self.insert_row(relationship, values)
    }

    fn insert_row(&self, table: &str, values: Vec<(&str, Value)>) -> Result<i64> {
        if values.is_empty() {
            self.conn
                .execute(&format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)), [])?;
            return Ok(self.conn.last_insert_rowid());
        }

        let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(values.into_iter().map(|(_, v)| v)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Count rows in a table
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl AdditiveDdl for GraphStore {
    fn create_entity_table(&self, table: &EntityTable) -> rusqlite::Result<()> {
        self.conn.execute(&schema::create_entity_table_sql(table), [])?;
        Ok(())
    }

    fn create_relationship_table(&self, rel: &RelationshipTable) -> rusqlite::Result<()> {
        // Table and catalog row land together or not at all.
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&schema::create_relationship_table_sql(rel), [])?;
        tx.execute(
            "INSERT OR IGNORE INTO _graph_relationships (name, from_table, to_table) VALUES (?1, ?2, ?3)",
            params![rel.name, rel.from_table, rel.to_table],
        )?;
        tx.commit()
    }

    fn add_column(&self, table: &str, column: &ColumnSpec) -> rusqlite::Result<()> {
        self.conn.execute(&schema::add_column_sql(table, column), [])?;
        Ok(())
    }
}

fn open_error(dir: &Path, err: impl std::fmt::Display) -> Error {
    Error::Open {
        path: dir.display().to_string(),
        reason: err.to_string(),
    }
}
