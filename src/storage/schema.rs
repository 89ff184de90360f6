//! Internal catalog definitions

/// SQL to create the relationship catalog.
/// Records which tables are relationships and the entity tables they connect.
pub const CREATE_RELATIONSHIP_CATALOG: &str = r#"
CREATE TABLE IF NOT EXISTS _graph_relationships (
    name TEXT PRIMARY KEY,
    from_table TEXT NOT NULL,
    to_table TEXT NOT NULL
)
"#;

/// SQL to create the reconciliation state table (a single row, id = 1)
pub const CREATE_SCHEMA_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS _graph_schema_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    reconciled_at TEXT NOT NULL
)
"#;

/// All catalog creation statements
pub fn all_catalog_statements() -> Vec<&'static str> {
    vec![CREATE_RELATIONSHIP_CATALOG, CREATE_SCHEMA_STATE]
}

/// Quote an identifier for use in DDL/DML
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` statement for an entity table.
///
/// Deliberately has no `IF NOT EXISTS`: a concurrent creator must surface as
/// an "already exists" failure so the applier can count it separately.
pub fn create_entity_table_sql(table: &crate::schema::EntityTable) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    columns.extend(
        table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type())),
    );
    format!("CREATE TABLE {} ({})", quote_ident(&table.name), columns.join(", "))
}

/// `CREATE TABLE` statement for a relationship table
pub fn create_relationship_table_sql(rel: &crate::schema::RelationshipTable) -> String {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        format!("from_id INTEGER NOT NULL REFERENCES {}(id)", quote_ident(&rel.from_table)),
        format!("to_id INTEGER NOT NULL REFERENCES {}(id)", quote_ident(&rel.to_table)),
    ];
    columns.extend(
        rel.properties
            .iter()
            .map(|p| format!("{} {}", quote_ident(&p.name), p.ty.sql_type())),
    );
    format!("CREATE TABLE {} ({})", quote_ident(&rel.name), columns.join(", "))
}

/// `ALTER TABLE ... ADD COLUMN` statement
pub fn add_column_sql(table: &str, column: &crate::schema::ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(&column.name),
        column.ty.sql_type()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ColumnType, EntityTable, RelationshipTable};

    #[test]
    fn test_entity_table_sql() {
        let table = EntityTable::new("Widget")
            .column("name", ColumnType::Text)
            .column("weight", ColumnType::Float);
        assert_eq!(
            create_entity_table_sql(&table),
            r#"CREATE TABLE "Widget" (id INTEGER PRIMARY KEY AUTOINCREMENT, "name" TEXT, "weight" FLOAT)"#
        );
    }

    #[test]
    fn test_relationship_table_sql() {
        let rel = RelationshipTable::new("OWNS", "User", "Widget").property("since", ColumnType::Date);
        let sql = create_relationship_table_sql(&rel);
        assert!(sql.starts_with(r#"CREATE TABLE "OWNS" ("#));
        assert!(sql.contains(r#"from_id INTEGER NOT NULL REFERENCES "User"(id)"#));
        assert!(sql.contains(r#"to_id INTEGER NOT NULL REFERENCES "Widget"(id)"#));
        assert!(sql.ends_with(r#""since" DATE)"#));
    }

    #[test]
    fn test_add_column_sql() {
        let col = ColumnSpec::new("color", ColumnType::Text);
        assert_eq!(add_column_sql("Widget", &col), r#"ALTER TABLE "Widget" ADD COLUMN "color" TEXT"#);
        assert_eq!(quote_ident(r#"a"b"#), r#""a""b""#);
    }
}
