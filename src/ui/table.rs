use tabled::{settings::Style, Table, Tabled};
use crate::backup::BackupRecord;
use crate::recovery::RecoveryIncident;
use crate::schema::LiveSchemaSnapshot;
use super::human_bytes;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        render(&self.rows)
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Archive")]
    archive: String,
}

pub fn backups_table(records: &[BackupRecord]) -> String {
    let rows: Vec<BackupRow> = records
        .iter()
        .map(|r| BackupRow {
            created: r.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            trigger: r.trigger.to_string(),
            size: human_bytes(r.size_bytes),
            archive: r.archive_path.display().to_string(),
        })
        .collect();
    render(&rows)
}

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "Detected")]
    detected: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Symptom")]
    symptom: String,
}

pub fn incidents_table(incidents: &[RecoveryIncident]) -> String {
    let rows: Vec<IncidentRow> = incidents
        .iter()
        .map(|i| IncidentRow {
            detected: i.detected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            strategy: i.strategy_applied.clone(),
            outcome: i.outcome.to_string(),
            symptom: i.symptom.clone(),
        })
        .collect();
    render(&rows)
}

#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "Type")]
    declared_type: String,
}

/// One row per column of every live table; endpoints shown for relationships
pub fn columns_table(live: &LiveSchemaSnapshot) -> String {
    let mut rows = Vec::new();
    for (name, columns) in &live.entity_tables {
        rows.push(ColumnRow {
            table: name.clone(),
            kind: "entity",
            column: "id".into(),
            declared_type: "INTEGER".into(),
        });
        rows.extend(columns.iter().map(|c| ColumnRow {
            table: name.clone(),
            kind: "entity",
            column: c.name.clone(),
            declared_type: c.declared_type.clone(),
        }));
    }
    for (name, rel) in &live.relationship_tables {
        rows.push(ColumnRow {
            table: name.clone(),
            kind: "relationship",
            column: "from_id / to_id".into(),
            declared_type: format!("{} -> {}", rel.from_table, rel.to_table),
        });
        rows.extend(rel.properties.iter().map(|c| ColumnRow {
            table: name.clone(),
            kind: "relationship",
            column: c.name.clone(),
            declared_type: c.declared_type.clone(),
        }));
    }
    render(&rows)
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}
