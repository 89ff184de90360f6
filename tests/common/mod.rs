#![allow(dead_code)]

use std::path::Path;
use graphkeeper::{Config, ConnectionManager};

pub const USER_WIDGET_OWNS: &str = r#"{
    "version": 1,
    "entity_tables": {
        "User": {"name": "text"},
        "Widget": {"name": "text"}
    },
    "relationship_tables": {
        "OWNS": {"from": "User", "to": "Widget"}
    }
}"#;

pub const WIDGET_WITH_COLOR: &str = r#"{
    "version": 2,
    "entity_tables": {
        "User": {"name": "text"},
        "Widget": {"name": "text", "color": "text"}
    },
    "relationship_tables": {
        "OWNS": {"from": "User", "to": "Widget"}
    }
}"#;

/// Config rooted in `base` with `descriptor` written as the schema file
pub fn config_with(base: &Path, descriptor: &str) -> Config {
    let config = Config::rooted_at(base);
    std::fs::write(&config.schema, descriptor).unwrap();
    config
}

pub fn manager_with(base: &Path, descriptor: &str) -> ConnectionManager {
    ConnectionManager::new(config_with(base, descriptor)).unwrap()
}

/// Overwrite the engine file so the next open fails
pub fn corrupt(config: &Config) {
    std::fs::create_dir_all(&config.database).unwrap();
    std::fs::write(
        config.database.join(graphkeeper::storage::DATABASE_FILE),
        b"definitely not a database ".repeat(200),
    )
    .unwrap();
}
