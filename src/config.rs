use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "GRAPHKEEPER_";

/// What to do when the store cannot be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    /// Any open failure is fatal
    #[default]
    FailFast,
    /// Move the broken directory aside and start fresh
    SoftRename,
    /// Delete the broken directory and start fresh
    ClearRebuild,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::FailFast => "fail-fast",
            RecoveryStrategy::SoftRename => "soft-rename",
            RecoveryStrategy::ClearRebuild => "clear-rebuild",
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(RecoveryStrategy::FailFast),
            "soft-rename" => Ok(RecoveryStrategy::SoftRename),
            "clear-rebuild" => Ok(RecoveryStrategy::ClearRebuild),
            _ => Err(crate::Error::Config(format!("unknown recovery strategy: {}", s))),
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which part of the diff reconciliation may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileScope {
    #[default]
    All,
    EntitiesOnly,
    RelationshipsOnly,
}

impl std::fmt::Display for ReconcileScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReconcileScope::All => "all",
            ReconcileScope::EntitiesOnly => "entities-only",
            ReconcileScope::RelationshipsOnly => "relationships-only",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database directory
    pub database: PathBuf,
    /// Schema descriptor document
    pub schema: PathBuf,
    /// Root directory for backup archives
    pub backup_dir: PathBuf,
    /// Incident log; defaults to `<database>.incidents.jsonl`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_log: Option<PathBuf>,
    pub reconcile: bool,
    pub only_entity_changes: bool,
    pub only_relationship_changes: bool,
    pub skip_backup: bool,
    pub force_reconcile: bool,
    pub recovery_strategy: RecoveryStrategy,
    pub slow_query_ms: u64,
    pub verbose_queries: bool,
    /// Maximum wait for the database lock; unset waits indefinitely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data").join("graph"),
            schema: PathBuf::from("schema.json"),
            backup_dir: PathBuf::from("data").join("backups"),
            incident_log: None,
            reconcile: true,
            only_entity_changes: false,
            only_relationship_changes: false,
            skip_backup: false,
            force_reconcile: false,
            recovery_strategy: RecoveryStrategy::default(),
            slow_query_ms: 250,
            verbose_queries: false,
            acquire_timeout_ms: None,
        }
    }
}

impl Config {
    /// Defaults rooted at one directory (database, backups and descriptor side by side)
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            database: base.join("graph"),
            schema: base.join("schema.json"),
            backup_dir: base.join("backups"),
            ..Self::default()
        }
    }

    pub fn scope(&self) -> ReconcileScope {
        match (self.only_entity_changes, self.only_relationship_changes) {
            (true, false) => ReconcileScope::EntitiesOnly,
            (false, true) => ReconcileScope::RelationshipsOnly,
            _ => ReconcileScope::All,
        }
    }

    pub fn incident_log_path(&self) -> PathBuf {
        self.incident_log
            .clone()
            .unwrap_or_else(|| sibling_path(&self.database, ".incidents.jsonl"))
    }

    pub fn lock_file_path(&self) -> PathBuf {
        sibling_path(&self.database, ".lock")
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.only_entity_changes && self.only_relationship_changes {
            return Err(crate::Error::Config(
                "only_entity_changes and only_relationship_changes are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Overlay `GRAPHKEEPER_*` variables from the process environment
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup (keys include the prefix)
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> crate::Result<()> {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("DB_PATH") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = get("SCHEMA_PATH") {
            self.schema = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("INCIDENT_LOG") {
            self.incident_log = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCHEMA_RECONCILE") {
            self.reconcile = parse_flag("SCHEMA_RECONCILE", &v)?;
        }
        if let Some(v) = get("ONLY_ENTITY_CHANGES") {
            self.only_entity_changes = parse_flag("ONLY_ENTITY_CHANGES", &v)?;
        }
        if let Some(v) = get("ONLY_RELATIONSHIP_CHANGES") {
            self.only_relationship_changes = parse_flag("ONLY_RELATIONSHIP_CHANGES", &v)?;
        }
        if let Some(v) = get("SKIP_BACKUP") {
            self.skip_backup = parse_flag("SKIP_BACKUP", &v)?;
        }
        if let Some(v) = get("FORCE_RECONCILE") {
            self.force_reconcile = parse_flag("FORCE_RECONCILE", &v)?;
        }
        if let Some(v) = get("RECOVERY_STRATEGY") {
            self.recovery_strategy = v.parse()?;
        }
        if let Some(v) = get("SLOW_QUERY_MS") {
            self.slow_query_ms = parse_millis("SLOW_QUERY_MS", &v)?;
        }
        if let Some(v) = get("VERBOSE_QUERIES") {
            self.verbose_queries = parse_flag("VERBOSE_QUERIES", &v)?;
        }
        if let Some(v) = get("ACQUIRE_TIMEOUT_MS") {
            self.acquire_timeout_ms = if v.trim().is_empty() {
                None
            } else {
                Some(parse_millis("ACQUIRE_TIMEOUT_MS", &v)?)
            };
        }
        self.validate()
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn parse_flag(name: &str, value: &str) -> crate::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(crate::Error::Config(format!(
            "{}{} must be a boolean, got '{}'",
            ENV_PREFIX, name, value
        ))),
    }
}

fn parse_millis(name: &str, value: &str) -> crate::Result<u64> {
    value.trim().parse().map_err(|_| {
        crate::Error::Config(format!(
            "{}{} must be a number of milliseconds, got '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("graphkeeper.toml")
}

/// Load the config file (if present), then apply environment overrides
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents)?
    } else {
        Config::default()
    };
    config.apply_env()?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &Config, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
