//! Per-table migration configuration.
//!
//! Operators register the desired layout for each table once; the
//! record is persisted as JSON and looked up by qualified name when a
//! migration is planned. JSON rather than rkyv here: these records are
//! written and read by people as often as by the planner.

use crate::ident::{IdentError, QualifiedName};
use crate::snapshot::{IntervalUnit, TargetConfiguration};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const CONFIG_TREE: &str = "repart_config";

/// Configuration persistence errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying sled failure.
    #[error("config storage error: {0}")]
    Storage(#[from] sled::Error),

    /// JSON encode/decode failure.
    #[error("config serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The owner or table name failed identifier validation.
    #[error("invalid table name: {0}")]
    Ident(#[from] IdentError),

    /// No configuration registered for the table.
    #[error("no configuration registered for {table}")]
    NotFound {
        /// The table that was looked up.
        table: String,
    },
}

fn default_enabled() -> bool {
    true
}

fn default_parallel_degree() -> u32 {
    1
}

fn default_drop_after_days() -> u32 {
    7
}

fn default_backup_old_table() -> bool {
    true
}

/// One table's registered migration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMigrationConfig {
    /// Owning schema.
    pub owner: String,
    /// Table name within the schema.
    pub table_name: String,
    /// Whether this table is eligible for migration runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Partition key column.
    pub partition_column: String,
    /// Interval width for automatic partitions.
    pub interval_unit: IntervalUnit,
    /// Hash subpartition key column, if subpartitioning is wanted.
    #[serde(default)]
    pub subpartition_column: Option<String>,
    /// Hash subpartitions per partition (0 = none).
    #[serde(default)]
    pub subpartition_count: u32,
    /// Tablespace for the rebuilt table.
    #[serde(default)]
    pub tablespace: Option<String>,
    /// Parallel degree hint for copy and index build.
    #[serde(default = "default_parallel_degree")]
    pub parallel_degree: u32,
    /// Keep the retired table after cutover.
    #[serde(default = "default_backup_old_table")]
    pub backup_old_table: bool,
    /// Days to retain the retired table before the manual drop.
    #[serde(default = "default_drop_after_days")]
    pub drop_after_days: u32,
    /// Record validation failures instead of halting on them.
    #[serde(default)]
    pub continue_on_validation_failure: bool,
    /// Enable the incremental delta-load step.
    #[serde(default)]
    pub delta_capture: bool,
    /// Columns updated when a delta row matches; empty = insert-only.
    #[serde(default)]
    pub delta_update_columns: Vec<String>,
}

impl TableMigrationConfig {
    /// Minimal configuration: interval partitioning, library defaults
    /// for everything else.
    pub fn new(
        table: &QualifiedName,
        partition_column: impl Into<String>,
        interval_unit: IntervalUnit,
    ) -> Self {
        Self {
            owner: table.owner.to_string(),
            table_name: table.name.to_string(),
            enabled: true,
            partition_column: partition_column.into(),
            interval_unit,
            subpartition_column: None,
            subpartition_count: 0,
            tablespace: None,
            parallel_degree: default_parallel_degree(),
            backup_old_table: default_backup_old_table(),
            drop_after_days: default_drop_after_days(),
            continue_on_validation_failure: false,
            delta_capture: false,
            delta_update_columns: Vec::new(),
        }
    }

    /// The qualified name this record is registered under, with the
    /// stored names re-validated.
    pub fn qualified_name(&self) -> Result<QualifiedName, IdentError> {
        QualifiedName::new(&self.owner, &self.table_name)
    }

    /// Build the planner-facing target from this record.
    pub fn to_target(&self) -> TargetConfiguration {
        TargetConfiguration {
            partition_column: self.partition_column.clone(),
            interval_unit: Some(self.interval_unit),
            subpartition_column: self.subpartition_column.clone(),
            subpartition_count: self.subpartition_count,
            tablespace: self.tablespace.clone(),
            parallel_degree: self.parallel_degree,
            backup_old_table: self.backup_old_table,
            drop_after_days: self.drop_after_days,
            continue_on_validation_failure: self.continue_on_validation_failure,
            delta_capture: self.delta_capture,
            delta_update_columns: self.delta_update_columns.clone(),
        }
    }
}

/// Durable registry of per-table configurations, keyed `OWNER.TABLE`.
pub struct ConfigStore {
    tree: sled::Tree,
}

impl ConfigStore {
    /// Open the config tree inside an existing sled database.
    pub fn open(db: &sled::Db) -> Result<Self, ConfigError> {
        let tree = db.open_tree(CONFIG_TREE)?;
        Ok(Self { tree })
    }

    /// Register or replace a table's configuration. Owner and table
    /// name are validated before anything is written.
    pub fn register(&self, config: &TableMigrationConfig) -> Result<(), ConfigError> {
        let name = config.qualified_name()?;
        let bytes = serde_json::to_vec(config)?;
        self.tree.insert(name.to_string().as_bytes(), bytes)?;
        debug!(table = %name, enabled = config.enabled, "registered migration config");
        Ok(())
    }

    /// Look up the configuration for a table.
    pub fn lookup(&self, table: &QualifiedName) -> Result<TableMigrationConfig, ConfigError> {
        match self.tree.get(table.to_string().as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(ConfigError::NotFound {
                table: table.to_string(),
            }),
        }
    }

    /// Remove a table's configuration.
    pub fn remove(&self, table: &QualifiedName) -> Result<(), ConfigError> {
        self.tree.remove(table.to_string().as_bytes())?;
        Ok(())
    }

    /// All registered configurations, in key order.
    pub fn list(&self) -> Result<Vec<TableMigrationConfig>, ConfigError> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Registered configurations currently eligible for migration.
    pub fn enabled(&self) -> Result<Vec<TableMigrationConfig>, ConfigError> {
        Ok(self.list()?.into_iter().filter(|c| c.enabled).collect())
    }
}
