//! External collaborator interfaces.
//!
//! The planner is pure planning/validation logic; everything that
//! touches a live database sits behind these traits. The metadata
//! provider captures snapshots, the inspector answers the validation
//! gate's read-only questions, the DDL engine executes single
//! statements with the underlying engine's atomicity, and the script
//! emitter renders steps into executable artifacts.

use crate::ident::QualifiedName;
use crate::plan::{Step, StepParams};
use crate::snapshot::{
    ColumnDesc, ConstraintDesc, GrantDesc, IndexDesc, PartitionDesc, PartitionType,
    SubpartitionType, TableSnapshot,
};
use thiserror::Error;

/// Metadata discovery failed; fatal before planning starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metadata discovery failed for {table}: {reason}")]
pub struct DiscoveryError {
    /// The table being discovered.
    pub table: String,
    /// Why discovery failed.
    pub reason: String,
}

/// A statement-level failure reported by the external engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A single statement failed.
    #[error("{operation} failed on {table}: {reason}")]
    Statement {
        /// The operation attempted.
        operation: String,
        /// The table the operation targeted.
        table: String,
        /// Engine-reported reason.
        reason: String,
    },

    /// The engine does not support the requested operation.
    #[error("operation not supported by engine: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Shorthand for a statement failure.
    pub fn statement(
        operation: impl Into<String>,
        table: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::Statement {
            operation: operation.into(),
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

/// Supplies immutable layout captures for planning.
pub trait MetadataProvider {
    /// Capture the current layout of a table.
    fn snapshot(&self, table: &QualifiedName) -> Result<TableSnapshot, DiscoveryError>;
}

/// Read-only view of live table state, consumed by the validation gate.
pub trait TableInspector {
    /// Whether a table with this name exists.
    fn table_exists(&self, table: &QualifiedName) -> bool;

    /// Current row count, if the table exists.
    fn row_count(&self, table: &QualifiedName) -> Option<u64>;

    /// Columns of the table, in declaration order.
    fn columns(&self, table: &QualifiedName) -> Vec<ColumnDesc>;

    /// Indexes currently on the table.
    fn indexes(&self, table: &QualifiedName) -> Vec<IndexDesc>;

    /// Constraints currently on the table, with enabled state.
    fn constraints(&self, table: &QualifiedName) -> Vec<ConstraintDesc>;

    /// Grants currently on the table.
    fn grants(&self, table: &QualifiedName) -> Vec<GrantDesc>;

    /// Partitions of the table, ascending by position.
    fn partitions(&self, table: &QualifiedName) -> Vec<PartitionDesc>;

    /// Partitioning scheme the table currently reports.
    fn partitioning(&self, table: &QualifiedName) -> Option<(PartitionType, SubpartitionType)>;

    /// Whether another session holds a lock implying in-flight writes.
    fn has_active_sessions(&self, table: &QualifiedName) -> bool;
}

/// Mutating operations, each backed by one atomic statement in the
/// underlying engine.
pub trait DdlEngine: TableInspector {
    /// Create the replacement table with the target layout, mirroring
    /// the source's columns and LOB storage.
    fn create_table(
        &mut self,
        table: &QualifiedName,
        params: &StepParams,
        like: &TableSnapshot,
    ) -> Result<(), EngineError>;

    /// Bulk-copy rows ordered by the partition key; returns rows moved.
    fn copy_rows(
        &mut self,
        from: &QualifiedName,
        to: &QualifiedName,
        parallel_degree: u32,
    ) -> Result<u64, EngineError>;

    /// Merge rows changed since `cutoff` (microseconds since epoch,
    /// the recorded completion time of the initial load), keyed by the
    /// partition column; returns rows merged.
    fn merge_delta(
        &mut self,
        from: &QualifiedName,
        to: &QualifiedName,
        key_column: &str,
        update_columns: &[String],
        cutoff: u64,
    ) -> Result<u64, EngineError>;

    /// Create an index on the table.
    fn create_index(&mut self, table: &QualifiedName, index: &IndexDesc)
        -> Result<(), EngineError>;

    /// Rename a table. Independent DDL; atomic on its own only.
    fn rename_table(
        &mut self,
        from: &QualifiedName,
        to: &QualifiedName,
    ) -> Result<(), EngineError>;

    /// Swap a partition's data segment with a standalone table.
    /// Metadata-only; no rows move.
    fn exchange_partition(
        &mut self,
        partitioned: &QualifiedName,
        partition: &str,
        standalone: &QualifiedName,
    ) -> Result<(), EngineError>;

    /// Add a partition with an explicit upper bound.
    fn add_partition(
        &mut self,
        table: &QualifiedName,
        partition: &str,
        high_bound: &str,
    ) -> Result<(), EngineError>;

    /// Drop a partition shell.
    fn drop_partition(&mut self, table: &QualifiedName, partition: &str)
        -> Result<(), EngineError>;

    /// Enable or disable a constraint.
    fn set_constraint_enabled(
        &mut self,
        table: &QualifiedName,
        constraint: &str,
        enabled: bool,
    ) -> Result<(), EngineError>;

    /// Re-apply a captured grant.
    fn apply_grant(&mut self, table: &QualifiedName, grant: &GrantDesc)
        -> Result<(), EngineError>;

    /// Refresh optimizer statistics.
    fn gather_statistics(&mut self, table: &QualifiedName) -> Result<(), EngineError>;

    /// Drop a table. Irreversible; only ever reached manually.
    fn drop_table(&mut self, table: &QualifiedName) -> Result<(), EngineError>;
}

/// Renders plan steps into executable artifacts.
///
/// The planner's only obligation here is to hand over each step with
/// its stable id, ordered checks, and parameters, in plan order.
pub trait ScriptEmitter {
    /// Render one step.
    fn emit_step(&mut self, step: &Step) -> Result<(), EngineError>;
}
