//! Table snapshot and descriptor types.

use crate::ident::QualifiedName;
use serde::{Deserialize, Serialize};

/// Top-level partitioning scheme of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    /// Not partitioned.
    None,
    /// Range partitioned with explicitly managed boundaries.
    Range,
    /// Range partitioned with automatically created intervals.
    Interval,
}

impl std::fmt::Display for PartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionType::None => write!(f, "none"),
            PartitionType::Range => write!(f, "range"),
            PartitionType::Interval => write!(f, "interval"),
        }
    }
}

/// Secondary subdivision scheme within each partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubpartitionType {
    /// Not subpartitioned.
    None,
    /// Hash subpartitioned.
    Hash,
    /// List subpartitioned.
    List,
}

impl std::fmt::Display for SubpartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubpartitionType::None => write!(f, "none"),
            SubpartitionType::Hash => write!(f, "hash"),
            SubpartitionType::List => write!(f, "list"),
        }
    }
}

/// A column as reported by the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Column name.
    pub name: String,
    /// Declared data type, verbatim from the catalog.
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnDesc {
    /// Create a column descriptor.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// An index on the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDesc {
    /// Index name.
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexDesc {
    /// Create an index descriptor.
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }

    /// Composite indexes span more than one column and are rebuilt in
    /// a dedicated plan step.
    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }
}

/// Kind of a table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Primary key.
    Primary,
    /// Unique constraint.
    Unique,
    /// Check constraint.
    Check,
    /// Foreign key.
    Foreign,
}

/// A constraint on the table, with its current enabled state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintDesc {
    /// Constraint name.
    pub name: String,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Whether the constraint is currently enabled.
    pub enabled: bool,
}

impl ConstraintDesc {
    /// Create a constraint descriptor (enabled by default).
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
        }
    }

    /// Mark the constraint as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A privilege granted on the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantDesc {
    /// Receiving user or role.
    pub grantee: String,
    /// Privilege name (SELECT, INSERT, ...).
    pub privilege: String,
}

impl GrantDesc {
    /// Create a grant descriptor.
    pub fn new(grantee: impl Into<String>, privilege: impl Into<String>) -> Self {
        Self {
            grantee: grantee.into(),
            privilege: privilege.into(),
        }
    }
}

/// A single partition as reported by the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDesc {
    /// Partition name.
    pub name: String,
    /// Position within the table (1-based, ascending by bound).
    pub position: u32,
    /// Upper-bound key value, verbatim from the catalog.
    pub high_bound: String,
    /// Row count within the partition.
    pub row_count: u64,
}

impl PartitionDesc {
    /// Create a partition descriptor.
    pub fn new(
        name: impl Into<String>,
        position: u32,
        high_bound: impl Into<String>,
        row_count: u64,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            high_bound: high_bound.into(),
            row_count,
        }
    }
}

/// Immutable capture of a table's physical layout.
///
/// Produced once per planning run by the external metadata provider
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    /// Schema-qualified table name.
    pub name: QualifiedName,
    /// Current partitioning scheme.
    pub partition_type: PartitionType,
    /// Interval unit, when interval partitioned.
    pub interval_unit: Option<super::IntervalUnit>,
    /// Current subpartitioning scheme.
    pub subpartition_type: SubpartitionType,
    /// Partition key column, when partitioned.
    pub partition_key: Option<String>,
    /// Subpartition key column, when subpartitioned.
    pub subpartition_key: Option<String>,
    /// Subpartitions per partition (0 when not subpartitioned).
    pub subpartition_count: u32,
    /// Total row count at capture time.
    pub row_count: u64,
    /// Total size in bytes at capture time.
    pub size_bytes: u64,
    /// Ordered column list.
    pub columns: Vec<ColumnDesc>,
    /// Names of LOB columns (subset of `columns`).
    pub lob_columns: Vec<String>,
    /// Indexes on the table.
    pub indexes: Vec<IndexDesc>,
    /// Constraints on the table.
    pub constraints: Vec<ConstraintDesc>,
    /// Grants captured from the table.
    pub grants: Vec<GrantDesc>,
}

impl TableSnapshot {
    /// Snapshot of an unpartitioned table.
    pub fn unpartitioned(name: QualifiedName) -> Self {
        Self {
            name,
            partition_type: PartitionType::None,
            interval_unit: None,
            subpartition_type: SubpartitionType::None,
            partition_key: None,
            subpartition_key: None,
            subpartition_count: 0,
            row_count: 0,
            size_bytes: 0,
            columns: Vec::new(),
            lob_columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            grants: Vec::new(),
        }
    }

    /// Snapshot of an interval-partitioned table.
    pub fn interval(
        name: QualifiedName,
        unit: super::IntervalUnit,
        partition_key: impl Into<String>,
    ) -> Self {
        let mut snapshot = Self::unpartitioned(name);
        snapshot.partition_type = PartitionType::Interval;
        snapshot.interval_unit = Some(unit);
        snapshot.partition_key = Some(partition_key.into());
        snapshot
    }

    /// Set hash subpartitioning on the snapshot.
    pub fn with_hash_subpartitions(mut self, key: impl Into<String>, count: u32) -> Self {
        self.subpartition_type = SubpartitionType::Hash;
        self.subpartition_key = Some(key.into());
        self.subpartition_count = count;
        self
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDesc) -> Self {
        self.columns.push(column);
        self
    }

    /// Register a column as holding LOB data.
    pub fn with_lob_column(mut self, name: impl Into<String>) -> Self {
        self.lob_columns.push(name.into());
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexDesc) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: ConstraintDesc) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Add a grant.
    pub fn with_grant(mut self, grant: GrantDesc) -> Self {
        self.grants.push(grant);
        self
    }

    /// Set the captured row count.
    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self
    }

    /// Set the captured size.
    pub fn with_size_bytes(mut self, bytes: u64) -> Self {
        self.size_bytes = bytes;
        self
    }

    /// Look up a column by name (case-insensitive, catalog style).
    pub fn column(&self, name: &str) -> Option<&ColumnDesc> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Indexes spanning a single column.
    pub fn simple_indexes(&self) -> impl Iterator<Item = &IndexDesc> {
        self.indexes.iter().filter(|i| !i.is_composite())
    }

    /// Indexes spanning multiple columns.
    pub fn composite_indexes(&self) -> impl Iterator<Item = &IndexDesc> {
        self.indexes.iter().filter(|i| i.is_composite())
    }

    /// Constraints currently enabled.
    pub fn enabled_constraints(&self) -> impl Iterator<Item = &ConstraintDesc> {
        self.constraints.iter().filter(|c| c.enabled)
    }

    /// Whether the table holds LOB data.
    pub fn has_lob_columns(&self) -> bool {
        !self.lob_columns.is_empty()
    }
}
