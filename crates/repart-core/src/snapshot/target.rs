//! Target layout configuration.

use super::table::TableSnapshot;
use crate::ident::{Ident, IdentError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interval width for automatically created range partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    /// One partition per hour.
    Hour,
    /// One partition per day.
    Day,
    /// One partition per week.
    Week,
    /// One partition per month.
    Month,
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalUnit::Hour => write!(f, "hour"),
            IntervalUnit::Day => write!(f, "day"),
            IntervalUnit::Week => write!(f, "week"),
            IntervalUnit::Month => write!(f, "month"),
        }
    }
}

/// Target configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// A configured column name failed identifier validation.
    #[error("invalid column name: {0}")]
    InvalidColumn(#[from] IdentError),

    /// The partition column does not exist on the table.
    #[error("partition column '{column}' does not exist on {table}")]
    MissingPartitionColumn {
        /// The configured column.
        column: String,
        /// The table being migrated.
        table: String,
    },

    /// The partition column accepts NULL, which the partition key cannot.
    #[error("partition column '{column}' on {table} is nullable")]
    NullablePartitionColumn {
        /// The configured column.
        column: String,
        /// The table being migrated.
        table: String,
    },

    /// The subpartition column does not exist on the table.
    #[error("subpartition column '{column}' does not exist on {table}")]
    MissingSubpartitionColumn {
        /// The configured column.
        column: String,
        /// The table being migrated.
        table: String,
    },

    /// Subpartitions were requested without a key column.
    #[error("{count} subpartitions requested but no subpartition column configured")]
    SubpartitionColumnRequired {
        /// Requested subpartition count.
        count: u32,
    },

    /// Parallel degree must be at least 1.
    #[error("parallel degree must be at least 1, got {0}")]
    BadParallelDegree(u32),
}

/// Operator-supplied desired layout for one table.
///
/// Validated against the [`TableSnapshot`] before any classification
/// or planning happens.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfiguration {
    /// Partition key column.
    pub partition_column: String,
    /// Desired interval unit; `None` means no interval partitioning.
    pub interval_unit: Option<IntervalUnit>,
    /// Hash subpartition key column.
    pub subpartition_column: Option<String>,
    /// Hash subpartitions per partition (0 = none).
    pub subpartition_count: u32,
    /// Tablespace for the rebuilt table.
    pub tablespace: Option<String>,
    /// Parallel degree hint for data copy and index build.
    pub parallel_degree: u32,
    /// Keep the retired table after cutover.
    pub backup_old_table: bool,
    /// Days to retain the retired table before the manual drop.
    pub drop_after_days: u32,
    /// Record validation failures instead of halting on them.
    pub continue_on_validation_failure: bool,
    /// Enable the incremental delta-load step.
    pub delta_capture: bool,
    /// Columns updated when a delta row matches; empty = insert-only.
    pub delta_update_columns: Vec<String>,
}

impl TargetConfiguration {
    /// Target interval partitioning on the given column.
    pub fn interval(partition_column: impl Into<String>, unit: IntervalUnit) -> Self {
        Self {
            partition_column: partition_column.into(),
            interval_unit: Some(unit),
            subpartition_column: None,
            subpartition_count: 0,
            tablespace: None,
            parallel_degree: 1,
            backup_old_table: true,
            drop_after_days: 7,
            continue_on_validation_failure: false,
            delta_capture: false,
            delta_update_columns: Vec::new(),
        }
    }

    /// Add hash subpartitioning.
    pub fn with_hash_subpartitions(mut self, column: impl Into<String>, count: u32) -> Self {
        self.subpartition_column = Some(column.into());
        self.subpartition_count = count;
        self
    }

    /// Set the target tablespace.
    pub fn with_tablespace(mut self, tablespace: impl Into<String>) -> Self {
        self.tablespace = Some(tablespace.into());
        self
    }

    /// Set the parallel degree hint.
    pub fn with_parallel_degree(mut self, degree: u32) -> Self {
        self.parallel_degree = degree;
        self
    }

    /// Enable the delta-load step with an explicit update column list.
    pub fn with_delta_capture(mut self, update_columns: Vec<String>) -> Self {
        self.delta_capture = true;
        self.delta_update_columns = update_columns;
        self
    }

    /// Record validation failures instead of halting on them.
    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_validation_failure = true;
        self
    }

    /// Whether the target layout includes hash subpartitions.
    pub fn wants_subpartitions(&self) -> bool {
        self.subpartition_count > 0
    }

    /// Validate the configuration against a captured snapshot.
    pub fn validate_against(&self, snapshot: &TableSnapshot) -> Result<(), TargetError> {
        Ident::parse(&self.partition_column)?;

        let column = snapshot.column(&self.partition_column).ok_or_else(|| {
            TargetError::MissingPartitionColumn {
                column: self.partition_column.clone(),
                table: snapshot.name.to_string(),
            }
        })?;
        if column.nullable {
            return Err(TargetError::NullablePartitionColumn {
                column: self.partition_column.clone(),
                table: snapshot.name.to_string(),
            });
        }

        if self.wants_subpartitions() {
            let sub = self.subpartition_column.as_deref().ok_or(
                TargetError::SubpartitionColumnRequired {
                    count: self.subpartition_count,
                },
            )?;
            Ident::parse(sub)?;
            if snapshot.column(sub).is_none() {
                return Err(TargetError::MissingSubpartitionColumn {
                    column: sub.to_string(),
                    table: snapshot.name.to_string(),
                });
            }
        }

        for col in &self.delta_update_columns {
            Ident::parse(col)?;
        }

        if self.parallel_degree == 0 {
            return Err(TargetError::BadParallelDegree(self.parallel_degree));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::QualifiedName;
    use crate::snapshot::ColumnDesc;

    fn snapshot() -> TableSnapshot {
        TableSnapshot::unpartitioned(QualifiedName::new("APP", "ORDERS").unwrap())
            .with_column(ColumnDesc::new("ID", "NUMBER", false))
            .with_column(ColumnDesc::new("CREATED_AT", "TIMESTAMP(6)", false))
            .with_column(ColumnDesc::new("CUSTOMER_ID", "NUMBER", false))
            .with_column(ColumnDesc::new("NOTE", "VARCHAR2(4000)", true))
    }

    #[test]
    fn test_validate_accepts_good_target() {
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 8);
        assert!(target.validate_against(&snapshot()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_partition_column() {
        let target = TargetConfiguration::interval("NO_SUCH", IntervalUnit::Day);
        assert!(matches!(
            target.validate_against(&snapshot()),
            Err(TargetError::MissingPartitionColumn { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nullable_partition_column() {
        let target = TargetConfiguration::interval("NOTE", IntervalUnit::Day);
        assert!(matches!(
            target.validate_against(&snapshot()),
            Err(TargetError::NullablePartitionColumn { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_subpartitions_without_column() {
        let mut target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
        target.subpartition_count = 4;
        assert!(matches!(
            target.validate_against(&snapshot()),
            Err(TargetError::SubpartitionColumnRequired { count: 4 })
        ));
    }

    #[test]
    fn test_validate_rejects_hostile_column_name() {
        let target = TargetConfiguration::interval("CREATED_AT; DROP TABLE X", IntervalUnit::Day);
        assert!(matches!(
            target.validate_against(&snapshot()),
            Err(TargetError::InvalidColumn(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_parallel_degree() {
        let target =
            TargetConfiguration::interval("CREATED_AT", IntervalUnit::Day).with_parallel_degree(0);
        assert!(matches!(
            target.validate_against(&snapshot()),
            Err(TargetError::BadParallelDegree(0))
        ));
    }
}
