//! Migration classification.
//!
//! Diffs the captured layout against the desired layout and selects
//! exactly one [`MigrationAction`]. Total and deterministic: every
//! supported combination maps to one action, and unsupported
//! combinations are named in the error rather than guessed at.

use crate::snapshot::{
    PartitionType, SubpartitionType, TableSnapshot, TargetConfiguration, TargetError,
};
use thiserror::Error;
use tracing::debug;

/// Classification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// The target configuration is invalid for this table.
    #[error("invalid target configuration: {0}")]
    Target(#[from] TargetError),

    /// The current-to-target transition is not supported.
    #[error("unsupported transition for {table}: {current} -> {requested}")]
    UnsupportedTransition {
        /// The table being classified.
        table: String,
        /// Description of the current layout.
        current: String,
        /// Description of the requested layout.
        requested: String,
    },
}

/// The discrete repartitioning action selected for a table.
///
/// Computed, never persisted; a pure function of the snapshot and the
/// target configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// Current layout already matches the target.
    None,
    /// Unpartitioned table gains interval partitioning.
    AddIntervalPartitioning,
    /// Unpartitioned table gains interval partitioning plus hash
    /// subpartitions.
    AddIntervalHashPartitioning,
    /// Interval-partitioned table gains hash subpartitions.
    AddHashSubpartitions,
    /// Interval-hash table changes interval unit or subpartition count.
    ConvertIntervalToIntervalHash,
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationAction::None => write!(f, "none"),
            MigrationAction::AddIntervalPartitioning => write!(f, "add_interval_partitioning"),
            MigrationAction::AddIntervalHashPartitioning => {
                write!(f, "add_interval_hash_partitioning")
            }
            MigrationAction::AddHashSubpartitions => write!(f, "add_hash_subpartitions"),
            MigrationAction::ConvertIntervalToIntervalHash => {
                write!(f, "convert_interval_to_interval_hash")
            }
        }
    }
}

/// Facts about the snapshot that do not change the action but add or
/// shape plan steps downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanAnnotations {
    /// The table holds LOB columns; LOB storage must be mirrored.
    pub has_lob_columns: bool,
    /// Number of composite indexes needing the dedicated rebuild step.
    pub composite_indexes: usize,
    /// Captured row count, for load sizing.
    pub row_count: u64,
}

impl PlanAnnotations {
    /// Derive annotations from a snapshot.
    pub fn from_snapshot(snapshot: &TableSnapshot) -> Self {
        Self {
            has_lob_columns: snapshot.has_lob_columns(),
            composite_indexes: snapshot.composite_indexes().count(),
            row_count: snapshot.row_count,
        }
    }
}

fn describe_current(snapshot: &TableSnapshot) -> String {
    match (snapshot.partition_type, snapshot.subpartition_type) {
        (PartitionType::None, _) => "unpartitioned".to_string(),
        (pt, SubpartitionType::None) => match snapshot.interval_unit {
            Some(unit) => format!("{pt}({unit})"),
            None => pt.to_string(),
        },
        (pt, st) => format!(
            "{pt}+{st}({})",
            snapshot.subpartition_count
        ),
    }
}

fn describe_target(target: &TargetConfiguration) -> String {
    match (target.interval_unit, target.wants_subpartitions()) {
        (None, _) => "non-interval".to_string(),
        (Some(unit), false) => format!("interval({unit})"),
        (Some(unit), true) => format!("interval({unit})+hash({})", target.subpartition_count),
    }
}

/// Classify the migration needed to move `snapshot` to `target`.
///
/// Pure over immutable inputs; same inputs always yield the same
/// action.
pub fn classify(
    snapshot: &TableSnapshot,
    target: &TargetConfiguration,
) -> Result<MigrationAction, ClassifyError> {
    target.validate_against(snapshot)?;

    let unsupported = || ClassifyError::UnsupportedTransition {
        table: snapshot.name.to_string(),
        current: describe_current(snapshot),
        requested: describe_target(target),
    };

    let wants_interval = target.interval_unit.is_some();
    let wants_subparts = target.wants_subpartitions();

    let action = match (snapshot.partition_type, snapshot.subpartition_type) {
        (PartitionType::None, _) => {
            if !wants_interval {
                // Nothing to do only if the target is also unpartitioned.
                if wants_subparts {
                    return Err(unsupported());
                }
                MigrationAction::None
            } else if wants_subparts {
                MigrationAction::AddIntervalHashPartitioning
            } else {
                MigrationAction::AddIntervalPartitioning
            }
        }
        // Plain range sources need manual boundary conversion first.
        (PartitionType::Range, _) => return Err(unsupported()),
        (PartitionType::Interval, SubpartitionType::None) => {
            if !wants_interval {
                return Err(unsupported());
            }
            if wants_subparts {
                MigrationAction::AddHashSubpartitions
            } else if target.interval_unit == snapshot.interval_unit {
                MigrationAction::None
            } else {
                // Changing only the interval unit without subpartitions
                // is outside the supported transition set.
                return Err(unsupported());
            }
        }
        (PartitionType::Interval, SubpartitionType::Hash) => {
            if !wants_interval {
                return Err(unsupported());
            }
            if !wants_subparts || target.subpartition_count < snapshot.subpartition_count {
                // Shrinking or dropping subpartitions is unsupported.
                return Err(unsupported());
            }
            if target.interval_unit == snapshot.interval_unit
                && target.subpartition_count == snapshot.subpartition_count
            {
                MigrationAction::None
            } else {
                MigrationAction::ConvertIntervalToIntervalHash
            }
        }
        (PartitionType::Interval, SubpartitionType::List) => return Err(unsupported()),
    };

    debug!(
        table = %snapshot.name,
        current = %describe_current(snapshot),
        requested = %describe_target(target),
        action = %action,
        "classified migration"
    );

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::QualifiedName;
    use crate::snapshot::{ColumnDesc, IntervalUnit};

    fn base_snapshot() -> TableSnapshot {
        TableSnapshot::unpartitioned(QualifiedName::new("APP", "ORDERS").unwrap())
            .with_column(ColumnDesc::new("ID", "NUMBER", false))
            .with_column(ColumnDesc::new("CREATED_AT", "TIMESTAMP(6)", false))
            .with_column(ColumnDesc::new("CUSTOMER_ID", "NUMBER", false))
    }

    fn interval_snapshot(unit: IntervalUnit) -> TableSnapshot {
        let mut snap = base_snapshot();
        snap.partition_type = PartitionType::Interval;
        snap.interval_unit = Some(unit);
        snap.partition_key = Some("CREATED_AT".into());
        snap
    }

    #[test]
    fn test_unpartitioned_to_interval() {
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
        let action = classify(&base_snapshot(), &target).unwrap();
        assert_eq!(action, MigrationAction::AddIntervalPartitioning);
    }

    #[test]
    fn test_unpartitioned_to_interval_hash() {
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 8);
        let action = classify(&base_snapshot(), &target).unwrap();
        assert_eq!(action, MigrationAction::AddIntervalHashPartitioning);
    }

    #[test]
    fn test_interval_gains_subpartitions() {
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 8);
        let action = classify(&interval_snapshot(IntervalUnit::Month), &target).unwrap();
        assert_eq!(action, MigrationAction::AddHashSubpartitions);
    }

    #[test]
    fn test_interval_hash_changes_unit() {
        let snap = interval_snapshot(IntervalUnit::Month).with_hash_subpartitions("CUSTOMER_ID", 8);
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Day)
            .with_hash_subpartitions("CUSTOMER_ID", 8);
        let action = classify(&snap, &target).unwrap();
        assert_eq!(action, MigrationAction::ConvertIntervalToIntervalHash);
    }

    #[test]
    fn test_interval_hash_grows_subpartitions() {
        let snap = interval_snapshot(IntervalUnit::Month).with_hash_subpartitions("CUSTOMER_ID", 4);
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 16);
        let action = classify(&snap, &target).unwrap();
        assert_eq!(action, MigrationAction::ConvertIntervalToIntervalHash);
    }

    #[test]
    fn test_already_matching_is_none() {
        let snap = interval_snapshot(IntervalUnit::Month).with_hash_subpartitions("CUSTOMER_ID", 8);
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 8);
        assert_eq!(classify(&snap, &target).unwrap(), MigrationAction::None);
    }

    #[test]
    fn test_shrinking_subpartitions_unsupported() {
        let snap = interval_snapshot(IntervalUnit::Month).with_hash_subpartitions("CUSTOMER_ID", 8);
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
            .with_hash_subpartitions("CUSTOMER_ID", 4);
        assert!(matches!(
            classify(&snap, &target),
            Err(ClassifyError::UnsupportedTransition { .. })
        ));
    }

    #[test]
    fn test_non_interval_target_from_interval_source_unsupported() {
        let snap = interval_snapshot(IntervalUnit::Month);
        let mut target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
        target.interval_unit = None;
        assert!(matches!(
            classify(&snap, &target),
            Err(ClassifyError::UnsupportedTransition { .. })
        ));
    }

    #[test]
    fn test_range_source_unsupported() {
        let mut snap = base_snapshot();
        snap.partition_type = PartitionType::Range;
        snap.partition_key = Some("CREATED_AT".into());
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
        assert!(matches!(
            classify(&snap, &target),
            Err(ClassifyError::UnsupportedTransition { .. })
        ));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let snap = base_snapshot();
        let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
        let first = classify(&snap, &target).unwrap();
        let second = classify(&snap, &target).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_annotations() {
        let snap = base_snapshot()
            .with_lob_column("PAYLOAD")
            .with_index(crate::snapshot::IndexDesc::new(
                "IX_CUST_DATE",
                vec!["CUSTOMER_ID".into(), "CREATED_AT".into()],
                false,
            ))
            .with_row_count(1000);
        let ann = PlanAnnotations::from_snapshot(&snap);
        assert!(ann.has_lob_columns);
        assert_eq!(ann.composite_indexes, 1);
        assert_eq!(ann.row_count, 1000);
    }
}
