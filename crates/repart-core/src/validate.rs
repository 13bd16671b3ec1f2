//! Validation gate.
//!
//! A reusable pre/post-condition checker. The gate never aborts on its
//! own: it evaluates a [`Check`] against the live state visible through
//! a [`TableInspector`] and reports the outcome. Whether a failure
//! halts the plan is the caller's decision, governed by the
//! `continue_on_validation_failure` configuration flag.

use crate::engine::TableInspector;
use crate::ident::QualifiedName;
use crate::snapshot::{PartitionType, SubpartitionType};
use tracing::debug;

/// A condition the gate can evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// The table exists.
    TableExists(QualifiedName),
    /// The table does not exist.
    TableAbsent(QualifiedName),
    /// The table has zero rows.
    RowCountZero(QualifiedName),
    /// Source and target row counts match exactly.
    RowCountMatch {
        /// Table rows are copied from.
        source: QualifiedName,
        /// Table rows are copied into.
        target: QualifiedName,
    },
    /// Index count and per-index column counts match between tables.
    IndexParity {
        /// Table providing the expected index set.
        source: QualifiedName,
        /// Table whose indexes are being verified.
        target: QualifiedName,
    },
    /// Exactly `expected` constraints on the table are disabled.
    ConstraintsDisabled {
        /// The table to inspect.
        table: QualifiedName,
        /// Expected number of disabled constraints.
        expected: usize,
    },
    /// The table carries at least `expected` indexes.
    IndexCountAtLeast {
        /// The table to inspect.
        table: QualifiedName,
        /// Minimum index count.
        expected: usize,
    },
    /// Constraint sets match; enabled-state drift is a warning.
    ConstraintStateParity {
        /// Table providing the expected constraint set.
        source: QualifiedName,
        /// Table whose constraints are being verified.
        target: QualifiedName,
    },
    /// No other session holds a lock implying in-flight writes.
    NoActiveSessions(QualifiedName),
    /// Grants have been captured from the table.
    GrantsCaptured(QualifiedName),
    /// The table reports the expected partitioning scheme.
    PartitioningMatches {
        /// The table to inspect.
        table: QualifiedName,
        /// Expected top-level scheme.
        partition_type: PartitionType,
        /// Expected secondary scheme.
        subpartition_type: SubpartitionType,
    },
    /// The staging table is empty (exchange precondition).
    StagingEmpty(QualifiedName),
    /// Column structure of the target matches the source (exchange
    /// precondition; a segment swap needs identical column lists).
    StructurallyCompatible {
        /// Table providing the expected column list.
        source: QualifiedName,
        /// Table whose columns are being verified.
        target: QualifiedName,
    },
    /// A named partition exists on the table.
    PartitionExists {
        /// The partitioned table.
        table: QualifiedName,
        /// Expected partition name.
        partition: String,
    },
}

impl Check {
    /// Human-readable description of the condition.
    pub fn description(&self) -> String {
        match self {
            Check::TableExists(t) => format!("table {t} exists"),
            Check::TableAbsent(t) => format!("table {t} does not exist"),
            Check::RowCountZero(t) => format!("table {t} is empty"),
            Check::RowCountMatch { source, target } => {
                format!("row counts match between {source} and {target}")
            }
            Check::IndexParity { source, target } => {
                format!("index parity between {source} and {target}")
            }
            Check::ConstraintsDisabled { table, expected } => {
                format!("{expected} constraints disabled on {table}")
            }
            Check::IndexCountAtLeast { table, expected } => {
                format!("at least {expected} indexes on {table}")
            }
            Check::ConstraintStateParity { source, target } => {
                format!("constraint parity between {source} and {target}")
            }
            Check::NoActiveSessions(t) => format!("no active sessions on {t}"),
            Check::GrantsCaptured(t) => format!("grants captured from {t}"),
            Check::PartitioningMatches {
                table,
                partition_type,
                subpartition_type,
            } => format!("{table} is partitioned as {partition_type}/{subpartition_type}"),
            Check::StagingEmpty(t) => format!("staging table {t} is empty"),
            Check::StructurallyCompatible { source, target } => {
                format!("{target} is structurally compatible with {source}")
            }
            Check::PartitionExists { table, partition } => {
                format!("partition {partition} exists on {table}")
            }
        }
    }
}

/// Outcome of evaluating a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The condition holds.
    Pass,
    /// The condition does not hold.
    Fail(String),
    /// The condition is degraded but not fatal.
    Warn(String),
}

impl CheckOutcome {
    /// Whether the outcome is a pass.
    pub fn is_pass(&self) -> bool {
        matches!(self, CheckOutcome::Pass)
    }

    /// Whether the outcome is a hard failure.
    pub fn is_fail(&self) -> bool {
        matches!(self, CheckOutcome::Fail(_))
    }
}

impl std::fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckOutcome::Pass => write!(f, "PASS"),
            CheckOutcome::Fail(reason) => write!(f, "FAIL: {reason}"),
            CheckOutcome::Warn(reason) => write!(f, "WARN: {reason}"),
        }
    }
}

/// Result of running an ordered list of checks.
#[derive(Debug, Clone)]
pub struct GateReport {
    /// `(description, outcome)` per evaluated check, in order.
    pub outcomes: Vec<(String, CheckOutcome)>,
}

impl GateReport {
    /// The first hard failure, if any.
    pub fn first_failure(&self) -> Option<&(String, CheckOutcome)> {
        self.outcomes.iter().find(|(_, o)| o.is_fail())
    }

    /// Whether every check passed (warnings allowed).
    pub fn passed(&self) -> bool {
        self.first_failure().is_none()
    }

    /// Warnings raised during evaluation.
    pub fn warnings(&self) -> impl Iterator<Item = &(String, CheckOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CheckOutcome::Warn(_)))
    }

    /// The most severe outcome: the first failure, else the first
    /// warning, else `None` when everything passed.
    pub fn worst(&self) -> Option<&(String, CheckOutcome)> {
        self.first_failure().or_else(|| self.warnings().next())
    }
}

/// Evaluates checks against live table state.
pub struct ValidationGate;

impl ValidationGate {
    /// Evaluate one check. Never raises; always returns an outcome.
    pub fn check<I: TableInspector + ?Sized>(check: &Check, inspector: &I) -> CheckOutcome {
        let outcome = match check {
            Check::TableExists(t) => {
                if inspector.table_exists(t) {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail(format!("table {t} not found"))
                }
            }
            Check::TableAbsent(t) => {
                if inspector.table_exists(t) {
                    CheckOutcome::Fail(format!("table {t} already exists"))
                } else {
                    CheckOutcome::Pass
                }
            }
            Check::RowCountZero(t) => match inspector.row_count(t) {
                Some(0) => CheckOutcome::Pass,
                Some(n) => CheckOutcome::Fail(format!("table {t} holds {n} rows")),
                None => CheckOutcome::Fail(format!("row count unavailable for {t}")),
            },
            Check::RowCountMatch { source, target } => {
                match (inspector.row_count(source), inspector.row_count(target)) {
                    (Some(s), Some(t)) if s == t => CheckOutcome::Pass,
                    (Some(s), Some(t)) => CheckOutcome::Fail(format!(
                        "row count mismatch: {source}={s}, {target}={t}"
                    )),
                    _ => CheckOutcome::Fail(format!(
                        "row count unavailable for {source} or {target}"
                    )),
                }
            }
            Check::ConstraintsDisabled { table, expected } => {
                let disabled = inspector
                    .constraints(table)
                    .iter()
                    .filter(|c| !c.enabled)
                    .count();
                if disabled == *expected {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail(format!(
                        "{table} has {disabled} disabled constraints, expected {expected}"
                    ))
                }
            }
            Check::IndexCountAtLeast { table, expected } => {
                let count = inspector.indexes(table).len();
                if count >= *expected {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail(format!(
                        "{table} has {count} indexes, expected at least {expected}"
                    ))
                }
            }
            Check::IndexParity { source, target } => {
                Self::check_index_parity(source, target, inspector)
            }
            Check::ConstraintStateParity { source, target } => {
                Self::check_constraint_parity(source, target, inspector)
            }
            Check::NoActiveSessions(t) => {
                if inspector.has_active_sessions(t) {
                    CheckOutcome::Fail(format!("active sessions hold locks on {t}"))
                } else {
                    CheckOutcome::Pass
                }
            }
            Check::GrantsCaptured(t) => {
                if inspector.grants(t).is_empty() {
                    // A table genuinely without grants is legal, but the
                    // operator should see it before cutover.
                    CheckOutcome::Warn(format!("no grants captured from {t}"))
                } else {
                    CheckOutcome::Pass
                }
            }
            Check::PartitioningMatches {
                table,
                partition_type,
                subpartition_type,
            } => match inspector.partitioning(table) {
                Some((pt, st)) if pt == *partition_type && st == *subpartition_type => {
                    CheckOutcome::Pass
                }
                Some((pt, st)) => CheckOutcome::Fail(format!(
                    "{table} is partitioned as {pt}/{st}, expected {partition_type}/{subpartition_type}"
                )),
                None => CheckOutcome::Fail(format!("table {table} not found")),
            },
            Check::StagingEmpty(t) => match inspector.row_count(t) {
                Some(0) => CheckOutcome::Pass,
                Some(n) => CheckOutcome::Fail(format!("staging must be empty, {t} holds {n} rows")),
                None => CheckOutcome::Fail(format!("row count unavailable for {t}")),
            },
            Check::StructurallyCompatible { source, target } => {
                Self::check_structural_compatibility(source, target, inspector)
            }
            Check::PartitionExists { table, partition } => {
                let found = inspector
                    .partitions(table)
                    .iter()
                    .any(|p| p.name.eq_ignore_ascii_case(partition));
                if found {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail(format!("partition {partition} not found on {table}"))
                }
            }
        };

        debug!(check = %check.description(), outcome = %outcome, "validation check");
        outcome
    }

    /// Evaluate an ordered list of checks, collecting every outcome.
    pub fn run_all<I: TableInspector + ?Sized>(checks: &[Check], inspector: &I) -> GateReport {
        let outcomes = checks
            .iter()
            .map(|c| (c.description(), Self::check(c, inspector)))
            .collect();
        GateReport { outcomes }
    }

    fn check_index_parity<I: TableInspector + ?Sized>(
        source: &QualifiedName,
        target: &QualifiedName,
        inspector: &I,
    ) -> CheckOutcome {
        let source_indexes = inspector.indexes(source);
        let target_indexes = inspector.indexes(target);

        if source_indexes.len() != target_indexes.len() {
            return CheckOutcome::Fail(format!(
                "index count mismatch: {source}={}, {target}={}",
                source_indexes.len(),
                target_indexes.len()
            ));
        }

        let mut source_widths: Vec<usize> =
            source_indexes.iter().map(|i| i.columns.len()).collect();
        let mut target_widths: Vec<usize> =
            target_indexes.iter().map(|i| i.columns.len()).collect();
        source_widths.sort_unstable();
        target_widths.sort_unstable();
        if source_widths != target_widths {
            return CheckOutcome::Fail(format!(
                "per-index column counts differ between {source} and {target}"
            ));
        }

        CheckOutcome::Pass
    }

    fn check_structural_compatibility<I: TableInspector + ?Sized>(
        source: &QualifiedName,
        target: &QualifiedName,
        inspector: &I,
    ) -> CheckOutcome {
        if !inspector.table_exists(target) {
            return CheckOutcome::Fail(format!("table {target} not found"));
        }
        let source_columns = inspector.columns(source);
        let target_columns = inspector.columns(target);

        if source_columns.len() != target_columns.len() {
            return CheckOutcome::Fail(format!(
                "column count mismatch: {source}={}, {target}={}",
                source_columns.len(),
                target_columns.len()
            ));
        }

        for (s, t) in source_columns.iter().zip(target_columns.iter()) {
            if !s.name.eq_ignore_ascii_case(&t.name)
                || !s.data_type.eq_ignore_ascii_case(&t.data_type)
            {
                return CheckOutcome::Fail(format!(
                    "column mismatch between {source} and {target}: {} {} vs {} {}",
                    s.name, s.data_type, t.name, t.data_type
                ));
            }
        }

        CheckOutcome::Pass
    }

    fn check_constraint_parity<I: TableInspector + ?Sized>(
        source: &QualifiedName,
        target: &QualifiedName,
        inspector: &I,
    ) -> CheckOutcome {
        let source_cons = inspector.constraints(source);
        let target_cons = inspector.constraints(target);

        if source_cons.len() != target_cons.len() {
            return CheckOutcome::Fail(format!(
                "constraint count mismatch: {source}={}, {target}={}",
                source_cons.len(),
                target_cons.len()
            ));
        }

        let source_enabled = source_cons.iter().filter(|c| c.enabled).count();
        let target_enabled = target_cons.iter().filter(|c| c.enabled).count();
        if source_enabled != target_enabled {
            return CheckOutcome::Warn(format!(
                "enabled-state drift: {source} has {source_enabled} enabled, {target} has {target_enabled}"
            ));
        }

        CheckOutcome::Pass
    }
}
