//! Step plan generation.
//!
//! Expands a [`MigrationAction`] into an ordered, dependency-aware
//! list of steps. Phase 1 (structure + load, ids 00-40) is safe to
//! re-run; Phase 2 (cutover, ids 50-80) is not re-runnable without an
//! explicit rollback first.

use crate::classify::{MigrationAction, PlanAnnotations};
use crate::ident::{IdentError, QualifiedName};
use crate::snapshot::{
    IntervalUnit, PartitionType, SubpartitionType, TableSnapshot, TargetConfiguration,
};
use crate::validate::Check;
use thiserror::Error;
use tracing::info;

/// Plan-level validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    /// A derived working name failed identifier validation.
    #[error("invalid derived name: {0}")]
    Ident(#[from] IdentError),

    /// A step precondition failed.
    #[error("step {step} precondition failed ({check}): {reason}")]
    PreconditionFailed {
        /// The failing step.
        step: StepId,
        /// The check that failed.
        check: String,
        /// Why it failed.
        reason: String,
    },

    /// A step postcondition failed.
    #[error("step {step} postcondition failed ({check}): {reason}")]
    PostconditionFailed {
        /// The failing step.
        step: StepId,
        /// The check that failed.
        check: String,
        /// Why it failed.
        reason: String,
    },

    /// The staging table held rows when an exchange was requested.
    #[error("staging must be empty: {staging} holds {rows} rows")]
    StagingNotEmpty {
        /// The staging table.
        staging: String,
        /// Rows found.
        rows: u64,
    },

    /// Phase 2 was invoked without explicit operator confirmation.
    #[error("phase 2 cutover requires explicit operator confirmation")]
    ConfirmationRequired,
}

/// Stable two-digit step identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub u8);

impl StepId {
    /// Disable constraints ahead of the bulk load.
    pub const DISABLE_CONSTRAINTS: StepId = StepId(0);
    /// Create the replacement table with the target layout.
    pub const CREATE_TABLE: StepId = StepId(10);
    /// Initial bulk data load.
    pub const INITIAL_LOAD: StepId = StepId(20);
    /// Create single-column indexes.
    pub const SIMPLE_INDEXES: StepId = StepId(30);
    /// Recreate composite indexes.
    pub const COMPOSITE_INDEXES: StepId = StepId(35);
    /// Incremental delta load.
    pub const DELTA_LOAD: StepId = StepId(40);
    /// Atomic three-way rename cutover.
    pub const ATOMIC_SWAP: StepId = StepId(50);
    /// Restore captured grants.
    pub const RESTORE_GRANTS: StepId = StepId(60);
    /// Drop the retired table (manual only).
    pub const DROP_OLD_TABLE: StepId = StepId(70);
    /// Re-enable constraints and refresh statistics.
    pub const ENABLE_CONSTRAINTS: StepId = StepId(80);
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Functional phase of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Constraint disable/enable bookkeeping.
    Constraints,
    /// Structure creation.
    Create,
    /// Bulk data load.
    Load,
    /// Index build.
    Index,
    /// Incremental delta capture.
    Delta,
    /// Cutover swap.
    Swap,
    /// Grant restoration.
    Grants,
    /// Old-table teardown.
    Drop,
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepPhase::Constraints => write!(f, "constraints"),
            StepPhase::Create => write!(f, "create"),
            StepPhase::Load => write!(f, "load"),
            StepPhase::Index => write!(f, "index"),
            StepPhase::Delta => write!(f, "delta"),
            StepPhase::Swap => write!(f, "swap"),
            StepPhase::Grants => write!(f, "grants"),
            StepPhase::Drop => write!(f, "drop"),
        }
    }
}

/// Resumability grouping. Phase 1 steps are idempotent and re-runnable;
/// Phase 2 steps require explicit rollback before re-running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseGroup {
    /// Structure + load (ids 00-40).
    PhaseOne,
    /// Cutover + cleanup (ids 50-80).
    PhaseTwo,
}

/// Parameters the script emitter needs to render a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepParams {
    /// Target partition key column.
    pub partition_column: Option<String>,
    /// Target interval unit.
    pub interval_unit: Option<IntervalUnit>,
    /// Target subpartition key column.
    pub subpartition_column: Option<String>,
    /// Target subpartition count (0 = none).
    pub subpartition_count: u32,
    /// Target tablespace.
    pub tablespace: Option<String>,
    /// Parallel degree hint.
    pub parallel_degree: u32,
    /// Columns updated when a delta row matches; empty = insert-only.
    pub delta_update_columns: Vec<String>,
    /// Retention before the manual drop is allowed.
    pub drop_after_days: u32,
}

/// One planned operation.
#[derive(Debug, Clone)]
pub struct Step {
    /// Stable identifier, strictly increasing within a plan.
    pub id: StepId,
    /// Functional phase.
    pub phase: StepPhase,
    /// Human-readable description.
    pub description: String,
    /// Ordered preconditions, gated before execution.
    pub preconditions: Vec<Check>,
    /// Ordered postconditions, gated after execution.
    pub postconditions: Vec<Check>,
    /// "Already satisfied" probe; a pass skips the step entirely.
    pub idempotency: Option<Check>,
    /// Parameters for the script emitter.
    pub params: StepParams,
    /// Explicit skipped marker (audit trail, never a silent omission).
    pub skipped_marker: bool,
    /// Never auto-executed; requires explicit manual invocation.
    pub manual_only: bool,
}

impl Step {
    fn new(id: StepId, phase: StepPhase, description: impl Into<String>) -> Self {
        Self {
            id,
            phase,
            description: description.into(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            idempotency: None,
            params: StepParams::default(),
            skipped_marker: false,
            manual_only: false,
        }
    }

    fn pre(mut self, check: Check) -> Self {
        self.preconditions.push(check);
        self
    }

    fn post(mut self, check: Check) -> Self {
        self.postconditions.push(check);
        self
    }

    fn idempotent_when(mut self, check: Check) -> Self {
        self.idempotency = Some(check);
        self
    }

    fn with_params(mut self, params: StepParams) -> Self {
        self.params = params;
        self
    }

    fn skipped(mut self) -> Self {
        self.skipped_marker = true;
        self
    }

    fn manual(mut self) -> Self {
        self.manual_only = true;
        self
    }

    /// Which resumability group the step belongs to.
    pub fn phase_group(&self) -> PhaseGroup {
        if self.id <= StepId::DELTA_LOAD {
            PhaseGroup::PhaseOne
        } else {
            PhaseGroup::PhaseTwo
        }
    }
}

/// Ordered, immutable sequence of steps for one table.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// The table being migrated.
    pub table: QualifiedName,
    /// The replacement table's working name.
    pub new_name: QualifiedName,
    /// The retired table's parking name.
    pub old_name: QualifiedName,
    /// The classified action this plan implements.
    pub action: MigrationAction,
    /// Snapshot-derived annotations that shaped the plan.
    pub annotations: PlanAnnotations,
    /// Ordered steps, ids strictly increasing.
    pub steps: Vec<Step>,
}

impl MigrationPlan {
    /// Build the plan for a classified action.
    pub fn build(
        action: MigrationAction,
        snapshot: &TableSnapshot,
        target: &TargetConfiguration,
    ) -> Result<Self, PlanValidationError> {
        let table = snapshot.name.clone();
        let new_name = table.new_name()?;
        let old_name = table.old_name()?;
        let annotations = PlanAnnotations::from_snapshot(snapshot);

        let steps = if action == MigrationAction::None {
            vec![Step::new(
                StepId::DISABLE_CONSTRAINTS,
                StepPhase::Create,
                format!("{table} already matches the target layout; nothing to do"),
            )
            .skipped()]
        } else {
            Self::build_steps(action, snapshot, target, &table, &new_name, &old_name, &annotations)
        };

        debug_assert!(
            steps.windows(2).all(|w| w[0].id < w[1].id),
            "step ids must be strictly increasing"
        );

        info!(
            table = %table,
            action = %action,
            steps = steps.len(),
            "built migration plan"
        );

        Ok(Self {
            table,
            new_name,
            old_name,
            action,
            annotations,
            steps,
        })
    }

    fn build_steps(
        action: MigrationAction,
        snapshot: &TableSnapshot,
        target: &TargetConfiguration,
        table: &QualifiedName,
        new_name: &QualifiedName,
        old_name: &QualifiedName,
        annotations: &PlanAnnotations,
    ) -> Vec<Step> {
        let mut steps = Vec::new();

        let enabled_constraints = snapshot.enabled_constraints().count();
        let simple_indexes = snapshot.simple_indexes().count();
        // Actions that introduce or change hash subpartitioning force
        // the dedicated index rebuild step: existing indexes must be
        // recreated against the new composite layout even when none of
        // them is composite itself.
        let subpartitioning_changes = matches!(
            action,
            MigrationAction::AddIntervalHashPartitioning
                | MigrationAction::AddHashSubpartitions
                | MigrationAction::ConvertIntervalToIntervalHash
        );
        let composite_rebuild = annotations.composite_indexes > 0 || subpartitioning_changes;
        let target_subpartition_type = if target.wants_subpartitions() {
            SubpartitionType::Hash
        } else {
            SubpartitionType::None
        };

        let create_params = StepParams {
            partition_column: Some(target.partition_column.clone()),
            interval_unit: target.interval_unit,
            subpartition_column: target.subpartition_column.clone(),
            subpartition_count: target.subpartition_count,
            tablespace: target.tablespace.clone(),
            parallel_degree: target.parallel_degree,
            ..StepParams::default()
        };

        // 00: the bulk load moves data, so constraints come off first.
        steps.push(
            Step::new(
                StepId::DISABLE_CONSTRAINTS,
                StepPhase::Constraints,
                format!("disable {enabled_constraints} constraints on {table}"),
            )
            .pre(Check::TableExists(table.clone()))
            .post(Check::ConstraintsDisabled {
                table: table.clone(),
                expected: enabled_constraints,
            })
            .idempotent_when(Check::ConstraintsDisabled {
                table: table.clone(),
                expected: enabled_constraints,
            }),
        );

        // 10: replacement table, mirroring LOB storage from the source.
        let mut create_description =
            format!("create {new_name} with target partitioning");
        if annotations.has_lob_columns {
            create_description.push_str(" and mirrored LOB storage");
        }
        steps.push(
            Step::new(StepId::CREATE_TABLE, StepPhase::Create, create_description)
                .pre(Check::TableAbsent(new_name.clone()))
                .post(Check::TableExists(new_name.clone()))
                .post(Check::PartitioningMatches {
                    table: new_name.clone(),
                    partition_type: PartitionType::Interval,
                    subpartition_type: target_subpartition_type,
                })
                .idempotent_when(Check::PartitioningMatches {
                    table: new_name.clone(),
                    partition_type: PartitionType::Interval,
                    subpartition_type: target_subpartition_type,
                })
                .with_params(create_params.clone()),
        );

        // 20: bulk load, ordered by partition key for load locality.
        steps.push(
            Step::new(
                StepId::INITIAL_LOAD,
                StepPhase::Load,
                format!(
                    "load {} rows from {table} into {new_name} ordered by {}",
                    annotations.row_count, target.partition_column
                ),
            )
            .pre(Check::RowCountZero(new_name.clone()))
            .post(Check::RowCountMatch {
                source: table.clone(),
                target: new_name.clone(),
            })
            .idempotent_when(Check::RowCountMatch {
                source: table.clone(),
                target: new_name.clone(),
            })
            .with_params(StepParams {
                partition_column: Some(target.partition_column.clone()),
                parallel_degree: target.parallel_degree,
                ..StepParams::default()
            }),
        );

        // 30: single-column indexes. Full index parity is asserted here
        // only when no composite step follows.
        let mut simple = Step::new(
            StepId::SIMPLE_INDEXES,
            StepPhase::Index,
            format!("create {simple_indexes} simple indexes on {new_name}"),
        )
        .pre(Check::TableExists(new_name.clone()))
        .idempotent_when(Check::IndexCountAtLeast {
            table: new_name.clone(),
            expected: simple_indexes,
        });
        if !composite_rebuild {
            simple = simple.post(Check::IndexParity {
                source: table.clone(),
                target: new_name.clone(),
            });
        }
        steps.push(simple);

        // 35: composite rebuilds. Included when the source has any
        // composite indexes or the layout gains subpartitions.
        if composite_rebuild {
            let description = if annotations.composite_indexes > 0 {
                format!(
                    "recreate {} composite indexes on {new_name}",
                    annotations.composite_indexes
                )
            } else {
                format!("rebuild indexes on {new_name} against the subpartitioned layout")
            };
            steps.push(
                Step::new(StepId::COMPOSITE_INDEXES, StepPhase::Index, description)
                    .pre(Check::TableExists(new_name.clone()))
                    .post(Check::IndexParity {
                        source: table.clone(),
                        target: new_name.clone(),
                    })
                    .idempotent_when(Check::IndexCountAtLeast {
                        table: new_name.clone(),
                        expected: snapshot.indexes.len(),
                    }),
            );
        }

        // 40: delta merge, or an explicit skipped marker for the audit
        // trail when incremental capture is off.
        if target.delta_capture {
            steps.push(
                Step::new(
                    StepId::DELTA_LOAD,
                    StepPhase::Delta,
                    format!(
                        "merge rows changed since initial load from {table} into {new_name}"
                    ),
                )
                .pre(Check::TableExists(new_name.clone()))
                .with_params(StepParams {
                    partition_column: Some(target.partition_column.clone()),
                    delta_update_columns: target.delta_update_columns.clone(),
                    ..StepParams::default()
                }),
            );
        } else {
            steps.push(
                Step::new(
                    StepId::DELTA_LOAD,
                    StepPhase::Delta,
                    "delta load skipped: incremental capture disabled".to_string(),
                )
                .skipped(),
            );
        }

        // 50: cutover. The swap protocol re-runs these gates itself;
        // they are carried here for emission and pre-flight review.
        steps.push(
            Step::new(
                StepId::ATOMIC_SWAP,
                StepPhase::Swap,
                format!("atomic rename cutover: {table} -> {old_name}, {new_name} -> {table}"),
            )
            .pre(Check::NoActiveSessions(table.clone()))
            .pre(Check::RowCountMatch {
                source: table.clone(),
                target: new_name.clone(),
            })
            .pre(Check::IndexParity {
                source: table.clone(),
                target: new_name.clone(),
            })
            .pre(Check::ConstraintStateParity {
                source: table.clone(),
                target: new_name.clone(),
            })
            .pre(Check::GrantsCaptured(table.clone()))
            .post(Check::TableExists(table.clone()))
            .post(Check::TableExists(old_name.clone()))
            .post(Check::TableAbsent(new_name.clone()))
            .post(Check::PartitioningMatches {
                table: table.clone(),
                partition_type: PartitionType::Interval,
                subpartition_type: target_subpartition_type,
            }),
        );

        // 60: grants captured from the source snapshot.
        steps.push(
            Step::new(
                StepId::RESTORE_GRANTS,
                StepPhase::Grants,
                format!("restore {} grants on {table}", snapshot.grants.len()),
            )
            .pre(Check::TableExists(table.clone()))
            .post(Check::GrantsCaptured(table.clone())),
        );

        // 70: irreversible, so never auto-executed.
        steps.push(
            Step::new(
                StepId::DROP_OLD_TABLE,
                StepPhase::Drop,
                format!(
                    "drop {old_name} after {} days retention (manual invocation only)",
                    target.drop_after_days
                ),
            )
            .pre(Check::TableExists(old_name.clone()))
            .with_params(StepParams {
                drop_after_days: target.drop_after_days,
                ..StepParams::default()
            })
            .manual(),
        );

        // 80: constraints back on, then statistics.
        steps.push(
            Step::new(
                StepId::ENABLE_CONSTRAINTS,
                StepPhase::Constraints,
                format!("re-enable constraints and refresh statistics on {table}"),
            )
            .pre(Check::TableExists(table.clone()))
            .post(Check::ConstraintsDisabled {
                table: table.clone(),
                expected: 0,
            }),
        );

        steps
    }

    /// Steps in the resumable structure + load group.
    pub fn phase_one(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| s.phase_group() == PhaseGroup::PhaseOne)
    }

    /// Steps in the cutover group.
    pub fn phase_two(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| s.phase_group() == PhaseGroup::PhaseTwo)
    }

    /// Look up a step by id.
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether this plan does nothing.
    pub fn is_noop(&self) -> bool {
        self.action == MigrationAction::None
    }

    /// Walk the plan through a script emitter, in step order.
    pub fn render_into(
        &self,
        emitter: &mut dyn crate::engine::ScriptEmitter,
    ) -> Result<(), crate::engine::EngineError> {
        for step in &self.steps {
            emitter.emit_step(step)?;
        }
        Ok(())
    }
}
