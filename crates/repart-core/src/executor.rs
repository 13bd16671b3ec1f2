//! Plan execution.
//!
//! Walks a [`MigrationPlan`] step by step against a live [`DdlEngine`]:
//! idempotency probes skip work already done, preconditions gate entry,
//! postconditions verify the result, and every outcome is persisted so
//! an interrupted Phase 1 run resumes where it left off. Phase 2 never
//! starts without explicit operator confirmation, and the old-table
//! drop is never executed by the automatic path at all.

use crate::engine::{DdlEngine, EngineError};
use crate::plan::{MigrationPlan, PlanValidationError, Step, StepId};
use crate::snapshot::{PartitionType, SubpartitionType, TableSnapshot};
use crate::state::{generate_run_id, CheckpointStore, RunState, StateError, StepStatus};
use crate::swap::SwapTransaction;
use crate::validate::{Check, CheckOutcome, ValidationGate};
use thiserror::Error;
use tracing::{info, warn};

/// Execution-level errors. Step failures are reported in the
/// [`ExecutionReport`]; these cover everything that stops a run from
/// being driven at all.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A plan-level precondition on the run itself failed.
    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    /// Run-state persistence failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A manually-invoked operation failed in the engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Executed and postconditions held.
    Completed,
    /// Idempotency probe passed; nothing to do.
    AlreadySatisfied,
    /// The plan carries this step as an explicit skipped marker.
    SkippedMarker,
    /// Manual-only step; the automatic path never runs it.
    ManualOnly,
    /// A gate or the engine failed.
    Failed(String),
}

impl StepOutcome {
    /// Whether the run may proceed past this step.
    pub fn allows_continue(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Completed => write!(f, "completed"),
            StepOutcome::AlreadySatisfied => write!(f, "already satisfied"),
            StepOutcome::SkippedMarker => write!(f, "skipped"),
            StepOutcome::ManualOnly => write!(f, "manual only"),
            StepOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Per-step entry in the execution report.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step id.
    pub id: StepId,
    /// Step description, carried for audit output.
    pub description: String,
    /// What happened.
    pub outcome: StepOutcome,
    /// Non-fatal validation warnings raised along the way.
    pub warnings: Vec<String>,
}

/// Outcome of driving one phase of a plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Run ID the report belongs to.
    pub run_id: [u8; 16],
    /// The table under migration, display form.
    pub table: String,
    /// One entry per step attempted, in plan order.
    pub reports: Vec<StepReport>,
    /// Whether the run stopped early on a failure.
    pub halted: bool,
}

impl ExecutionReport {
    /// Process exit code: 0 when every step succeeded, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.halted {
            1
        } else {
            0
        }
    }

    /// The failing step, if the run halted.
    pub fn failure(&self) -> Option<&StepReport> {
        self.reports
            .iter()
            .find(|r| matches!(r.outcome, StepOutcome::Failed(_)))
    }

    /// All warnings raised across the run.
    pub fn warnings(&self) -> impl Iterator<Item = &String> {
        self.reports.iter().flat_map(|r| r.warnings.iter())
    }
}

/// Drives a plan against a live engine.
pub struct PlanExecutor<'a> {
    plan: &'a MigrationPlan,
    snapshot: &'a TableSnapshot,
    continue_on_validation_failure: bool,
}

impl<'a> PlanExecutor<'a> {
    /// Set up an executor over a plan and the snapshot it was built from.
    pub fn new(plan: &'a MigrationPlan, snapshot: &'a TableSnapshot) -> Self {
        Self {
            plan,
            snapshot,
            continue_on_validation_failure: false,
        }
    }

    /// Downgrade gate failures to warnings instead of halting.
    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_validation_failure = true;
        self
    }

    /// Run the structure + load group (ids 00-40) from the start.
    pub fn run_phase_one(
        &self,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
    ) -> Result<ExecutionReport, ExecutorError> {
        let run = self.fresh_run();
        self.drive(run, engine, store, false)
    }

    /// Resume an interrupted Phase 1 run, skipping recorded steps.
    pub fn resume_phase_one(
        &self,
        run_id: &[u8; 16],
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
    ) -> Result<ExecutionReport, ExecutorError> {
        let run = store.load_run(run_id)?;
        self.drive(run, engine, store, false)
    }

    /// Run the cutover group (ids 50-80).
    ///
    /// Refuses to start unless `confirmed` is set; these steps are not
    /// re-runnable without an explicit rollback first.
    pub fn run_phase_two(
        &self,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
        confirmed: bool,
    ) -> Result<ExecutionReport, ExecutorError> {
        if !confirmed {
            return Err(PlanValidationError::ConfirmationRequired.into());
        }
        let run = self.fresh_run();
        self.drive(run, engine, store, true)
    }

    /// Manually invoke the retired-table drop (step 70). This is the
    /// only path that reaches `drop_table`.
    pub fn drop_old_table(&self, engine: &mut dyn DdlEngine) -> Result<(), ExecutorError> {
        let Some(step) = self.plan.step(StepId::DROP_OLD_TABLE) else {
            return Err(EngineError::Unsupported("plan has no drop step".into()).into());
        };
        for check in &step.preconditions {
            if let CheckOutcome::Fail(reason) = ValidationGate::check(check, &*engine) {
                return Err(PlanValidationError::PreconditionFailed {
                    step: step.id,
                    check: check.description(),
                    reason,
                }
                .into());
            }
        }
        engine.drop_table(&self.plan.old_name)?;
        info!(table = %self.plan.old_name, "dropped retired table");
        Ok(())
    }

    fn fresh_run(&self) -> RunState {
        let step_ids: Vec<u8> = self.plan.steps.iter().map(|s| s.id.0).collect();
        RunState::new(
            generate_run_id(),
            self.plan.table.to_string(),
            self.plan.action.to_string(),
            &step_ids,
        )
    }

    fn drive(
        &self,
        mut run: RunState,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
        phase_two: bool,
    ) -> Result<ExecutionReport, ExecutorError> {
        let steps: Vec<&Step> = if phase_two {
            self.plan.phase_two().collect()
        } else {
            self.plan.phase_one().collect()
        };

        let mut reports = Vec::with_capacity(steps.len());
        let mut halted = false;

        for step in steps {
            if run.status_of(step.id.0).is_some_and(|s| s.is_done()) {
                reports.push(StepReport {
                    id: step.id,
                    description: step.description.clone(),
                    outcome: StepOutcome::AlreadySatisfied,
                    warnings: Vec::new(),
                });
                continue;
            }

            let report = self.run_step(step, &run, engine);
            let status = match &report.outcome {
                StepOutcome::Completed => StepStatus::Completed,
                StepOutcome::AlreadySatisfied => StepStatus::AlreadySatisfied,
                StepOutcome::SkippedMarker | StepOutcome::ManualOnly => StepStatus::Skipped,
                StepOutcome::Failed(_) => StepStatus::Failed,
            };
            let detail = match &report.outcome {
                StepOutcome::Failed(reason) => Some(reason.clone()),
                _ => None,
            };
            run.mark(step.id.0, status, detail);
            store.save_run(&run)?;

            let stop = !report.outcome.allows_continue();
            reports.push(report);
            if stop {
                halted = true;
                break;
            }
        }

        let report = ExecutionReport {
            run_id: run.run_id,
            table: run.table.clone(),
            reports,
            halted,
        };
        info!(
            table = %report.table,
            steps = report.reports.len(),
            halted = report.halted,
            "plan execution finished"
        );
        Ok(report)
    }

    fn run_step(&self, step: &Step, run: &RunState, engine: &mut dyn DdlEngine) -> StepReport {
        let mut warnings = Vec::new();

        if step.skipped_marker {
            return StepReport {
                id: step.id,
                description: step.description.clone(),
                outcome: StepOutcome::SkippedMarker,
                warnings,
            };
        }
        if step.manual_only {
            return StepReport {
                id: step.id,
                description: step.description.clone(),
                outcome: StepOutcome::ManualOnly,
                warnings,
            };
        }

        if let Some(probe) = &step.idempotency {
            if ValidationGate::check(probe, &*engine).is_pass() {
                info!(step = %step.id, "idempotency probe passed, skipping");
                return StepReport {
                    id: step.id,
                    description: step.description.clone(),
                    outcome: StepOutcome::AlreadySatisfied,
                    warnings,
                };
            }
        }

        if let Some(outcome) =
            self.gate(step, &step.preconditions, "precondition", &mut warnings, engine)
        {
            return StepReport {
                id: step.id,
                description: step.description.clone(),
                outcome,
                warnings,
            };
        }

        if let Err(reason) = self.execute_step(step, run, engine) {
            return StepReport {
                id: step.id,
                description: step.description.clone(),
                outcome: StepOutcome::Failed(reason),
                warnings,
            };
        }

        if let Some(outcome) =
            self.gate(step, &step.postconditions, "postcondition", &mut warnings, engine)
        {
            return StepReport {
                id: step.id,
                description: step.description.clone(),
                outcome,
                warnings,
            };
        }

        StepReport {
            id: step.id,
            description: step.description.clone(),
            outcome: StepOutcome::Completed,
            warnings,
        }
    }

    /// Evaluate a gate; `Some(outcome)` means the step is finished
    /// (failed), `None` means proceed.
    fn gate(
        &self,
        step: &Step,
        checks: &[Check],
        kind: &str,
        warnings: &mut Vec<String>,
        engine: &mut dyn DdlEngine,
    ) -> Option<StepOutcome> {
        for check in checks {
            match ValidationGate::check(check, &*engine) {
                CheckOutcome::Pass => {}
                CheckOutcome::Warn(detail) => {
                    warn!(step = %step.id, check = %check.description(), %detail, "validation warning");
                    warnings.push(format!("{}: {detail}", check.description()));
                }
                CheckOutcome::Fail(reason) => {
                    if self.continue_on_validation_failure {
                        warn!(
                            step = %step.id,
                            check = %check.description(),
                            %reason,
                            "{kind} failed, continuing by configuration"
                        );
                        warnings.push(format!(
                            "{kind} overridden ({}): {reason}",
                            check.description()
                        ));
                    } else {
                        return Some(StepOutcome::Failed(format!(
                            "{kind} failed ({}): {reason}",
                            check.description()
                        )));
                    }
                }
            }
        }
        None
    }

    fn execute_step(
        &self,
        step: &Step,
        run: &RunState,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), String> {
        match step.id {
            StepId::DISABLE_CONSTRAINTS => {
                for constraint in self.snapshot.enabled_constraints() {
                    engine
                        .set_constraint_enabled(&self.plan.table, &constraint.name, false)
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            StepId::CREATE_TABLE => engine
                .create_table(&self.plan.new_name, &step.params, self.snapshot)
                .map_err(|e| e.to_string()),
            StepId::INITIAL_LOAD => {
                let rows = engine
                    .copy_rows(
                        &self.plan.table,
                        &self.plan.new_name,
                        step.params.parallel_degree,
                    )
                    .map_err(|e| e.to_string())?;
                info!(step = %step.id, rows, "initial load complete");
                Ok(())
            }
            StepId::SIMPLE_INDEXES => {
                for index in self.snapshot.simple_indexes() {
                    engine
                        .create_index(&self.plan.new_name, index)
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            StepId::COMPOSITE_INDEXES => {
                for index in self.snapshot.composite_indexes() {
                    engine
                        .create_index(&self.plan.new_name, index)
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            StepId::DELTA_LOAD => {
                let Some(key_column) = step.params.partition_column.as_deref() else {
                    return Err("delta load has no key column".to_string());
                };
                // The merge picks up everything written after the bulk
                // load finished, per the recorded step-20 completion.
                let Some(cutoff) = run
                    .steps
                    .iter()
                    .find(|s| s.id == StepId::INITIAL_LOAD.0 && s.status.is_done())
                    .map(|s| s.updated_at)
                else {
                    return Err("delta load requires a completed initial load".to_string());
                };
                let rows = engine
                    .merge_delta(
                        &self.plan.table,
                        &self.plan.new_name,
                        key_column,
                        &step.params.delta_update_columns,
                        cutoff,
                    )
                    .map_err(|e| e.to_string())?;
                info!(step = %step.id, rows, cutoff, "delta merge complete");
                Ok(())
            }
            StepId::ATOMIC_SWAP => {
                let expected = self.expected_partitioning(step);
                let mut swap = SwapTransaction::new(self.plan.table.clone(), expected)
                    .map_err(|e| e.to_string())?;
                swap.execute(engine).map_err(|e| e.to_string())
            }
            StepId::RESTORE_GRANTS => {
                for grant in &self.snapshot.grants {
                    engine
                        .apply_grant(&self.plan.table, grant)
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            StepId::ENABLE_CONSTRAINTS => {
                for constraint in self.snapshot.enabled_constraints() {
                    engine
                        .set_constraint_enabled(&self.plan.table, &constraint.name, true)
                        .map_err(|e| e.to_string())?;
                }
                engine
                    .gather_statistics(&self.plan.table)
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("no handler for step {other}")),
        }
    }

    /// Post-swap layout the cutover must leave behind, read off the
    /// step's own postconditions.
    fn expected_partitioning(&self, step: &Step) -> (PartitionType, SubpartitionType) {
        step.postconditions
            .iter()
            .find_map(|c| match c {
                Check::PartitioningMatches {
                    partition_type,
                    subpartition_type,
                    ..
                } => Some((*partition_type, *subpartition_type)),
                _ => None,
            })
            .unwrap_or((PartitionType::Interval, SubpartitionType::None))
    }
}
