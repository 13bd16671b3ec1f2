//! Partition exchange saga.
//!
//! Ages a partition out of the active table through the staging table
//! into history without moving rows: every exchange is a metadata-only
//! segment swap. Steps 2-5 are individually atomic but the sequence is
//! not; a checkpoint is persisted after each completed step so an
//! interrupted run resumes deterministically instead of guessing state
//! from inspection.

use crate::engine::DdlEngine;
use crate::ident::QualifiedName;
use crate::plan::PlanValidationError;
use crate::state::{current_timestamp, generate_run_id, CheckpointStore, StateError};
use crate::validate::{Check, ValidationGate};
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Saga errors.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The active table has no partitions to age out.
    #[error("no partitions available on {table}")]
    NoPartitions {
        /// The active table.
        table: String,
    },

    /// A precondition failed before any exchange was attempted.
    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    /// A step failed mid-sequence; the checkpoint records the last
    /// completed step so the run can be resumed.
    #[error("saga step {step} failed: {reason}")]
    Recoverable {
        /// The step that failed.
        step: SagaStep,
        /// Why it failed.
        reason: String,
        /// State as of the last completed step.
        checkpoint: ExchangeCheckpoint,
    },

    /// Checkpoint persistence failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The checkpoint does not carry the data the step needs.
    #[error("checkpoint corrupted: {0}")]
    Corrupted(String),
}

/// The five saga operations, executed strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Archive, Serialize, Deserialize)]
pub enum SagaStep {
    /// Pick the oldest active partition (ascending position, exactly one).
    SelectOldestPartition,
    /// Swap the selected partition's segment into the empty staging table.
    ExchangeActiveToStaging,
    /// Add a history partition with the exchanged partition's bound.
    CreateMatchingHistoryPartition,
    /// Swap staging's segment into the new history partition.
    ExchangeStagingToHistory,
    /// Remove the now-empty partition shell from the active table.
    DropEmptyActivePartition,
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaStep::SelectOldestPartition => write!(f, "select_oldest_partition"),
            SagaStep::ExchangeActiveToStaging => write!(f, "exchange_active_to_staging"),
            SagaStep::CreateMatchingHistoryPartition => {
                write!(f, "create_matching_history_partition")
            }
            SagaStep::ExchangeStagingToHistory => write!(f, "exchange_staging_to_history"),
            SagaStep::DropEmptyActivePartition => write!(f, "drop_empty_active_partition"),
        }
    }
}

/// Which table currently owns the aged data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ExchangeLocation {
    /// Data still sits in the active table.
    InActive,
    /// Data sits in the staging table.
    InStaging,
    /// Data sits in the history table.
    InHistory,
    /// The empty active shell has been dropped; saga complete.
    Dropped,
}

impl std::fmt::Display for ExchangeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeLocation::InActive => write!(f, "in_active"),
            ExchangeLocation::InStaging => write!(f, "in_staging"),
            ExchangeLocation::InHistory => write!(f, "in_history"),
            ExchangeLocation::Dropped => write!(f, "dropped"),
        }
    }
}

/// Persisted saga state.
///
/// One record per saga, overwritten after each completed step. Table
/// names are stored in display form and re-validated on resume.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct ExchangeCheckpoint {
    /// Unique saga ID.
    pub saga_id: [u8; 16],
    /// Active (hot) table, display form.
    pub active: String,
    /// Staging table, display form.
    pub staging: String,
    /// History (cold) table, display form.
    pub history: String,
    /// Selected partition name, once step 1 completed.
    pub partition_name: Option<String>,
    /// Selected partition position.
    pub partition_position: Option<u32>,
    /// Selected partition's upper-bound key value.
    pub upper_bound: Option<String>,
    /// Selected partition's row count at selection time.
    pub partition_rows: Option<u64>,
    /// Last completed step.
    pub completed: Option<SagaStep>,
    /// Current owner of the data segment.
    pub location: ExchangeLocation,
    /// When the saga started (microseconds since epoch).
    pub started_at: u64,
    /// When the checkpoint was last written.
    pub updated_at: u64,
}

impl ExchangeCheckpoint {
    fn new(
        saga_id: [u8; 16],
        active: &QualifiedName,
        staging: &QualifiedName,
        history: &QualifiedName,
    ) -> Self {
        let now = current_timestamp();
        Self {
            saga_id,
            active: active.to_string(),
            staging: staging.to_string(),
            history: history.to_string(),
            partition_name: None,
            partition_position: None,
            upper_bound: None,
            partition_rows: None,
            completed: None,
            location: ExchangeLocation::InActive,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether a step has already completed.
    pub fn step_done(&self, step: SagaStep) -> bool {
        self.completed.is_some_and(|done| done >= step)
    }

    /// Whether the saga reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        self.location == ExchangeLocation::Dropped
    }

    fn mark(&mut self, step: SagaStep, location: ExchangeLocation) {
        self.completed = Some(step);
        self.location = location;
        self.updated_at = current_timestamp();
    }

    /// Serialize the checkpoint to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize a checkpoint from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| StateError::Deserialization(e.to_string()))
    }
}

/// Drives one active -> staging -> history lifecycle transition.
pub struct ExchangeSaga {
    active: QualifiedName,
    staging: QualifiedName,
    history: QualifiedName,
}

impl ExchangeSaga {
    /// Set up a saga over the three lifecycle tables.
    pub fn new(active: QualifiedName, staging: QualifiedName, history: QualifiedName) -> Self {
        Self {
            active,
            staging,
            history,
        }
    }

    /// Run the full lifecycle from the beginning.
    pub fn run(
        &self,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
    ) -> Result<ExchangeCheckpoint, SagaError> {
        let mut checkpoint =
            ExchangeCheckpoint::new(generate_run_id(), &self.active, &self.staging, &self.history);
        self.drive(&mut checkpoint, engine, store)?;
        Ok(checkpoint)
    }

    /// Resume from a persisted checkpoint, re-attempting the first
    /// incomplete step without re-running completed ones.
    pub fn resume(
        &self,
        mut checkpoint: ExchangeCheckpoint,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
    ) -> Result<ExchangeCheckpoint, SagaError> {
        info!(
            saga_id = ?checkpoint.saga_id,
            completed = ?checkpoint.completed,
            location = %checkpoint.location,
            "resuming partition exchange saga"
        );
        self.drive(&mut checkpoint, engine, store)?;
        Ok(checkpoint)
    }

    fn drive(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        engine: &mut dyn DdlEngine,
        store: &CheckpointStore,
    ) -> Result<(), SagaError> {
        if !checkpoint.step_done(SagaStep::SelectOldestPartition) {
            self.select_oldest(checkpoint, engine)?;
            store.save_saga(checkpoint)?;
        }

        let partition = checkpoint
            .partition_name
            .clone()
            .ok_or_else(|| SagaError::Corrupted("selection completed without a partition".into()))?;

        if !checkpoint.step_done(SagaStep::ExchangeActiveToStaging) {
            self.exchange_to_staging(checkpoint, &partition, engine)?;
            store.save_saga(checkpoint)?;
        }

        if !checkpoint.step_done(SagaStep::CreateMatchingHistoryPartition) {
            self.create_history_partition(checkpoint, &partition, engine)?;
            store.save_saga(checkpoint)?;
        }

        if !checkpoint.step_done(SagaStep::ExchangeStagingToHistory) {
            self.exchange_to_history(checkpoint, &partition, engine)?;
            store.save_saga(checkpoint)?;
        }

        if !checkpoint.step_done(SagaStep::DropEmptyActivePartition) {
            self.drop_active_shell(checkpoint, &partition, engine)?;
            store.save_saga(checkpoint)?;
        }

        info!(
            saga_id = ?checkpoint.saga_id,
            partition = %partition,
            "partition exchange saga complete"
        );
        Ok(())
    }

    fn select_oldest(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), SagaError> {
        let partitions = engine.partitions(&self.active);
        // Tie-break rule: ascending position, exactly one.
        let oldest = partitions
            .iter()
            .min_by_key(|p| p.position)
            .ok_or_else(|| SagaError::NoPartitions {
                table: self.active.to_string(),
            })?;

        checkpoint.partition_name = Some(oldest.name.clone());
        checkpoint.partition_position = Some(oldest.position);
        checkpoint.upper_bound = Some(oldest.high_bound.clone());
        checkpoint.partition_rows = Some(oldest.row_count);
        checkpoint.mark(SagaStep::SelectOldestPartition, ExchangeLocation::InActive);

        info!(
            partition = %oldest.name,
            position = oldest.position,
            rows = oldest.row_count,
            "selected oldest partition"
        );
        Ok(())
    }

    fn exchange_to_staging(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        partition: &str,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), SagaError> {
        // Fail fast before touching metadata; no partial exchange.
        match engine.row_count(&self.staging) {
            Some(0) => {}
            Some(rows) => {
                return Err(PlanValidationError::StagingNotEmpty {
                    staging: self.staging.to_string(),
                    rows,
                }
                .into())
            }
            None => {
                return Err(SagaError::Recoverable {
                    step: SagaStep::ExchangeActiveToStaging,
                    reason: format!("staging table {} not found", self.staging),
                    checkpoint: checkpoint.clone(),
                })
            }
        }

        // A segment swap needs identical column lists; an incompatible
        // staging table must be fixed by the operator before resuming.
        let compatible = ValidationGate::check(
            &Check::StructurallyCompatible {
                source: self.active.clone(),
                target: self.staging.clone(),
            },
            &*engine,
        );
        if let crate::validate::CheckOutcome::Fail(reason) = compatible {
            return Err(SagaError::Recoverable {
                step: SagaStep::ExchangeActiveToStaging,
                reason,
                checkpoint: checkpoint.clone(),
            });
        }

        engine
            .exchange_partition(&self.active, partition, &self.staging)
            .map_err(|e| SagaError::Recoverable {
                step: SagaStep::ExchangeActiveToStaging,
                reason: e.to_string(),
                checkpoint: checkpoint.clone(),
            })?;

        checkpoint.mark(SagaStep::ExchangeActiveToStaging, ExchangeLocation::InStaging);
        Ok(())
    }

    fn create_history_partition(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        partition: &str,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), SagaError> {
        let bound = checkpoint
            .upper_bound
            .clone()
            .ok_or_else(|| SagaError::Corrupted("selection completed without a bound".into()))?;

        engine
            .add_partition(&self.history, partition, &bound)
            .map_err(|e| SagaError::Recoverable {
                step: SagaStep::CreateMatchingHistoryPartition,
                reason: e.to_string(),
                checkpoint: checkpoint.clone(),
            })?;

        let outcome = ValidationGate::check(
            &Check::PartitionExists {
                table: self.history.clone(),
                partition: partition.to_string(),
            },
            &*engine,
        );
        if let crate::validate::CheckOutcome::Fail(reason) = outcome {
            return Err(SagaError::Recoverable {
                step: SagaStep::CreateMatchingHistoryPartition,
                reason,
                checkpoint: checkpoint.clone(),
            });
        }

        checkpoint.mark(
            SagaStep::CreateMatchingHistoryPartition,
            ExchangeLocation::InStaging,
        );
        Ok(())
    }

    fn exchange_to_history(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        partition: &str,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), SagaError> {
        engine
            .exchange_partition(&self.history, partition, &self.staging)
            .map_err(|e| SagaError::Recoverable {
                step: SagaStep::ExchangeStagingToHistory,
                reason: e.to_string(),
                checkpoint: checkpoint.clone(),
            })?;

        // Staging must be back to zero rows once its segment moved on.
        if let Some(rows) = engine.row_count(&self.staging) {
            if rows != 0 {
                warn!(staging = %self.staging, rows, "staging not empty after exchange");
                return Err(SagaError::Recoverable {
                    step: SagaStep::ExchangeStagingToHistory,
                    reason: format!("staging still holds {rows} rows after exchange"),
                    checkpoint: checkpoint.clone(),
                });
            }
        }

        checkpoint.mark(SagaStep::ExchangeStagingToHistory, ExchangeLocation::InHistory);
        Ok(())
    }

    fn drop_active_shell(
        &self,
        checkpoint: &mut ExchangeCheckpoint,
        partition: &str,
        engine: &mut dyn DdlEngine,
    ) -> Result<(), SagaError> {
        engine
            .drop_partition(&self.active, partition)
            .map_err(|e| SagaError::Recoverable {
                step: SagaStep::DropEmptyActivePartition,
                reason: e.to_string(),
                checkpoint: checkpoint.clone(),
            })?;

        checkpoint.mark(SagaStep::DropEmptyActivePartition, ExchangeLocation::Dropped);
        Ok(())
    }
}
