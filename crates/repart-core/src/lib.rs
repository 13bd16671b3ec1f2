//! repart-core - Zero-downtime table repartitioning planner.
//!
//! Takes a snapshot of a large unpartitioned (or underpartitioned)
//! table, classifies the transition to the operator's target layout,
//! and expands it into an ordered, gated, resumable step plan: build
//! the replacement structure alongside the original, load it, verify
//! parity, then cut over with an atomic rename swap. A separate saga
//! ages partitions from active storage into history via metadata-only
//! exchanges.

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod ident;
pub mod plan;
pub mod snapshot;
pub mod state;
pub mod swap;
pub mod validate;

pub use classify::{classify, ClassifyError, MigrationAction, PlanAnnotations};
pub use config::{ConfigError, ConfigStore, TableMigrationConfig};
pub use engine::{
    DdlEngine, DiscoveryError, EngineError, MetadataProvider, ScriptEmitter, TableInspector,
};
pub use error::Error;
pub use exchange::{ExchangeCheckpoint, ExchangeLocation, ExchangeSaga, SagaError, SagaStep};
pub use executor::{ExecutionReport, ExecutorError, PlanExecutor, StepOutcome, StepReport};
pub use ident::{Ident, IdentError, QualifiedName};
pub use plan::{
    MigrationPlan, PhaseGroup, PlanValidationError, Step, StepId, StepParams, StepPhase,
};
pub use snapshot::{
    ColumnDesc, ConstraintDesc, ConstraintKind, GrantDesc, IndexDesc, IntervalUnit, PartitionDesc,
    PartitionType, SubpartitionType, TableSnapshot, TargetConfiguration, TargetError,
};
pub use state::{CheckpointStore, RunState, StateError, StepRecord, StepStatus};
pub use swap::{SwapError, SwapState, SwapTransaction};
pub use validate::{Check, CheckOutcome, GateReport, ValidationGate};
