//! Persisted execution state.
//!
//! Phase 1 runs and exchange sagas both survive process restarts: each
//! writes its progress into a dedicated sled tree after every completed
//! step, and a resumed run skips everything already recorded. Records
//! are rkyv-serialized and keyed by a byte prefix per record kind.

use crate::exchange::ExchangeCheckpoint;
use rkyv::{Archive, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

const STATE_TREE: &str = "repart_state";
const SAGA_PREFIX: &[u8] = b"saga:";
const RUN_PREFIX: &[u8] = b"run:";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Generate a unique 16-byte run/saga ID.
///
/// Leading 8 bytes are the creation timestamp so IDs sort by age;
/// trailing 8 bytes mix in a process-local counter to disambiguate
/// IDs minted within the same microsecond.
pub fn generate_run_id() -> [u8; 16] {
    let ts = current_timestamp();
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = (ts ^ seq).wrapping_mul(0x517cc1b727220a95);
    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&ts.to_be_bytes());
    id[8..].copy_from_slice(&mixed.to_be_bytes());
    id
}

fn hex_id(id: &[u8; 16]) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}

/// State persistence errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying sled failure.
    #[error("state storage error: {0}")]
    Storage(#[from] sled::Error),

    /// rkyv serialization failed.
    #[error("state serialization error: {0}")]
    Serialization(String),

    /// rkyv deserialization failed.
    #[error("state deserialization error: {0}")]
    Deserialization(String),

    /// No record under the requested key.
    #[error("no persisted state for {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },
}

/// Outcome recorded for one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StepStatus {
    /// Not yet attempted.
    Pending,
    /// Execution started but no outcome recorded.
    InProgress,
    /// Executed and postconditions held.
    Completed,
    /// Idempotency probe showed the work was already done.
    AlreadySatisfied,
    /// Skipped marker step, or skipped by configuration.
    Skipped,
    /// Execution or a gate failed.
    Failed,
}

impl StepStatus {
    /// Whether this status means the step needs no further work.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::AlreadySatisfied | StepStatus::Skipped
        )
    }
}

/// Per-step entry in a run record.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct StepRecord {
    /// Stable step id.
    pub id: u8,
    /// Latest recorded status.
    pub status: StepStatus,
    /// Outcome detail (rows moved, failure reason).
    pub detail: Option<String>,
    /// When the status was last updated.
    pub updated_at: u64,
}

/// Persisted progress of one plan execution.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID.
    pub run_id: [u8; 16],
    /// Table under migration, display form.
    pub table: String,
    /// Classified action, display form.
    pub action: String,
    /// One record per plan step, in plan order.
    pub steps: Vec<StepRecord>,
    /// When the run started (microseconds since epoch).
    pub started_at: u64,
    /// When the record was last written.
    pub updated_at: u64,
}

impl RunState {
    /// Start a fresh record with every step pending.
    pub fn new(run_id: [u8; 16], table: impl Into<String>, action: impl Into<String>, step_ids: &[u8]) -> Self {
        let now = current_timestamp();
        Self {
            run_id,
            table: table.into(),
            action: action.into(),
            steps: step_ids
                .iter()
                .map(|&id| StepRecord {
                    id,
                    status: StepStatus::Pending,
                    detail: None,
                    updated_at: now,
                })
                .collect(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Record a step outcome.
    pub fn mark(&mut self, id: u8, status: StepStatus, detail: Option<String>) {
        let now = current_timestamp();
        if let Some(record) = self.steps.iter_mut().find(|s| s.id == id) {
            record.status = status;
            record.detail = detail;
            record.updated_at = now;
        }
        self.updated_at = now;
    }

    /// Latest recorded status for a step.
    pub fn status_of(&self, id: u8) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.status)
    }

    /// First step that still needs work, in plan order.
    pub fn next_pending(&self) -> Option<u8> {
        self.steps.iter().find(|s| !s.status.is_done()).map(|s| s.id)
    }

    /// Whether every recorded step is done.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_done())
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| StateError::Deserialization(e.to_string()))
    }
}

/// Durable store for run records and saga checkpoints.
pub struct CheckpointStore {
    tree: sled::Tree,
}

impl CheckpointStore {
    /// Open the state tree inside an existing sled database.
    pub fn open(db: &sled::Db) -> Result<Self, StateError> {
        let tree = db.open_tree(STATE_TREE)?;
        Ok(Self { tree })
    }

    fn saga_key(id: &[u8; 16]) -> Vec<u8> {
        let mut key = SAGA_PREFIX.to_vec();
        key.extend_from_slice(id);
        key
    }

    fn run_key(id: &[u8; 16]) -> Vec<u8> {
        let mut key = RUN_PREFIX.to_vec();
        key.extend_from_slice(id);
        key
    }

    /// Persist a saga checkpoint, replacing any previous record for
    /// the same saga.
    pub fn save_saga(&self, checkpoint: &ExchangeCheckpoint) -> Result<(), StateError> {
        let bytes = checkpoint.to_bytes()?;
        self.tree.insert(Self::saga_key(&checkpoint.saga_id), bytes)?;
        debug!(
            saga_id = %hex_id(&checkpoint.saga_id),
            location = %checkpoint.location,
            "saved saga checkpoint"
        );
        Ok(())
    }

    /// Load a saga checkpoint by ID.
    pub fn load_saga(&self, saga_id: &[u8; 16]) -> Result<ExchangeCheckpoint, StateError> {
        match self.tree.get(Self::saga_key(saga_id))? {
            Some(bytes) => ExchangeCheckpoint::from_bytes(&bytes),
            None => Err(StateError::NotFound {
                key: format!("saga:{}", hex_id(saga_id)),
            }),
        }
    }

    /// Remove a saga checkpoint.
    pub fn delete_saga(&self, saga_id: &[u8; 16]) -> Result<(), StateError> {
        self.tree.remove(Self::saga_key(saga_id))?;
        Ok(())
    }

    /// All persisted saga checkpoints.
    pub fn list_sagas(&self) -> Result<Vec<ExchangeCheckpoint>, StateError> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(SAGA_PREFIX) {
            let (_, bytes) = entry?;
            out.push(ExchangeCheckpoint::from_bytes(&bytes)?);
        }
        Ok(out)
    }

    /// Saga checkpoints that have not reached their terminal state.
    pub fn incomplete_sagas(&self) -> Result<Vec<ExchangeCheckpoint>, StateError> {
        Ok(self
            .list_sagas()?
            .into_iter()
            .filter(|cp| !cp.is_terminal())
            .collect())
    }

    /// Persist a run record, replacing any previous record for the
    /// same run.
    pub fn save_run(&self, run: &RunState) -> Result<(), StateError> {
        let bytes = run.to_bytes()?;
        self.tree.insert(Self::run_key(&run.run_id), bytes)?;
        Ok(())
    }

    /// Load a run record by ID.
    pub fn load_run(&self, run_id: &[u8; 16]) -> Result<RunState, StateError> {
        match self.tree.get(Self::run_key(run_id))? {
            Some(bytes) => RunState::from_bytes(&bytes),
            None => Err(StateError::NotFound {
                key: format!("run:{}", hex_id(run_id)),
            }),
        }
    }

    /// Remove a run record.
    pub fn delete_run(&self, run_id: &[u8; 16]) -> Result<(), StateError> {
        self.tree.remove(Self::run_key(run_id))?;
        Ok(())
    }

    /// All persisted run records.
    pub fn list_runs(&self) -> Result<Vec<RunState>, StateError> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(RUN_PREFIX) {
            let (_, bytes) = entry?;
            out.push(RunState::from_bytes(&bytes)?);
        }
        Ok(out)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StateError> {
        self.tree.flush()?;
        Ok(())
    }
}
