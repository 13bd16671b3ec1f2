//! Atomic swap protocol.
//!
//! The cutover is two independent rename statements, so atomicity is
//! synthesized, not native: a bounded state machine gates entry,
//! performs the renames in a fixed order, and compensates exactly once
//! if the second rename fails. Outside the narrow `Renaming` window
//! and the terminal `Inconsistent` state, exactly one table is bound
//! to the original name.

use crate::engine::DdlEngine;
use crate::ident::{IdentError, QualifiedName};
use crate::snapshot::{PartitionType, SubpartitionType};
use crate::validate::{Check, ValidationGate};
use thiserror::Error;
use tracing::{error, info, warn};

/// Swap protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    /// A derived working name failed identifier validation.
    #[error("invalid derived name: {0}")]
    Ident(#[from] IdentError),

    /// The transaction was not in the state the operation requires.
    #[error("swap is in state {actual}, expected {expected}")]
    InvalidState {
        /// Required state.
        expected: SwapState,
        /// Actual state.
        actual: SwapState,
    },

    /// A pre- or post-swap gate check failed; no rename was left
    /// half-applied.
    #[error("swap gate failed ({check}): {reason}")]
    GateFailed {
        /// The failing check.
        check: String,
        /// Why it failed.
        reason: String,
    },

    /// A rename failed but compensation restored the original binding.
    #[error("rename {from} -> {to} failed ({reason}); original binding restored")]
    RenameFailed {
        /// Rename source.
        from: String,
        /// Rename target.
        to: String,
        /// Engine-reported reason.
        reason: String,
    },

    /// Compensation itself failed. Always fatal, always surfaced
    /// verbatim, never retried automatically.
    #[error(
        "swap inconsistent: {reason}; manual intervention required: \
         rename {old_name} back to {original}"
    )]
    Inconsistent {
        /// The original table name.
        original: String,
        /// Where the original table is currently parked.
        old_name: String,
        /// What went wrong.
        reason: String,
    },

    /// Post-swap verification failed after the renames.
    #[error(
        "post-swap verification failed ({check}): {reason}; \
         recovery: run rollback restoring {original} from {old_name}"
    )]
    PostSwapFailed {
        /// The failing check.
        check: String,
        /// Why it failed.
        reason: String,
        /// The original table name.
        original: String,
        /// Where the prior structure is parked.
        old_name: String,
    },
}

/// States of the swap state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Nothing renamed; original table serves all traffic.
    OriginalActive,
    /// Renames in flight; the only window without the name invariant.
    Renaming,
    /// Both renames applied, post-swap gate pending.
    Swapped,
    /// Cutover verified and final.
    Committed,
    /// Renames undone; original table serves all traffic again.
    RolledBack,
    /// Compensation failed; requires manual intervention.
    Inconsistent,
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapState::OriginalActive => write!(f, "original_active"),
            SwapState::Renaming => write!(f, "renaming"),
            SwapState::Swapped => write!(f, "swapped"),
            SwapState::Committed => write!(f, "committed"),
            SwapState::RolledBack => write!(f, "rolled_back"),
            SwapState::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// One cutover attempt: the three name bindings plus current state.
#[derive(Debug, Clone)]
pub struct SwapTransaction {
    original: QualifiedName,
    new_name: QualifiedName,
    old_name: QualifiedName,
    state: SwapState,
    /// Expected post-swap layout of the table under the original name.
    expected_partitioning: (PartitionType, SubpartitionType),
}

impl SwapTransaction {
    /// Prepare a swap for the given table, deriving the `_NEW` and
    /// `_OLD` bindings.
    pub fn new(
        original: QualifiedName,
        expected_partitioning: (PartitionType, SubpartitionType),
    ) -> Result<Self, SwapError> {
        let new_name = original.new_name()?;
        let old_name = original.old_name()?;
        Ok(Self {
            original,
            new_name,
            old_name,
            state: SwapState::OriginalActive,
            expected_partitioning,
        })
    }

    /// Current protocol state.
    pub fn state(&self) -> SwapState {
        self.state
    }

    /// The original table name.
    pub fn original(&self) -> &QualifiedName {
        &self.original
    }

    /// The replacement table's working name.
    pub fn new_name(&self) -> &QualifiedName {
        &self.new_name
    }

    /// The retired table's parking name.
    pub fn old_name(&self) -> &QualifiedName {
        &self.old_name
    }

    /// The checks gating entry into the rename window.
    pub fn pre_swap_checks(&self) -> Vec<Check> {
        vec![
            Check::NoActiveSessions(self.original.clone()),
            Check::RowCountMatch {
                source: self.original.clone(),
                target: self.new_name.clone(),
            },
            Check::IndexParity {
                source: self.original.clone(),
                target: self.new_name.clone(),
            },
            Check::ConstraintStateParity {
                source: self.original.clone(),
                target: self.new_name.clone(),
            },
            Check::GrantsCaptured(self.original.clone()),
        ]
    }

    /// The checks confirming the cutover before commit.
    pub fn post_swap_checks(&self) -> Vec<Check> {
        vec![
            Check::TableExists(self.original.clone()),
            Check::PartitioningMatches {
                table: self.original.clone(),
                partition_type: self.expected_partitioning.0,
                subpartition_type: self.expected_partitioning.1,
            },
            Check::TableExists(self.old_name.clone()),
            Check::TableAbsent(self.new_name.clone()),
        ]
    }

    /// Run the full swap: gate, rename, compensate on failure, verify,
    /// commit.
    pub fn execute(&mut self, engine: &mut dyn DdlEngine) -> Result<(), SwapError> {
        if self.state != SwapState::OriginalActive {
            return Err(SwapError::InvalidState {
                expected: SwapState::OriginalActive,
                actual: self.state,
            });
        }

        // Gate before any rename; failing here leaves no partial state.
        let report = ValidationGate::run_all(&self.pre_swap_checks(), &*engine);
        for (desc, outcome) in report.warnings() {
            warn!(check = %desc, outcome = %outcome, "pre-swap warning");
        }
        if let Some((check, outcome)) = report.first_failure() {
            return Err(SwapError::GateFailed {
                check: check.clone(),
                reason: outcome.to_string(),
            });
        }

        self.state = SwapState::Renaming;
        info!(table = %self.original, "entering rename window");

        // Fixed order: the original name must be free before the
        // second rename can succeed.
        if let Err(e) = engine.rename_table(&self.original, &self.old_name) {
            // Nothing moved; the original binding is intact.
            self.state = SwapState::RolledBack;
            return Err(SwapError::RenameFailed {
                from: self.original.to_string(),
                to: self.old_name.to_string(),
                reason: e.to_string(),
            });
        }

        if let Err(e) = engine.rename_table(&self.new_name, &self.original) {
            // One compensating rename, attempted exactly once.
            warn!(
                table = %self.original,
                error = %e,
                "second rename failed, compensating"
            );
            match engine.rename_table(&self.old_name, &self.original) {
                Ok(()) => {
                    self.state = SwapState::RolledBack;
                    return Err(SwapError::RenameFailed {
                        from: self.new_name.to_string(),
                        to: self.original.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(comp) => {
                    self.state = SwapState::Inconsistent;
                    error!(
                        table = %self.original,
                        error = %comp,
                        "compensation failed, manual intervention required"
                    );
                    return Err(SwapError::Inconsistent {
                        original: self.original.to_string(),
                        old_name: self.old_name.to_string(),
                        reason: format!("second rename failed ({e}), compensation failed ({comp})"),
                    });
                }
            }
        }

        self.state = SwapState::Swapped;

        // Verify before committing.
        let report = ValidationGate::run_all(&self.post_swap_checks(), &*engine);
        if let Some((check, outcome)) = report.first_failure() {
            return Err(SwapError::PostSwapFailed {
                check: check.clone(),
                reason: outcome.to_string(),
                original: self.original.to_string(),
                old_name: self.old_name.to_string(),
            });
        }

        self.state = SwapState::Committed;
        info!(table = %self.original, "swap committed");
        Ok(())
    }

    /// Undo a completed rename pair, restoring the original binding.
    /// Only legal from `Swapped` (post-swap verification failed and the
    /// operator chose to back out).
    pub fn rollback(&mut self, engine: &mut dyn DdlEngine) -> Result<(), SwapError> {
        if self.state != SwapState::Swapped {
            return Err(SwapError::InvalidState {
                expected: SwapState::Swapped,
                actual: self.state,
            });
        }

        // The original name is transiently unbound between the two
        // renames, same as the forward path.
        self.state = SwapState::Renaming;
        info!(table = %self.original, "entering rollback rename window");

        if let Err(e) = engine.rename_table(&self.original, &self.new_name) {
            self.state = SwapState::Inconsistent;
            return Err(SwapError::Inconsistent {
                original: self.original.to_string(),
                old_name: self.old_name.to_string(),
                reason: format!("rollback rename failed: {e}"),
            });
        }
        if let Err(e) = engine.rename_table(&self.old_name, &self.original) {
            self.state = SwapState::Inconsistent;
            return Err(SwapError::Inconsistent {
                original: self.original.to_string(),
                old_name: self.old_name.to_string(),
                reason: format!("rollback rename failed: {e}"),
            });
        }

        self.state = SwapState::RolledBack;
        info!(table = %self.original, "swap rolled back");
        Ok(())
    }
}
