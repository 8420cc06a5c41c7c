//! Phase automaton for transaction sets.
//!
//! The pipeline is short:
//!
//! ```text
//! BEGIN -> PREPARE -> (COMMIT | ROLLBACK) -> (COMPLETE | INCOMPLETE)
//! ```
//!
//! COMPLETE means every remote acknowledged its terminal command and the set
//! file is gone. INCOMPLETE means at least one remote did not, the file stays
//! on disk, and the recovery worker (or an operator) must finish the job. The
//! recovery loop re-enters INCOMPLETE on every pass and reaches COMPLETE once
//! the last member resolves.

use std::fmt;

use crate::error::{Result, XactError};

/// Coordinator state for one transaction set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnPhase {
    Begin,
    Prepare,
    Commit,
    Rollback,
    Complete,
    Incomplete,
}

impl TxnPhase {
    /// The label recorded in set files for this phase.
    pub fn label(self) -> &'static str {
        match self {
            TxnPhase::Begin => "begin",
            TxnPhase::Prepare => "prepare",
            TxnPhase::Commit => "commit",
            TxnPhase::Rollback => "rollback",
            TxnPhase::Complete => "complete",
            TxnPhase::Incomplete => "incomplete",
        }
    }

    /// Inverse of [`TxnPhase::label`].
    pub fn from_label(label: &str) -> Result<TxnPhase> {
        match label {
            "begin" => Ok(TxnPhase::Begin),
            "prepare" => Ok(TxnPhase::Prepare),
            "commit" => Ok(TxnPhase::Commit),
            "rollback" => Ok(TxnPhase::Rollback),
            "complete" => Ok(TxnPhase::Complete),
            "incomplete" => Ok(TxnPhase::Incomplete),
            other => Err(XactError::InvalidTxnState(format!(
                "invalid txn phase {other}"
            ))),
        }
    }

    /// Whether moving from `self` to `new` is legal.
    ///
    /// No transition targets BEGIN; it is only an initial value assigned at
    /// creation and is never checked as a destination.
    pub fn is_valid_transition(self, new: TxnPhase) -> bool {
        match self {
            TxnPhase::Begin => new == TxnPhase::Prepare,
            TxnPhase::Prepare => matches!(new, TxnPhase::Commit | TxnPhase::Rollback),
            TxnPhase::Commit | TxnPhase::Rollback => {
                matches!(new, TxnPhase::Complete | TxnPhase::Incomplete)
            }
            TxnPhase::Incomplete => new == TxnPhase::Complete,
            TxnPhase::Complete => false,
        }
    }
}

impl fmt::Display for TxnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
