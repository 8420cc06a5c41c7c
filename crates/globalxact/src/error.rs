use thiserror::Error;

/// Errors surfaced by the coordinator.
///
/// The host dispatches on the class: a precondition violation aborts the host
/// transaction (which re-enters the abort path), unsupported lifecycle events
/// reject nested two-phase commit, and a corrupt log needs an operator.
#[derive(Debug, Error)]
pub enum XactError {
    /// Illegal phase transition, missing or unwritable set file, or a name or
    /// path that exceeds its bound.
    #[error("invalid transaction state: {0}")]
    InvalidTxnState(String),

    /// Host lifecycle events this coordinator does not offer.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// A set file that cannot be parsed back.
    #[error("corrupt txnset log: {0}")]
    CorruptLog(String),

    /// Failure of the randomness source.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, XactError>;
