use thiserror::Error;

use crate::core::traits::BackendKind;

// Unified error type for structmg

#[derive(Error, Debug)]
pub enum MgError {
    #[error("level {level}: required operator {which} is not set")]
    MissingOperator { level: usize, which: &'static str },
    #[error("level {level}: required vector {which} is not set")]
    MissingVector { level: usize, which: &'static str },
    #[error("level {level}: operator backend {kind:?} is not accepted")]
    IncompatibleBackend { level: usize, kind: BackendKind },
    #[error("{0} used before assembly")]
    NotAssembled(&'static str),
    #[error("{0} is already assembled")]
    AlreadyAssembled(&'static str),
    #[error("no box manager entry for (proc {proc}, id {id})")]
    EntryNotFound { proc: usize, id: usize },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid number of dimensions: {0}")]
    InvalidDimension(usize),
    #[error("info payload has {found} bytes, manager expects {expected}")]
    InfoSize { expected: usize, found: usize },
    #[error("level {0} does not exist in the hierarchy")]
    InvalidLevel(usize),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl MgError {
    /// True for errors that indicate a malformed hierarchy or a misuse of an
    /// assembly protocol by the caller, as opposed to transport or numerical
    /// failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            MgError::MissingOperator { .. }
                | MgError::MissingVector { .. }
                | MgError::IncompatibleBackend { .. }
                | MgError::NotAssembled(_)
                | MgError::AlreadyAssembled(_)
                | MgError::DimensionMismatch { .. }
                | MgError::InvalidDimension(_)
                | MgError::InfoSize { .. }
                | MgError::InvalidLevel(_)
                | MgError::InvalidArgument(_)
        )
    }
}
