//! Runtime errors.

use derive_more::{Display, Error};
use reprise_ir::ProcedureId;

use crate::id::ContinuationId;

/// Failures of [`ContinuationManager`](crate::ContinuationManager) operations.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ManagerError {
    #[display("continuation {id} not found")]
    NotFound { id: ContinuationId },
    #[display("{procedure} does not support cloning")]
    NotCloneable { procedure: ProcedureId },
    #[display("continuation {id} is already being resumed")]
    ConcurrentReentry { id: ContinuationId },
    #[display("continuation registry is full ({limit} entries in use)")]
    CapacityExceeded { limit: usize },
    #[display("continuation {id} is waiting for a called procedure to answer")]
    AwaitingAnswer { id: ContinuationId },
    #[display("continuation id {id} is already registered")]
    DuplicateId { id: ContinuationId },
}

/// What went wrong inside procedure code.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum FaultKind {
    #[display("thrown: {message}")]
    Thrown { message: String },
    #[display("division by zero")]
    DivideByZero,
    #[display("type mismatch: {message}")]
    TypeMismatch { message: String },
    #[display("unknown field {field}")]
    UnknownField { field: String },
    #[display("corrupt continuation context: {message}")]
    CorruptContext { message: String },
}

impl FaultKind {
    /// Message handed to a try-region handler, or `None` when the fault
    /// cannot be caught.
    pub fn catchable_message(&self) -> Option<String> {
        match self {
            FaultKind::Thrown { message } => Some(message.clone()),
            FaultKind::DivideByZero => Some(self.to_string()),
            _ => None,
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        FaultKind::TypeMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        FaultKind::CorruptContext {
            message: message.into(),
        }
    }
}

/// An uncaught fault, located in procedure code.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("{procedure} @{offset}: {kind}")]
pub struct Fault {
    pub procedure: ProcedureId,
    pub offset: usize,
    pub kind: FaultKind,
}

/// Why a run ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum RunError {
    #[display("{_0}")]
    Fault(Fault),
    #[display("continuation {id} is already being resumed")]
    ConcurrentReentry { id: ContinuationId },
    #[display("continuation registry is full ({limit} entries in use)")]
    CapacityExceeded { limit: usize },
    #[display("unknown procedure {name}")]
    UnknownProcedure { name: String },
    #[display("continuation {id} is waiting for a called procedure to answer")]
    AwaitingAnswer { id: ContinuationId },
    #[display("continuation id {id} is already registered")]
    DuplicateId { id: ContinuationId },
}

impl From<Fault> for RunError {
    fn from(fault: Fault) -> Self {
        RunError::Fault(fault)
    }
}
