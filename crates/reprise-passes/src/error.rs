//! Errors raised while preparing a procedure for resumable execution.

use derive_more::{Display, Error};
use reprise_ir::{DecodeError, ProcedureId};

/// Why a suspension site cannot be checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ShapeReason {
    #[display("suspension inside {depth} critical section(s)")]
    InsideMonitor { depth: u16 },
    #[display("operand stack holds {depth} value(s)")]
    NonEmptyStack { depth: usize },
    #[display("an iterator on the operand stack would lose its position")]
    IteratorOnStack,
}

/// Preparation failures. These are fatal for the class version that caused
/// them and are cached alongside successful results.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum AnalysisError {
    #[display("{procedure}: cannot checkpoint at @{offset}: {reason}")]
    UnsupportedContinuationShape {
        procedure: ProcedureId,
        offset: usize,
        reason: ShapeReason,
    },
    #[display("{procedure}: malformed code at @{offset}: {message}")]
    Malformed {
        procedure: ProcedureId,
        offset: usize,
        message: String,
    },
    #[display("class {class} has no method {method}")]
    MissingMethod { class: String, method: String },
    #[display("class {class} is already instrumented")]
    AlreadyInstrumented { class: String },
    #[display("class {class} is required to support cloning")]
    CloneRequired { class: String },
    #[display("{_0}")]
    Decode(DecodeError),
}

impl From<DecodeError> for AnalysisError {
    fn from(error: DecodeError) -> Self {
        AnalysisError::Decode(error)
    }
}

impl AnalysisError {
    pub(crate) fn malformed(procedure: &ProcedureId, offset: usize, message: impl Into<String>) -> Self {
        AnalysisError::Malformed {
            procedure: procedure.clone(),
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn shape(procedure: &ProcedureId, offset: usize, reason: ShapeReason) -> Self {
        AnalysisError::UnsupportedContinuationShape {
            procedure: procedure.clone(),
            offset,
            reason,
        }
    }
}
