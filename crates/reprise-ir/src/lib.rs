//! Abstract instruction representation for resumable procedures.
//!
//! Procedures are stack-machine method bodies with explicit local slots and
//! semantic slot types. The analyzer and transformer in `reprise-passes`
//! operate on this representation, and the interpreter in `reprise-runtime`
//! executes it.

pub mod builder;
pub mod class;
pub mod instr;
pub mod listing;
pub mod value;

pub use builder::{BuildError, CodeBuilder, Label};
pub use class::{
    ClassFile, DEFAULT_METHOD, DecodeError, FieldDef, Fingerprint, MethodDef, ProcedureId,
    TryRegion,
};
pub use instr::{ArithOp, Cond, Instr};
pub use listing::Listing;
pub use value::{Constant, Cursor, SlotType, Value};
