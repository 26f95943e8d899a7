//! Analysis and instrumentation passes for resumable procedures.
//!
//! ## Pipeline
//!
//! - [`analysis`]: validate a method, infer frames, and find its suspension
//!   sites along with the slots live across each one
//! - [`transform`]: rewrite the method into a resumable state machine
//! - [`cache`]: prepare each `(class fingerprint, method)` once per process
//!
//! [`frames`] and [`live_vars`] are the dataflow analyses the pipeline is
//! built on.

pub mod analysis;
pub mod cache;
pub mod descriptor;
pub mod error;
pub mod frames;
pub mod live_vars;
pub mod transform;

pub use analysis::{analyze, verify_instrumented};
pub use cache::{DescriptorCache, PrepareOptions, PreparedProcedure};
pub use descriptor::{LiveSlot, ProcedureDescriptor, ResumeIndex, ResumePoint, SiteKind};
pub use error::{AnalysisError, ShapeReason};
pub use transform::{DispatchTable, InstrumentedMethod, instrument_class, transform};
