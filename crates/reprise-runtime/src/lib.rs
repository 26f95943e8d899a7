//! Runtime for resumable procedures.
//!
//! [`Engine`] is the entry point: it loads classes into a
//! [`ProcedureRegistry`], runs them with the interpreter in [`interp`], and
//! keeps suspended chains in a [`ContinuationManager`].

pub mod clock;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod id;
pub mod interp;
pub mod manager;
pub mod registry;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_EXPIRATION, DEFAULT_SWEEP_INTERVAL, ManagerConfig};
pub use context::{Capture, ContinuationContext, ProcedureInstance};
pub use driver::{Engine, Request, Run, RunOutcome};
pub use error::{Fault, FaultKind, ManagerError, RunError};
pub use id::{ContinuationId, ParseIdError};
pub use manager::{ContinuationManager, EntrySummary, Lease};
pub use registry::ProcedureRegistry;
pub use sweeper::Sweeper;
