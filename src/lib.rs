//! Command-line front end for the reprise continuations engine.
//!
//! The engine itself lives in the `reprise-ir`, `reprise-passes` and
//! `reprise-runtime` crates; this crate adds TOML configuration, class file
//! handling and an interactive session.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use session::{Command, CommandError, Session};
