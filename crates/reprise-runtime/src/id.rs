//! Continuation identifiers.

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, Error};

/// Opaque, unguessable identifier of a suspended chain.
///
/// Rendered as 32 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContinuationId(u128);

impl ContinuationId {
    /// Draw a fresh identifier from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationId({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("invalid continuation id {input:?}: expected 32 hex digits")]
pub struct ParseIdError {
    pub input: String,
}

impl FromStr for ContinuationId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParseIdError {
            input: s.to_owned(),
        };
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(error());
        }
        u128::from_str_radix(s, 16).map(Self).map_err(|_| error())
    }
}
