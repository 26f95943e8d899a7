//! Human-readable method listings.

use std::fmt;

use crate::class::MethodDef;

/// Renders a method body one instruction per line.
///
/// ```text
/// process locals=1
///   0: const 1
///   1: store 0:int
///   2: pause
///   3: return
/// ```
pub struct Listing<'a>(pub &'a MethodDef);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.0;
        write!(f, "{} locals={}", method.name, method.max_locals)?;
        for (offset, instr) in method.code.iter().enumerate() {
            write!(f, "\n{offset:>3}: {instr}")?;
        }
        for region in &method.try_regions {
            write!(
                f,
                "\ntry @{}..@{} -> @{}",
                region.start, region.end, region.handler
            )?;
        }
        Ok(())
    }
}
