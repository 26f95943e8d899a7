//! The analyzed shape of a resumable procedure.

use std::fmt;

use reprise_ir::{Fingerprint, ProcedureId, SlotType};
use smallvec::SmallVec;

/// Dense resume-point index. [`ResumeIndex::ENTRY`] means "no prior
/// suspension"; sites are numbered from 1 in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResumeIndex(pub u32);

impl ResumeIndex {
    pub const ENTRY: ResumeIndex = ResumeIndex(0);

    pub fn is_entry(self) -> bool {
        self == Self::ENTRY
    }
}

impl fmt::Display for ResumeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the suspension site does when it hands control back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteKind {
    Pause,
    /// Runs `target` as a child chain and resumes with its answer.
    Call { target: String, answer: SlotType },
}

/// A local slot restored at a resume point, with the type its load/store
/// operations must use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveSlot {
    pub slot: u16,
    pub ty: SlotType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub index: ResumeIndex,
    pub site: SiteKind,
    /// Offset of the suspension instruction in the original code.
    pub call_offset: usize,
    /// Offset of the instruction the resume label falls through to.
    pub resume_offset: usize,
    /// Slots to capture and restore, in ascending slot order.
    pub live: SmallVec<[LiveSlot; 4]>,
    /// Operand-stack shape at the site. Always empty for accepted procedures.
    pub stack: Vec<SlotType>,
    /// Indices of the try regions protecting the site.
    pub try_regions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureDescriptor {
    pub id: ProcedureId,
    pub fingerprint: Fingerprint,
    pub max_locals: u16,
    pub cloneable: bool,
    pub resume_points: Vec<ResumePoint>,
}

impl ProcedureDescriptor {
    pub fn site_count(&self) -> usize {
        self.resume_points.len()
    }

    /// Look up a resume point. The entry index has none.
    pub fn resume_point(&self, index: ResumeIndex) -> Option<&ResumePoint> {
        let position = (index.0 as usize).checked_sub(1)?;
        self.resume_points.get(position)
    }
}

impl fmt::Display for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cloneable={} sites={}",
            self.id,
            self.cloneable,
            self.resume_points.len()
        )?;
        for point in &self.resume_points {
            let site = match &point.site {
                SiteKind::Pause => "pause".to_owned(),
                SiteKind::Call { target, answer } => format!("call {target}:{answer}"),
            };
            write!(
                f,
                "\n  {} {site} @{} -> @{} live=[",
                point.index, point.call_offset, point.resume_offset
            )?;
            for (i, live) in point.live.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}:{}", live.slot, live.ty)?;
            }
            f.write_str("]")?;
            if !point.try_regions.is_empty() {
                write!(f, " try={:?}", point.try_regions)?;
            }
        }
        Ok(())
    }
}
