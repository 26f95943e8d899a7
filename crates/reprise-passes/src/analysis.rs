//! Resume-point analysis.
//!
//! Finds every suspension site of a method, checks that the site can be
//! checkpointed, and records which local slots must survive it.

use reprise_ir::{ClassFile, Fingerprint, Instr, MethodDef, ProcedureId};
use smallvec::SmallVec;

use crate::descriptor::{LiveSlot, ProcedureDescriptor, ResumeIndex, ResumePoint, SiteKind};
use crate::error::{AnalysisError, ShapeReason};
use crate::frames::{self, Frame, Kind, Mode};
use crate::live_vars::Liveness;

/// Analyze `method` of `class` into a descriptor.
///
/// `fingerprint` identifies the class bytes the class was decoded from.
pub fn analyze(
    class: &ClassFile,
    method: &str,
    fingerprint: Fingerprint,
) -> Result<ProcedureDescriptor, AnalysisError> {
    if class.instrumented {
        return Err(AnalysisError::AlreadyInstrumented {
            class: class.name.clone(),
        });
    }
    let body = lookup(class, method)?;
    let procedure = ProcedureId::new(&class.name, method);

    frames::validate(&procedure, body, Mode::Original)?;
    let frames = frames::infer(&procedure, class, body)?;
    let liveness = Liveness::compute(body);

    let mut resume_points = Vec::new();
    for (offset, instr) in body.code.iter().enumerate() {
        let site = match instr {
            Instr::Pause => SiteKind::Pause,
            Instr::Call { target, answer } => SiteKind::Call {
                target: target.clone(),
                answer: *answer,
            },
            _ => continue,
        };
        let index = ResumeIndex(resume_points.len() as u32 + 1);

        let live = match &frames[offset] {
            Some(frame) => {
                check_shape(&procedure, offset, frame)?;
                live_slots(&procedure, body, &liveness, offset, frame)?
            }
            None => {
                tracing::debug!("{procedure}: site {index} at @{offset} is unreachable");
                SmallVec::new()
            }
        };
        let try_regions = body
            .try_regions
            .iter()
            .enumerate()
            .filter(|(_, region)| region.covers(offset))
            .map(|(i, _)| i)
            .collect();

        tracing::debug!(
            "{procedure}: site {index} ({instr}) at @{offset} keeps {} slot(s)",
            live.len()
        );
        resume_points.push(ResumePoint {
            index,
            site,
            call_offset: offset,
            resume_offset: offset + 1,
            live,
            stack: Vec::new(),
            try_regions,
        });
    }

    Ok(ProcedureDescriptor {
        id: procedure,
        fingerprint,
        max_locals: body.max_locals,
        cloneable: class.cloneable,
        resume_points,
    })
}

/// Re-run structural validation and frame inference over transformed code.
pub fn verify_instrumented(class: &ClassFile, method: &str) -> Result<(), AnalysisError> {
    verify_body(class, lookup(class, method)?)
}

/// Re-verify an instrumented body of `class` that has not been installed in
/// it yet.
pub(crate) fn verify_body(class: &ClassFile, body: &MethodDef) -> Result<(), AnalysisError> {
    let procedure = ProcedureId::new(&class.name, &body.name);
    frames::validate(&procedure, body, Mode::Instrumented)?;
    frames::infer(&procedure, class, body)?;
    Ok(())
}

fn lookup<'a>(class: &'a ClassFile, method: &str) -> Result<&'a MethodDef, AnalysisError> {
    class
        .method(method)
        .ok_or_else(|| AnalysisError::MissingMethod {
            class: class.name.clone(),
            method: method.to_owned(),
        })
}

fn check_shape(procedure: &ProcedureId, offset: usize, frame: &Frame) -> Result<(), AnalysisError> {
    if frame.monitors > 0 {
        return Err(AnalysisError::shape(
            procedure,
            offset,
            ShapeReason::InsideMonitor {
                depth: frame.monitors,
            },
        ));
    }
    if frame.stack.contains(&Kind::Cursor) {
        return Err(AnalysisError::shape(
            procedure,
            offset,
            ShapeReason::IteratorOnStack,
        ));
    }
    if !frame.stack.is_empty() {
        return Err(AnalysisError::shape(
            procedure,
            offset,
            ShapeReason::NonEmptyStack {
                depth: frame.stack.len(),
            },
        ));
    }
    Ok(())
}

fn live_slots(
    procedure: &ProcedureId,
    body: &MethodDef,
    liveness: &Liveness,
    offset: usize,
    frame: &Frame,
) -> Result<SmallVec<[LiveSlot; 4]>, AnalysisError> {
    liveness
        .live_out(body, offset)
        .iter()
        .map(|slot| {
            let kind = frame.locals[slot as usize].ok_or_else(|| {
                AnalysisError::malformed(
                    procedure,
                    offset,
                    format!("slot {slot} is live across the site but not definitely set"),
                )
            })?;
            Ok(LiveSlot {
                slot,
                ty: kind.slot_type(),
            })
        })
        .collect()
}
