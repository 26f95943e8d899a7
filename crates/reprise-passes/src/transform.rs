//! Rewrites a method into a resumable state machine.
//!
//! The transformed body starts with a `resume_switch` over the resume labels.
//! Every suspension site is preceded by a capture sequence that saves the
//! live slots and registers a checkpoint, and is followed by a `return` and
//! the resume label for that site. The resume label restores the saved slots
//! and falls through into the original successor.

use reprise_ir::{ClassFile, Fingerprint, Instr, MethodDef, TryRegion};

use crate::analysis::{analyze, verify_instrumented};
use crate::descriptor::{ProcedureDescriptor, ResumeIndex, SiteKind};
use crate::error::AnalysisError;

/// Maps resume indices to the offsets of their resume labels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchTable {
    labels: Vec<usize>,
}

impl DispatchTable {
    /// Offset to enter at for `index`. The entry index starts at offset 0.
    pub fn label(&self, index: ResumeIndex) -> Option<usize> {
        if index.is_entry() {
            return Some(0);
        }
        self.labels.get(index.0 as usize - 1).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedMethod {
    pub method: MethodDef,
    pub dispatch: DispatchTable,
}

/// Instrument `method` of `class` according to `descriptor`.
pub fn transform(
    class: &ClassFile,
    method: &str,
    descriptor: &ProcedureDescriptor,
) -> Result<InstrumentedMethod, AnalysisError> {
    let body = class
        .method(method)
        .ok_or_else(|| AnalysisError::MissingMethod {
            class: class.name.clone(),
            method: method.to_owned(),
        })?;

    let len = body.code.len();
    let mut code = vec![Instr::ResumeSwitch {
        targets: Vec::new(),
    }];
    let mut offsets = Vec::with_capacity(len + 1);
    let mut copied = Vec::with_capacity(len);
    let mut labels = Vec::with_capacity(descriptor.site_count());
    let mut points = descriptor.resume_points.iter().peekable();

    for (offset, instr) in body.code.iter().enumerate() {
        offsets.push(code.len());
        let Some(point) = points.next_if(|p| p.call_offset == offset) else {
            copied.push(code.len());
            code.push(instr.clone());
            continue;
        };

        let n = point.index.0;
        code.push(Instr::CaptureBegin { point: n });
        for live in &point.live {
            code.push(Instr::Load {
                slot: live.slot,
                ty: live.ty,
            });
            code.push(Instr::CaptureSlot { slot: live.slot });
        }
        code.push(Instr::Checkpoint { point: n });
        code.push(instr.clone());
        code.push(Instr::Return);

        labels.push(code.len());
        for live in &point.live {
            code.push(Instr::RestoreSlot {
                slot: live.slot,
                ty: live.ty,
            });
            code.push(Instr::Store {
                slot: live.slot,
                ty: live.ty,
            });
        }
        if let SiteKind::Call { answer, .. } = &point.site {
            code.push(Instr::ResumeValue { ty: *answer });
        }
    }
    offsets.push(code.len());

    for at in copied {
        code[at].remap_targets(|target| offsets[target]);
    }
    code[0] = Instr::ResumeSwitch {
        targets: labels.clone(),
    };

    let try_regions = body
        .try_regions
        .iter()
        .map(|region| TryRegion {
            start: offsets[region.start],
            end: offsets[region.end],
            handler: offsets[region.handler],
        })
        .collect();

    tracing::debug!(
        "{}: instrumented {} site(s), {} -> {} instructions",
        descriptor.id,
        labels.len(),
        len,
        code.len()
    );

    Ok(InstrumentedMethod {
        method: MethodDef {
            name: body.name.clone(),
            max_locals: body.max_locals,
            code,
            try_regions,
        },
        dispatch: DispatchTable { labels },
    })
}

/// Analyze and instrument `method` of the class encoded in `bytes`, returning
/// the transformed class bytes.
pub fn instrument_class(bytes: &[u8], method: &str) -> Result<Vec<u8>, AnalysisError> {
    let mut class = ClassFile::decode(bytes)?;
    let descriptor = analyze(&class, method, Fingerprint::of(bytes))?;
    let instrumented = transform(&class, method, &descriptor)?;

    if let Some(slot) = class.method_mut(method) {
        *slot = instrumented.method;
    }
    class.instrumented = true;
    verify_instrumented(&class, method)?;
    Ok(class.encode())
}
