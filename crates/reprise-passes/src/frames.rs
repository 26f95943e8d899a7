//! Forward frame inference.
//!
//! Computes, for every reachable offset, the kinds of the local slots, the
//! operand-stack shape and the monitor depth on entry to that instruction.
//! Every instruction is type-checked along the way, so a method that passes
//! is safe to interpret without dynamic stack checks.

use std::collections::VecDeque;

use reprise_ir::{ClassFile, Instr, MethodDef, ProcedureId, SlotType};

use crate::error::AnalysisError;
use crate::live_vars::successors;

/// Abstract value kind. `Cursor` refines `Ref` so that iterators on the
/// operand stack can be diagnosed at suspension sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Int,
    Long,
    Double,
    Ref,
    Cursor,
}

impl Kind {
    pub fn of(ty: SlotType) -> Self {
        match ty {
            SlotType::Int => Kind::Int,
            SlotType::Long => Kind::Long,
            SlotType::Double => Kind::Double,
            SlotType::Ref => Kind::Ref,
        }
    }

    pub fn slot_type(self) -> SlotType {
        match self {
            Kind::Int => SlotType::Int,
            Kind::Long => SlotType::Long,
            Kind::Double => SlotType::Double,
            Kind::Ref | Kind::Cursor => SlotType::Ref,
        }
    }

    fn merge(self, other: Kind) -> Option<Kind> {
        if self == other {
            Some(self)
        } else if self.slot_type() == SlotType::Ref && other.slot_type() == SlotType::Ref {
            Some(Kind::Ref)
        } else {
            None
        }
    }
}

/// State on entry to an instruction. A `None` local is unset on some path or
/// holds conflicting kinds, and cannot be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub locals: Vec<Option<Kind>>,
    pub stack: Vec<Kind>,
    pub monitors: u16,
}

impl Frame {
    fn entry(max_locals: u16) -> Self {
        Self {
            locals: vec![None; max_locals as usize],
            stack: Vec::new(),
            monitors: 0,
        }
    }
}

/// Whether instrumentation-only instructions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Original,
    Instrumented,
}

/// Structural checks that do not need dataflow.
pub fn validate(
    procedure: &ProcedureId,
    method: &MethodDef,
    mode: Mode,
) -> Result<(), AnalysisError> {
    let len = method.code.len();
    if len == 0 {
        return Err(AnalysisError::malformed(procedure, 0, "empty method body"));
    }
    for (offset, instr) in method.code.iter().enumerate() {
        if mode == Mode::Original && instr.is_instrumentation() {
            return Err(AnalysisError::malformed(
                procedure,
                offset,
                format!("`{instr}` is reserved for instrumented code"),
            ));
        }
        if let Some(target) = instr.jump_targets().into_iter().find(|t| *t >= len) {
            return Err(AnalysisError::malformed(
                procedure,
                offset,
                format!("jump target @{target} is out of bounds"),
            ));
        }
        for slot in instr.slot_read().into_iter().chain(instr.slot_written()) {
            if slot >= method.max_locals {
                return Err(AnalysisError::malformed(
                    procedure,
                    offset,
                    format!("slot {slot} exceeds max_locals {}", method.max_locals),
                ));
            }
        }
        if let Instr::RestoreSlot { slot, .. } | Instr::CaptureSlot { slot } = instr
            && *slot >= method.max_locals
        {
            return Err(AnalysisError::malformed(
                procedure,
                offset,
                format!("slot {slot} exceeds max_locals {}", method.max_locals),
            ));
        }
    }
    for region in &method.try_regions {
        if region.start >= region.end || region.end > len || region.handler >= len {
            return Err(AnalysisError::malformed(
                procedure,
                region.start,
                format!(
                    "invalid try region @{}..@{} -> @{}",
                    region.start, region.end, region.handler
                ),
            ));
        }
    }
    Ok(())
}

/// Run frame inference over a validated method.
///
/// Returns the entry frame of every offset; unreachable offsets get `None`.
pub fn infer(
    procedure: &ProcedureId,
    class: &ClassFile,
    method: &MethodDef,
) -> Result<Vec<Option<Frame>>, AnalysisError> {
    let len = method.code.len();
    let mut frames: Vec<Option<Frame>> = vec![None; len];
    let mut worklist = VecDeque::new();
    frames[0] = Some(Frame::entry(method.max_locals));
    worklist.push_back(0usize);

    while let Some(offset) = worklist.pop_front() {
        let Some(frame) = frames[offset].clone() else {
            continue;
        };
        let instr = &method.code[offset];
        let mut checker = Checker {
            procedure,
            offset,
            frame: frame.clone(),
        };
        checker.step(class, instr)?;
        let out = checker.frame;

        let mut edges: Vec<(usize, Frame)> = Vec::new();
        if instr.falls_through() && offset + 1 >= len {
            return Err(AnalysisError::malformed(
                procedure,
                offset,
                "control falls off the end of the method",
            ));
        }
        for succ in successors(instr, offset) {
            // The exhausted edge of `iter_next` pushes nothing.
            let edge_frame = match instr {
                Instr::IterNext { exit, .. } if succ == *exit => frame.clone(),
                _ => out.clone(),
            };
            edges.push((succ, edge_frame));
        }
        if instr.can_throw() {
            for region in method.try_regions.iter().filter(|r| r.covers(offset)) {
                edges.push((
                    region.handler,
                    Frame {
                        locals: frame.locals.clone(),
                        stack: vec![Kind::Ref],
                        monitors: frame.monitors,
                    },
                ));
            }
        }

        for (succ, incoming) in edges {
            let changed = match frames[succ].as_mut() {
                Some(existing) => merge_into(procedure, succ, existing, &incoming)?,
                None => {
                    frames[succ] = Some(incoming);
                    true
                }
            };
            if changed && !worklist.contains(&succ) {
                worklist.push_back(succ);
            }
        }
    }

    Ok(frames)
}

fn merge_into(
    procedure: &ProcedureId,
    offset: usize,
    existing: &mut Frame,
    incoming: &Frame,
) -> Result<bool, AnalysisError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(AnalysisError::malformed(
            procedure,
            offset,
            format!(
                "stack depth mismatch at join ({} vs {})",
                existing.stack.len(),
                incoming.stack.len()
            ),
        ));
    }
    if existing.monitors != incoming.monitors {
        return Err(AnalysisError::malformed(
            procedure,
            offset,
            "monitor depth mismatch at join",
        ));
    }

    let mut changed = false;
    for (mine, theirs) in existing.stack.iter_mut().zip(&incoming.stack) {
        let merged = mine.merge(*theirs).ok_or_else(|| {
            AnalysisError::malformed(procedure, offset, "operand kind mismatch at join")
        })?;
        changed |= merged != *mine;
        *mine = merged;
    }
    for (mine, theirs) in existing.locals.iter_mut().zip(&incoming.locals) {
        let merged = match (*mine, *theirs) {
            (Some(a), Some(b)) => a.merge(b),
            _ => None,
        };
        changed |= merged != *mine;
        *mine = merged;
    }
    Ok(changed)
}

/// Transfer function for a single instruction.
struct Checker<'a> {
    procedure: &'a ProcedureId,
    offset: usize,
    frame: Frame,
}

impl Checker<'_> {
    fn error(&self, message: impl Into<String>) -> AnalysisError {
        AnalysisError::malformed(self.procedure, self.offset, message)
    }

    fn pop(&mut self) -> Result<Kind, AnalysisError> {
        self.frame
            .stack
            .pop()
            .ok_or_else(|| self.error("operand stack underflow"))
    }

    fn pop_typed(&mut self, ty: SlotType) -> Result<Kind, AnalysisError> {
        let kind = self.pop()?;
        if kind.slot_type() != ty {
            return Err(self.error(format!(
                "expected {ty} operand, found {}",
                kind.slot_type()
            )));
        }
        Ok(kind)
    }

    fn push(&mut self, kind: Kind) {
        self.frame.stack.push(kind);
    }

    fn local(&self, slot: u16) -> Result<Kind, AnalysisError> {
        self.frame
            .locals
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or_else(|| self.error(format!("slot {slot} is read before it is definitely set")))
    }

    fn numeric(&self, ty: SlotType) -> Result<(), AnalysisError> {
        if ty.is_numeric() {
            Ok(())
        } else {
            Err(self.error("arithmetic on a reference type"))
        }
    }

    fn field(&self, class: &ClassFile, name: &str, ty: SlotType) -> Result<(), AnalysisError> {
        match class.field(name) {
            Some(field) if field.ty == ty => Ok(()),
            Some(field) => Err(self.error(format!(
                "field {name} is declared {}, accessed as {ty}",
                field.ty
            ))),
            None => Err(self.error(format!("unknown field {name}"))),
        }
    }

    fn step(&mut self, class: &ClassFile, instr: &Instr) -> Result<(), AnalysisError> {
        match instr {
            Instr::Const { value } => self.push(Kind::of(value.slot_type())),
            Instr::Load { slot, ty } => {
                let kind = self.local(*slot)?;
                if kind.slot_type() != *ty {
                    return Err(self.error(format!(
                        "slot {slot} holds {}, loaded as {ty}",
                        kind.slot_type()
                    )));
                }
                self.push(kind);
            }
            Instr::Store { slot, ty } => {
                let kind = self.pop_typed(*ty)?;
                self.frame.locals[*slot as usize] = Some(kind);
            }
            Instr::Inc { slot, .. } => {
                if self.local(*slot)? != Kind::Int {
                    return Err(self.error(format!("inc on non-int slot {slot}")));
                }
            }
            Instr::Arith { ty, .. } => {
                self.numeric(*ty)?;
                self.pop_typed(*ty)?;
                self.pop_typed(*ty)?;
                self.push(Kind::of(*ty));
            }
            Instr::Concat => {
                self.pop()?;
                self.pop()?;
                self.push(Kind::Ref);
            }
            Instr::Goto { .. } => {}
            Instr::If { .. } => {
                self.pop_typed(SlotType::Int)?;
            }
            Instr::IfCmp { ty, .. } => {
                self.numeric(*ty)?;
                self.pop_typed(*ty)?;
                self.pop_typed(*ty)?;
            }
            Instr::IfNull { .. } => {
                self.pop_typed(SlotType::Ref)?;
            }
            Instr::Dup => {
                let kind = self.pop()?;
                self.push(kind);
                self.push(kind);
            }
            Instr::Pop => {
                self.pop()?;
            }
            Instr::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top);
                self.push(below);
            }
            Instr::NewList { len } => {
                for _ in 0..*len {
                    self.pop()?;
                }
                self.push(Kind::Ref);
            }
            Instr::IterNew => {
                self.pop_typed(SlotType::Ref)?;
                self.push(Kind::Cursor);
            }
            Instr::IterNext { slot, ty, .. } => {
                if self.local(*slot)?.slot_type() != SlotType::Ref {
                    return Err(self.error(format!("iter_next on non-reference slot {slot}")));
                }
                self.push(Kind::of(*ty));
            }
            Instr::GetField { field, ty } => {
                self.field(class, field, *ty)?;
                self.push(Kind::of(*ty));
            }
            Instr::PutField { field, ty } => {
                self.field(class, field, *ty)?;
                self.pop_typed(*ty)?;
            }
            Instr::Param { .. } | Instr::ContinuationId => self.push(Kind::Ref),
            Instr::Print | Instr::Answer | Instr::CaptureSlot { .. } => {
                self.pop()?;
            }
            Instr::MonitorEnter => {
                self.pop_typed(SlotType::Ref)?;
                self.frame.monitors += 1;
            }
            Instr::MonitorExit => {
                self.pop_typed(SlotType::Ref)?;
                if self.frame.monitors == 0 {
                    return Err(self.error("monitor_exit without a matching monitor_enter"));
                }
                self.frame.monitors -= 1;
            }
            Instr::Throw => {
                self.pop_typed(SlotType::Ref)?;
            }
            Instr::Return | Instr::Pause => {}
            Instr::ReturnValue { ty } => {
                self.pop_typed(*ty)?;
            }
            Instr::Call { answer, .. } => self.push(Kind::of(*answer)),
            Instr::ResumeSwitch { .. } | Instr::CaptureBegin { .. } | Instr::Checkpoint { .. } => {}
            Instr::RestoreSlot { ty, .. } | Instr::ResumeValue { ty } => self.push(Kind::of(*ty)),
        }
        Ok(())
    }
}
