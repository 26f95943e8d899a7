//! Label-based assembly of method bodies.

use derive_more::{Display, Error};

use crate::class::{MethodDef, TryRegion};
use crate::instr::{ArithOp, Cond, Instr};
use crate::value::{Constant, SlotType};

/// A forward- or backward-referenceable code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BuildError {
    #[display("label {index} is referenced but never bound")]
    UnboundLabel { index: usize },
    #[display("label {index} is bound twice")]
    Rebound { index: usize },
}

/// Incrementally assembles a [`MethodDef`].
///
/// Branches take labels; offsets are resolved in [`CodeBuilder::build`].
/// `max_locals` grows to cover every slot touched.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<Instr>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    regions: Vec<(Label, Label, Label)>,
    max_locals: u16,
    error: Option<BuildError>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next emitted instruction.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let slot = &mut self.labels[label.0];
        if slot.is_some() && self.error.is_none() {
            self.error = Some(BuildError::Rebound { index: label.0 });
        }
        *slot = Some(self.code.len());
        self
    }

    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        for slot in instr.slot_read().into_iter().chain(instr.slot_written()) {
            self.max_locals = self.max_locals.max(slot + 1);
        }
        self.code.push(instr);
        self
    }

    fn emit_branch(&mut self, instr: Instr, label: Label) -> &mut Self {
        self.fixups.push((self.code.len(), label));
        self.emit(instr)
    }

    pub fn const_int(&mut self, value: i32) -> &mut Self {
        self.emit(Instr::Const {
            value: Constant::Int(value),
        })
    }

    pub fn const_long(&mut self, value: i64) -> &mut Self {
        self.emit(Instr::Const {
            value: Constant::Long(value),
        })
    }

    pub fn const_str(&mut self, value: &str) -> &mut Self {
        self.emit(Instr::Const {
            value: Constant::Str(value.to_owned()),
        })
    }

    pub fn const_null(&mut self) -> &mut Self {
        self.emit(Instr::Const {
            value: Constant::Null,
        })
    }

    pub fn load(&mut self, slot: u16, ty: SlotType) -> &mut Self {
        self.emit(Instr::Load { slot, ty })
    }

    pub fn store(&mut self, slot: u16, ty: SlotType) -> &mut Self {
        self.emit(Instr::Store { slot, ty })
    }

    pub fn inc(&mut self, slot: u16, by: i32) -> &mut Self {
        self.emit(Instr::Inc { slot, by })
    }

    pub fn arith(&mut self, op: ArithOp, ty: SlotType) -> &mut Self {
        self.emit(Instr::Arith { op, ty })
    }

    pub fn concat(&mut self) -> &mut Self {
        self.emit(Instr::Concat)
    }

    pub fn print(&mut self) -> &mut Self {
        self.emit(Instr::Print)
    }

    /// Emit `const <text>; print`.
    pub fn print_str(&mut self, text: &str) -> &mut Self {
        self.const_str(text).print()
    }

    pub fn param(&mut self, name: &str) -> &mut Self {
        self.emit(Instr::Param {
            name: name.to_owned(),
        })
    }

    pub fn get_field(&mut self, field: &str, ty: SlotType) -> &mut Self {
        self.emit(Instr::GetField {
            field: field.to_owned(),
            ty,
        })
    }

    pub fn put_field(&mut self, field: &str, ty: SlotType) -> &mut Self {
        self.emit(Instr::PutField {
            field: field.to_owned(),
            ty,
        })
    }

    pub fn pause(&mut self) -> &mut Self {
        self.emit(Instr::Pause)
    }

    pub fn call(&mut self, target: &str, answer: SlotType) -> &mut Self {
        self.emit(Instr::Call {
            target: target.to_owned(),
            answer,
        })
    }

    pub fn answer(&mut self) -> &mut Self {
        self.emit(Instr::Answer)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instr::Return)
    }

    pub fn return_value(&mut self, ty: SlotType) -> &mut Self {
        self.emit(Instr::ReturnValue { ty })
    }

    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instr::Goto { target: usize::MAX }, label)
    }

    pub fn branch(&mut self, cond: Cond, label: Label) -> &mut Self {
        self.emit_branch(
            Instr::If {
                cond,
                target: usize::MAX,
            },
            label,
        )
    }

    pub fn branch_cmp(&mut self, cond: Cond, ty: SlotType, label: Label) -> &mut Self {
        self.emit_branch(
            Instr::IfCmp {
                cond,
                ty,
                target: usize::MAX,
            },
            label,
        )
    }

    pub fn branch_null(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instr::IfNull { target: usize::MAX }, label)
    }

    pub fn iter_next(&mut self, slot: u16, ty: SlotType, exit: Label) -> &mut Self {
        self.emit_branch(
            Instr::IterNext {
                slot,
                ty,
                exit: usize::MAX,
            },
            exit,
        )
    }

    /// Protect `[start, end)` with the handler at `handler`.
    pub fn try_region(&mut self, start: Label, end: Label, handler: Label) -> &mut Self {
        self.regions.push((start, end, handler));
        self
    }

    /// Reserve locals beyond the highest slot touched so far.
    pub fn reserve_locals(&mut self, count: u16) -> &mut Self {
        self.max_locals = self.max_locals.max(count);
        self
    }

    pub fn build(mut self, name: impl Into<String>) -> Result<MethodDef, BuildError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let resolve = |labels: &[Option<usize>], label: Label| {
            labels[label.0].ok_or(BuildError::UnboundLabel { index: label.0 })
        };

        for (at, label) in std::mem::take(&mut self.fixups) {
            let target = resolve(&self.labels, label)?;
            self.code[at].remap_targets(|_| target);
        }

        let try_regions = self
            .regions
            .iter()
            .map(|&(start, end, handler)| {
                Ok(TryRegion {
                    start: resolve(&self.labels, start)?,
                    end: resolve(&self.labels, end)?,
                    handler: resolve(&self.labels, handler)?,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        Ok(MethodDef {
            name: name.into(),
            max_locals: self.max_locals,
            code: self.code,
            try_regions,
        })
    }
}
