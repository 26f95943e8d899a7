//! The abstract instruction set.
//!
//! A method body is a flat sequence of stack-machine instructions. Jump
//! targets are absolute offsets into that sequence. Two instructions are
//! suspension sites (`pause` and `call`); the instrumentation-only group at
//! the end of [`Instr`] is emitted by the transformer and rejected by the
//! analyzer in uninstrumented input.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Constant, SlotType};

/// Arithmetic operators over numeric slot types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
        };
        f.write_str(name)
    }
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Cond::Eq => ordering == Ordering::Equal,
            Cond::Ne => ordering != Ordering::Equal,
            Cond::Lt => ordering == Ordering::Less,
            Cond::Le => ordering != Ordering::Greater,
            Cond::Gt => ordering == Ordering::Greater,
            Cond::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instr", rename_all = "snake_case")]
pub enum Instr {
    /// Push a constant.
    Const { value: Constant },
    /// Push the value of a local slot.
    Load { slot: u16, ty: SlotType },
    /// Pop into a local slot.
    Store { slot: u16, ty: SlotType },
    /// Add a constant to an `int` slot in place.
    Inc { slot: u16, by: i32 },
    /// Pop two operands of `ty`, push the result.
    Arith { op: ArithOp, ty: SlotType },
    /// Pop two values of any type, push their string concatenation.
    Concat,
    Goto { target: usize },
    /// Pop an `int` and compare it against zero.
    If { cond: Cond, target: usize },
    /// Pop two operands of `ty` and compare them.
    IfCmp { cond: Cond, ty: SlotType, target: usize },
    /// Pop a reference and jump if it is null.
    IfNull { target: usize },
    Dup,
    Pop,
    Swap,
    /// Pop `len` values and push them as a list, first pushed first.
    NewList { len: u16 },
    /// Pop a list, push a cursor over it.
    IterNew,
    /// Advance the cursor held in `slot`. Jumps to `exit` when exhausted,
    /// otherwise pushes the next item, which must be of type `ty`.
    IterNext { slot: u16, ty: SlotType, exit: usize },
    GetField { field: String, ty: SlotType },
    PutField { field: String, ty: SlotType },
    /// Push a request parameter as a string, or null when absent.
    Param { name: String },
    /// Push the identifier of the current continuation chain.
    ContinuationId,
    /// Pop a value and append it to the run's output.
    Print,
    /// Pop a reference and enter a critical section on it.
    MonitorEnter,
    /// Pop a reference and leave the innermost critical section.
    MonitorExit,
    /// Pop a message reference and raise it.
    Throw,
    Return,
    ReturnValue { ty: SlotType },
    /// Suspension site: hand control back to the caller.
    Pause,
    /// Suspension site: run procedure `target` as a child chain; execution
    /// continues here with the child's answer of type `answer` pushed.
    Call { target: String, answer: SlotType },
    /// Pop a value and hand it back to the calling chain.
    Answer,

    // Instrumentation-only instructions.
    /// Dispatch on the entry resume point: `0` falls through, `n` jumps to
    /// `targets[n - 1]`.
    ResumeSwitch { targets: Vec<usize> },
    /// Start packaging locals for resume point `point`.
    CaptureBegin { point: u32 },
    /// Pop a value into the pending capture under `slot`.
    CaptureSlot { slot: u16 },
    /// Register the pending capture with the continuation manager.
    Checkpoint { point: u32 },
    /// Push the captured value of `slot`, checked against `ty`.
    RestoreSlot { slot: u16, ty: SlotType },
    /// Push the value the chain was resumed with, checked against `ty`.
    ResumeValue { ty: SlotType },
}

impl Instr {
    pub fn is_suspension(&self) -> bool {
        matches!(self, Instr::Pause | Instr::Call { .. })
    }

    pub fn is_instrumentation(&self) -> bool {
        matches!(
            self,
            Instr::ResumeSwitch { .. }
                | Instr::CaptureBegin { .. }
                | Instr::CaptureSlot { .. }
                | Instr::Checkpoint { .. }
                | Instr::RestoreSlot { .. }
                | Instr::ResumeValue { .. }
        )
    }

    /// Whether control can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instr::Goto { .. }
                | Instr::Return
                | Instr::ReturnValue { .. }
                | Instr::Throw
                | Instr::Answer
        )
    }

    /// Whether this instruction may raise a catchable fault.
    pub fn can_throw(&self) -> bool {
        match self {
            Instr::Throw => true,
            Instr::Arith {
                op: ArithOp::Div | ArithOp::Rem,
                ty: SlotType::Int | SlotType::Long,
            } => true,
            _ => false,
        }
    }

    /// Explicit branch targets, excluding fall-through.
    pub fn jump_targets(&self) -> Vec<usize> {
        match self {
            Instr::Goto { target }
            | Instr::If { target, .. }
            | Instr::IfCmp { target, .. }
            | Instr::IfNull { target } => vec![*target],
            Instr::IterNext { exit, .. } => vec![*exit],
            Instr::ResumeSwitch { targets } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every branch target through `f`.
    pub fn remap_targets(&mut self, mut f: impl FnMut(usize) -> usize) {
        match self {
            Instr::Goto { target }
            | Instr::If { target, .. }
            | Instr::IfCmp { target, .. }
            | Instr::IfNull { target } => *target = f(*target),
            Instr::IterNext { exit, .. } => *exit = f(*exit),
            Instr::ResumeSwitch { targets } => {
                for target in targets.iter_mut() {
                    *target = f(*target);
                }
            }
            _ => {}
        }
    }

    /// Local slot read by this instruction, if any.
    pub fn slot_read(&self) -> Option<u16> {
        match self {
            Instr::Load { slot, .. } | Instr::Inc { slot, .. } | Instr::IterNext { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        }
    }

    /// Local slot written by this instruction, if any.
    pub fn slot_written(&self) -> Option<u16> {
        match self {
            Instr::Store { slot, .. } | Instr::Inc { slot, .. } | Instr::IterNext { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Const { value } => write!(f, "const {value}"),
            Instr::Load { slot, ty } => write!(f, "load {slot}:{ty}"),
            Instr::Store { slot, ty } => write!(f, "store {slot}:{ty}"),
            Instr::Inc { slot, by } => write!(f, "inc {slot} {by:+}"),
            Instr::Arith { op, ty } => write!(f, "{op} {ty}"),
            Instr::Concat => f.write_str("concat"),
            Instr::Goto { target } => write!(f, "goto @{target}"),
            Instr::If { cond, target } => write!(f, "if_{cond} @{target}"),
            Instr::IfCmp { cond, ty, target } => write!(f, "if_cmp_{cond} {ty} @{target}"),
            Instr::IfNull { target } => write!(f, "if_null @{target}"),
            Instr::Dup => f.write_str("dup"),
            Instr::Pop => f.write_str("pop"),
            Instr::Swap => f.write_str("swap"),
            Instr::NewList { len } => write!(f, "new_list {len}"),
            Instr::IterNew => f.write_str("iter_new"),
            Instr::IterNext { slot, ty, exit } => write!(f, "iter_next {slot}:{ty} exit @{exit}"),
            Instr::GetField { field, ty } => write!(f, "get_field {field}:{ty}"),
            Instr::PutField { field, ty } => write!(f, "put_field {field}:{ty}"),
            Instr::Param { name } => write!(f, "param {name:?}"),
            Instr::ContinuationId => f.write_str("continuation_id"),
            Instr::Print => f.write_str("print"),
            Instr::MonitorEnter => f.write_str("monitor_enter"),
            Instr::MonitorExit => f.write_str("monitor_exit"),
            Instr::Throw => f.write_str("throw"),
            Instr::Return => f.write_str("return"),
            Instr::ReturnValue { ty } => write!(f, "return_value {ty}"),
            Instr::Pause => f.write_str("pause"),
            Instr::Call { target, answer } => write!(f, "call {target}:{answer}"),
            Instr::Answer => f.write_str("answer"),
            Instr::ResumeSwitch { targets } => {
                f.write_str("resume_switch [")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "@{target}")?;
                }
                f.write_str("]")
            }
            Instr::CaptureBegin { point } => write!(f, "capture_begin #{point}"),
            Instr::CaptureSlot { slot } => write!(f, "capture_slot {slot}"),
            Instr::Checkpoint { point } => write!(f, "checkpoint #{point}"),
            Instr::RestoreSlot { slot, ty } => write!(f, "restore_slot {slot}:{ty}"),
            Instr::ResumeValue { ty } => write!(f, "resume_value {ty}"),
        }
    }
}
