//! Interpreter for instrumented method bodies.
//!
//! Code reaching the interpreter has passed frame inference, so operand
//! shapes are trusted; dynamic checks remain only where values come from
//! outside the method (restored slots, answers, fields, list items).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use reprise_ir::{ArithOp, Cond, Cursor, Instr, Value};
use reprise_passes::{PreparedProcedure, ResumeIndex};

use crate::context::{Capture, ContinuationContext, ProcedureInstance};
use crate::driver::Request;
use crate::error::{Fault, FaultKind, ManagerError};
use crate::id::ContinuationId;
use crate::manager::ContinuationManager;

/// How an activation left the method.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Returned(Option<Value>),
    /// Checkpointed under `id`. `call` names the child procedure to run
    /// before the chain can continue.
    Suspended {
        id: ContinuationId,
        call: Option<String>,
    },
    Answered(Value),
    Faulted(Fault),
}

/// One execution of a procedure, from entry or from a resume point up to
/// the next exit.
pub struct Activation<'a> {
    procedure: &'a PreparedProcedure,
    manager: &'a ContinuationManager,
    request: &'a Request,
    id: ContinuationId,
    next_id: ContinuationId,
    entry: ResumeIndex,
    instance: ProcedureInstance,
    restored: BTreeMap<u16, Value>,
    resume_value: Option<Value>,
    pending: Option<BTreeMap<u16, Value>>,
    checkpointed: bool,
}

impl<'a> Activation<'a> {
    pub fn new(
        procedure: &'a PreparedProcedure,
        manager: &'a ContinuationManager,
        request: &'a Request,
        context: ContinuationContext,
    ) -> Self {
        Self {
            procedure,
            manager,
            request,
            id: context.id,
            next_id: manager.draw_id(),
            entry: context.resume_point,
            instance: context.instance,
            restored: context.locals,
            resume_value: None,
            pending: None,
            checkpointed: false,
        }
    }

    /// Value pushed by `resume_value` when re-entering a call site.
    pub fn with_resume_value(mut self, value: Option<Value>) -> Self {
        self.resume_value = value;
        self
    }

    /// Identifier of the chain as of the last checkpoint.
    pub fn id(&self) -> ContinuationId {
        self.id
    }

    /// Run until the method exits. Output of `print` is appended to `output`.
    ///
    /// Registry failures while checkpointing end the activation with an
    /// error; everything else is reported through [`Exit`].
    pub fn run(&mut self, output: &mut String) -> Result<Exit, ManagerError> {
        let procedure = self.procedure;
        let code = &procedure.code.method;
        let mut frame = Frame {
            locals: vec![Value::Null; code.max_locals as usize],
            stack: Vec::new(),
        };
        let mut pc = 0;

        loop {
            let Some(instr) = code.code.get(pc) else {
                return Ok(self.fault(pc, FaultKind::corrupt("execution left the method body")));
            };
            match self.step(&mut frame, instr, pc, output)? {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Exit(exit)) => return Ok(exit),
                Err(kind) => match self.handler_for(pc, &kind) {
                    Some((handler, message)) => {
                        frame.stack.clear();
                        frame.stack.push(Value::str(message));
                        pc = handler;
                    }
                    None => return Ok(self.fault(pc, kind)),
                },
            }
        }
    }

    fn fault(&self, offset: usize, kind: FaultKind) -> Exit {
        Exit::Faulted(Fault {
            procedure: self.procedure.descriptor.id.clone(),
            offset,
            kind,
        })
    }

    /// First try region covering `pc` that can catch `kind`.
    fn handler_for(&self, pc: usize, kind: &FaultKind) -> Option<(usize, String)> {
        let message = kind.catchable_message()?;
        self.procedure
            .code
            .method
            .try_regions
            .iter()
            .find(|region| region.covers(pc))
            .map(|region| (region.handler, message))
    }

    fn step(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
        pc: usize,
        output: &mut String,
    ) -> Result<Result<Flow, FaultKind>, ManagerError> {
        let flow = match instr {
            Instr::Const { value } => {
                frame.push(value.to_value());
                Flow::Next
            }
            Instr::Load { slot, .. } => {
                frame.push(frame.locals[*slot as usize].clone());
                Flow::Next
            }
            Instr::Store { slot, .. } => {
                frame.locals[*slot as usize] = frame.pop();
                Flow::Next
            }
            Instr::Inc { slot, by } => {
                let local = &mut frame.locals[*slot as usize];
                match local {
                    Value::Int(v) => *v = v.wrapping_add(*by),
                    other => {
                        return Ok(Err(FaultKind::mismatch(format!("inc on {other}"))));
                    }
                }
                Flow::Next
            }
            Instr::Arith { op, .. } => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                match arith(*op, lhs, rhs) {
                    Ok(value) => frame.push(value),
                    Err(kind) => return Ok(Err(kind)),
                }
                Flow::Next
            }
            Instr::Concat => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                frame.push(Value::str(format!("{lhs}{rhs}")));
                Flow::Next
            }
            Instr::Goto { target } => Flow::Jump(*target),
            Instr::If { cond, target } => {
                let value = frame.pop();
                let Some(v) = value.as_int() else {
                    return Ok(Err(FaultKind::mismatch(format!("branch on {value}"))));
                };
                branch(cond.holds(v.cmp(&0)), *target)
            }
            Instr::IfCmp { cond, target, .. } => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                match compare(*cond, &lhs, &rhs) {
                    Some(taken) => branch(taken, *target),
                    None => {
                        return Ok(Err(FaultKind::mismatch(format!(
                            "cannot compare {lhs} with {rhs}"
                        ))));
                    }
                }
            }
            Instr::IfNull { target } => branch(frame.pop().is_null(), *target),
            Instr::Dup => {
                let top = frame.pop();
                frame.push(top.clone());
                frame.push(top);
                Flow::Next
            }
            Instr::Pop => {
                frame.pop();
                Flow::Next
            }
            Instr::Swap => {
                let top = frame.pop();
                let below = frame.pop();
                frame.push(top);
                frame.push(below);
                Flow::Next
            }
            Instr::NewList { len } => {
                let at = frame.stack.len().saturating_sub(*len as usize);
                let items: Arc<[Value]> = frame.stack.split_off(at).into();
                frame.push(Value::List(items));
                Flow::Next
            }
            Instr::IterNew => match frame.pop() {
                Value::List(items) => {
                    frame.push(Value::Cursor(Cursor::new(items)));
                    Flow::Next
                }
                other => return Ok(Err(FaultKind::mismatch(format!("iterate over {other}")))),
            },
            Instr::IterNext { slot, ty, exit } => {
                let Value::Cursor(cursor) = &mut frame.locals[*slot as usize] else {
                    return Ok(Err(FaultKind::mismatch(format!("slot {slot} holds no cursor"))));
                };
                match cursor.advance() {
                    Some(item) if item.slot_type() == *ty => {
                        frame.push(item);
                        Flow::Next
                    }
                    Some(item) => {
                        return Ok(Err(FaultKind::mismatch(format!(
                            "list item {item} is not {ty}"
                        ))));
                    }
                    None => Flow::Jump(*exit),
                }
            }
            Instr::GetField { field, ty } => match self.instance.get(field) {
                Some(value) if value.slot_type() == *ty => {
                    frame.push(value.clone());
                    Flow::Next
                }
                Some(value) => {
                    return Ok(Err(FaultKind::mismatch(format!(
                        "field {field} holds {value}, read as {ty}"
                    ))));
                }
                None => {
                    return Ok(Err(FaultKind::UnknownField {
                        field: field.clone(),
                    }));
                }
            },
            Instr::PutField { field, .. } => {
                let value = frame.pop();
                if !self.instance.set(field, value) {
                    return Ok(Err(FaultKind::UnknownField {
                        field: field.clone(),
                    }));
                }
                Flow::Next
            }
            Instr::Param { name } => {
                frame.push(self.request.param(name).map_or(Value::Null, Value::str));
                Flow::Next
            }
            Instr::ContinuationId => {
                frame.push(Value::str(self.next_id.to_string()));
                Flow::Next
            }
            Instr::Print => {
                output.push_str(&frame.pop().to_string());
                output.push('\n');
                Flow::Next
            }
            Instr::MonitorEnter | Instr::MonitorExit => {
                frame.pop();
                Flow::Next
            }
            Instr::Throw => {
                let message = frame.pop();
                return Ok(Err(FaultKind::Thrown {
                    message: message.to_string(),
                }));
            }
            Instr::Return => Flow::Exit(Exit::Returned(None)),
            Instr::ReturnValue { .. } => Flow::Exit(Exit::Returned(Some(frame.pop()))),
            Instr::Answer => Flow::Exit(Exit::Answered(frame.pop())),
            Instr::Pause | Instr::Call { .. } => {
                if !self.checkpointed {
                    return Ok(Err(FaultKind::corrupt("suspension without a checkpoint")));
                }
                let call = match instr {
                    Instr::Call { target, .. } => Some(target.clone()),
                    _ => None,
                };
                Flow::Exit(Exit::Suspended { id: self.id, call })
            }
            Instr::ResumeSwitch { targets } => {
                if self.entry.is_entry() {
                    Flow::Next
                } else {
                    match targets.get(self.entry.0 as usize - 1) {
                        Some(target) => Flow::Jump(*target),
                        None => {
                            return Ok(Err(FaultKind::corrupt(format!(
                                "no resume point {}",
                                self.entry
                            ))));
                        }
                    }
                }
            }
            Instr::CaptureBegin { .. } => {
                self.pending = Some(BTreeMap::new());
                Flow::Next
            }
            Instr::CaptureSlot { slot } => {
                let value = frame.pop();
                let Some(pending) = self.pending.as_mut() else {
                    return Ok(Err(FaultKind::corrupt("capture outside a capture sequence")));
                };
                pending.insert(*slot, value);
                Flow::Next
            }
            Instr::Checkpoint { point } => {
                let Some(locals) = self.pending.take() else {
                    return Ok(Err(FaultKind::corrupt("checkpoint outside a capture sequence")));
                };
                let capture = Capture {
                    resume_point: ResumeIndex(*point),
                    locals,
                    instance: self.instance.deep_copy(),
                };
                self.id = self.manager.update_to(&self.id, self.next_id, capture)?;
                self.next_id = self.manager.draw_id();
                self.checkpointed = true;
                tracing::debug!(
                    "{} checkpointed at {} as {}",
                    self.procedure.descriptor.id,
                    ResumeIndex(*point),
                    self.id
                );
                Flow::Next
            }
            Instr::RestoreSlot { slot, ty } => match self.restored.remove(slot) {
                Some(value) if value.slot_type() == *ty => {
                    frame.push(value);
                    Flow::Next
                }
                Some(value) => {
                    return Ok(Err(FaultKind::corrupt(format!(
                        "slot {slot} restored as {ty} but holds {value}"
                    ))));
                }
                None => {
                    return Ok(Err(FaultKind::corrupt(format!("slot {slot} was not captured"))));
                }
            },
            Instr::ResumeValue { ty } => match self.resume_value.take() {
                Some(value) if value.slot_type() == *ty => {
                    frame.push(value);
                    Flow::Next
                }
                Some(value) => {
                    return Ok(Err(FaultKind::mismatch(format!(
                        "answer {value} is not {ty}"
                    ))));
                }
                None => {
                    return Ok(Err(FaultKind::corrupt("call site resumed without an answer")));
                }
            },
        };
        tracing::trace!("@{pc}: {instr}");
        Ok(Ok(flow))
    }
}

enum Flow {
    Next,
    Jump(usize),
    Exit(Exit),
}

fn branch(taken: bool, target: usize) -> Flow {
    if taken { Flow::Jump(target) } else { Flow::Next }
}

struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Verified code never underflows; an empty stack yields null.
    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Null)
    }
}

fn compare(cond: Cond, lhs: &Value, rhs: &Value) -> Option<bool> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        _ => return None,
    };
    // Unordered doubles only satisfy `ne`.
    Some(ordering.map_or(cond == Cond::Ne, |o: Ordering| cond.holds(o)))
}

fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Result<Value, FaultKind> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div | ArithOp::Rem if b == 0 => return Err(FaultKind::DivideByZero),
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Rem => a.wrapping_rem(b),
        })),
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div | ArithOp::Rem if b == 0 => return Err(FaultKind::DivideByZero),
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Rem => a.wrapping_rem(b),
        })),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        })),
        (lhs, rhs) => Err(FaultKind::mismatch(format!("{op} on {lhs} and {rhs}"))),
    }
}
