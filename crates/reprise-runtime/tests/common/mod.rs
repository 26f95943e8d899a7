//! Procedure classes shared by the runtime integration tests.

#![allow(dead_code)]

use reprise_ir::{
    ArithOp, ClassFile, CodeBuilder, DEFAULT_METHOD, FieldDef, Instr, SlotType,
};
use std::sync::Arc;

use reprise_runtime::{
    ContinuationId, ContinuationManager, Engine, ManagerConfig, ManualClock, ProcedureRegistry,
    Request, RunOutcome,
};

fn class(name: &str, b: CodeBuilder) -> ClassFile {
    ClassFile::new(name).with_method(b.build(DEFAULT_METHOD).unwrap())
}

/// Emit `print "<label><slot>"`.
fn print_labelled(b: &mut CodeBuilder, label: &str, slot: u16) {
    b.const_str(label).load(slot, SlotType::Int).concat().print();
}

/// Increments a counter before each of two pauses, printing it each time.
pub fn counter() -> ClassFile {
    let mut b = CodeBuilder::new();
    b.const_int(0).store(0, SlotType::Int);
    b.inc(0, 1);
    print_labelled(&mut b, "A:", 0);
    b.pause();
    b.inc(0, 1);
    print_labelled(&mut b, "B:", 0);
    b.pause();
    print_labelled(&mut b, "done:", 0);
    b.ret();
    class("Counter", b)
}

/// Divides by zero after a pause inside a try region.
pub fn divider() -> ClassFile {
    let mut b = CodeBuilder::new();
    let (start, end, handler) = (b.label(), b.label(), b.label());
    b.const_str("ctx").store(1, SlotType::Ref);
    b.bind(start);
    b.pause();
    b.const_int(10).const_int(0).arith(ArithOp::Div, SlotType::Int).print();
    b.bind(end);
    b.ret();
    b.bind(handler);
    b.store(2, SlotType::Ref);
    b.const_str("caught: ").load(2, SlotType::Ref).concat().print();
    b.load(1, SlotType::Ref).print();
    b.ret();
    b.try_region(start, end, handler);
    class("Divider", b)
}

/// Prints each list item, pausing after every one.
pub fn walker() -> ClassFile {
    let mut b = CodeBuilder::new();
    let (top, done) = (b.label(), b.label());
    b.const_str("a").const_str("b").const_str("c");
    b.emit(Instr::NewList { len: 3 }).emit(Instr::IterNew);
    b.store(0, SlotType::Ref);
    b.bind(top);
    b.iter_next(0, SlotType::Ref, done).print();
    b.pause();
    b.goto(top);
    b.bind(done);
    b.print_str("end").ret();
    class("Walker", b)
}

/// Calls `target` and prints its answer.
pub fn parent(target: &str) -> ClassFile {
    let mut b = CodeBuilder::new();
    b.print_str("parent start");
    b.call(target, SlotType::Ref).store(0, SlotType::Ref);
    b.const_str("child said: ").load(0, SlotType::Ref).concat().print();
    b.ret();
    class("Parent", b)
}

/// Pauses once, then answers with the `name` parameter.
pub fn child() -> ClassFile {
    let mut b = CodeBuilder::new();
    b.print_str("child asks").pause();
    b.param("name").answer();
    class("Child", b)
}

/// Pauses twice, then answers with the `name` parameter.
pub fn patient_child() -> ClassFile {
    let mut b = CodeBuilder::new();
    b.print_str("child asks").pause();
    b.print_str("child asks again").pause();
    b.param("name").answer();
    class("Patient", b)
}

/// Cloneable; bumps the `step` field and pauses, forever.
pub fn wizard() -> ClassFile {
    let mut b = CodeBuilder::new();
    let top = b.label();
    b.bind(top);
    b.get_field("step", SlotType::Int).const_int(1).arith(ArithOp::Add, SlotType::Int);
    b.put_field("step", SlotType::Int);
    b.const_str("step ").get_field("step", SlotType::Int).concat().print();
    b.pause();
    b.goto(top);
    class("Wizard", b)
        .with_field(FieldDef::new("step", SlotType::Int))
        .cloneable(true)
}

/// Throws after one pause.
pub fn thrower() -> ClassFile {
    let mut b = CodeBuilder::new();
    b.pause();
    b.const_str("boom").emit(Instr::Throw);
    class("Thrower", b)
}

/// Prints its own continuation id before pausing.
pub fn linker() -> ClassFile {
    let mut b = CodeBuilder::new();
    b.emit(Instr::ContinuationId).print();
    b.pause();
    b.print_str("resumed").ret();
    class("Linker", b)
}

pub fn engine_with(classes: &[ClassFile]) -> Engine {
    let engine = Engine::new(Default::default());
    for class in classes {
        engine.load(&class.encode()).unwrap();
    }
    engine
}

/// An engine over a manually advanced clock.
pub fn clocked_engine(config: ManagerConfig, classes: &[ClassFile]) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let manager = ContinuationManager::with_clock(config, clock.clone());
    let engine = Engine::with_parts(Arc::new(manager), ProcedureRegistry::default());
    for class in classes {
        engine.load(&class.encode()).unwrap();
    }
    (engine, clock)
}

pub fn suspended(outcome: &RunOutcome) -> ContinuationId {
    match outcome {
        RunOutcome::Suspended(id) => *id,
        other => panic!("expected a suspension, got {other:?}"),
    }
}

pub fn no_params() -> Request {
    Request::new()
}
