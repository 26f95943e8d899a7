mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::*;
use reprise_ir::Value;
use reprise_runtime::{
    ContinuationManager, Engine, FaultKind, ManagerConfig, ManagerError, ManualClock,
    ProcedureRegistry, Request, RunError, RunOutcome,
};

#[test]
fn counter_survives_two_suspensions() {
    let engine = engine_with(&[counter()]);

    let first = engine.start("Counter", &no_params());
    assert_eq!(first.output, "A:1\n");
    let id1 = suspended(&first.outcome);
    let context = engine.manager().get(&id1).unwrap();
    assert_eq!(context.locals[&0], Value::Int(1));

    let second = engine.resume(&id1, &no_params());
    assert_eq!(second.output, "B:2\n");
    let id2 = suspended(&second.outcome);
    assert_ne!(id1, id2);
    assert_eq!(
        engine.manager().get(&id1).unwrap_err(),
        ManagerError::NotFound { id: id1 }
    );
    assert_eq!(engine.manager().get(&id2).unwrap().locals[&0], Value::Int(2));

    let last = engine.resume(&id2, &no_params());
    assert_eq!(last.outcome, RunOutcome::Completed(None));
    assert_eq!(last.output, "done:2\n");
}

#[test]
fn completed_chains_cannot_be_resumed() {
    let engine = engine_with(&[counter()]);
    let id1 = suspended(&engine.start("Counter", &no_params()).outcome);
    let id2 = suspended(&engine.resume(&id1, &no_params()).outcome);
    engine.resume(&id2, &no_params());

    let again = engine.resume(&id2, &no_params());
    assert_eq!(again.outcome, RunOutcome::Expired);
    assert!(again.output.is_empty());
    assert_eq!(engine.resume(&id1, &no_params()).outcome, RunOutcome::Expired);
    assert!(engine.manager().is_empty());
}

#[test]
fn faults_after_a_pause_are_caught_by_the_enclosing_region() {
    let engine = engine_with(&[divider()]);
    let id = suspended(&engine.start("Divider", &no_params()).outcome);
    let run = engine.resume(&id, &no_params());
    assert_eq!(run.outcome, RunOutcome::Completed(None));
    assert_eq!(run.output, "caught: division by zero\nctx\n");
}

#[test]
fn uncaught_fault_fails_and_discards_the_chain() {
    let engine = engine_with(&[thrower()]);
    let id = suspended(&engine.start("Thrower", &no_params()).outcome);
    let run = engine.resume(&id, &no_params());
    let RunOutcome::Failed(RunError::Fault(fault)) = run.outcome else {
        panic!("expected a fault, got {:?}", run.outcome);
    };
    assert_eq!(
        fault.kind,
        FaultKind::Thrown {
            message: "boom".to_owned()
        }
    );
    assert!(engine.manager().is_empty());
    assert_eq!(engine.resume(&id, &no_params()).outcome, RunOutcome::Expired);
}

#[test]
fn iterator_locals_resume_at_their_position() {
    let engine = engine_with(&[walker()]);
    let mut outputs = Vec::new();
    let mut run = engine.start("Walker", &no_params());
    while let RunOutcome::Suspended(id) = run.outcome {
        outputs.push(run.output);
        run = engine.resume(&id, &no_params());
    }
    outputs.push(run.output);
    assert_eq!(run.outcome, RunOutcome::Completed(None));
    assert_eq!(outputs, vec!["a\n", "b\n", "c\n", "end\n"]);
}

#[test]
fn child_answer_resumes_the_caller() {
    let engine = engine_with(&[parent("Child"), child()]);

    let first = engine.start("Parent", &no_params());
    assert_eq!(first.output, "parent start\nchild asks\n");
    let child_id = suspended(&first.outcome);
    assert_eq!(engine.manager().len(), 2);
    let rows = engine.manager().entries();
    let child_row = rows.iter().find(|row| row.id == child_id).unwrap();
    assert_eq!(child_row.procedure.class, "Child");
    assert!(child_row.caller.is_some());

    let second = engine.resume(&child_id, &Request::new().with_param("name", "Ada"));
    assert_eq!(second.outcome, RunOutcome::Completed(None));
    assert_eq!(second.output, "child said: Ada\n");
    assert!(engine.manager().is_empty());
}

#[test]
fn call_to_an_unloaded_procedure_fails() {
    let engine = engine_with(&[parent("Missing")]);
    let run = engine.start("Parent", &no_params());
    assert_eq!(
        run.outcome,
        RunOutcome::Failed(RunError::UnknownProcedure {
            name: "Missing".to_owned()
        })
    );
    assert!(engine.manager().is_empty());
}

#[test]
fn starting_an_unknown_class_fails() {
    let engine = engine_with(&[]);
    assert!(matches!(
        engine.start("Nobody", &no_params()).outcome,
        RunOutcome::Failed(RunError::UnknownProcedure { .. })
    ));
}

#[test]
fn continuation_id_names_the_resumable_chain() {
    let engine = engine_with(&[linker()]);
    let run = engine.start("Linker", &no_params());
    let id = suspended(&run.outcome);
    assert_eq!(run.output, format!("{id}\n"));
    assert_eq!(engine.resume(&id, &no_params()).output, "resumed\n");
}

#[test]
fn clones_evolve_independently() {
    let engine = engine_with(&[wizard()]);
    let original = suspended(&engine.start("Wizard", &no_params()).outcome);
    let copy = engine.clone_continuation(&original).unwrap();

    let advanced = engine.resume(&original, &no_params());
    assert_eq!(advanced.output, "step 2\n");
    let branched = engine.resume(&copy, &no_params());
    assert_eq!(branched.output, "step 2\n");

    let next = suspended(&advanced.outcome);
    assert_eq!(engine.resume(&next, &no_params()).output, "step 3\n");
    let copy_next = suspended(&branched.outcome);
    assert_eq!(engine.resume(&copy_next, &no_params()).output, "step 3\n");
}

#[test]
fn cloning_requires_a_cloneable_procedure() {
    let engine = engine_with(&[counter()]);
    let id = suspended(&engine.start("Counter", &no_params()).outcome);
    assert!(matches!(
        engine.clone_continuation(&id),
        Err(ManagerError::NotCloneable { .. })
    ));
}

#[test]
fn concurrent_checkouts_admit_exactly_one() {
    let engine = Arc::new(engine_with(&[counter()]));
    let id = suspended(&engine.start("Counter", &no_params()).outcome);
    let barrier = Arc::new(Barrier::new(2));
    let held = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let held = Arc::clone(&held);
            thread::spawn(move || {
                barrier.wait();
                let lease = engine.manager().checkout(&id);
                held.wait();
                lease.map(drop)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(ManagerError::ConcurrentReentry { id })));
}

#[test]
fn resume_during_an_active_reentry_is_refused() {
    let engine = engine_with(&[counter()]);
    let id = suspended(&engine.start("Counter", &no_params()).outcome);
    let lease = engine.manager().checkout(&id).unwrap();

    let run = engine.resume(&id, &no_params());
    assert_eq!(
        run.outcome,
        RunOutcome::Failed(RunError::ConcurrentReentry { id })
    );
    drop(lease);
    assert_eq!(engine.resume(&id, &no_params()).output, "B:2\n");
}

#[test]
fn idle_chains_expire() {
    let clock = Arc::new(ManualClock::new());
    let manager = ContinuationManager::with_clock(ManagerConfig::default(), clock.clone());
    let engine = Engine::with_parts(Arc::new(manager), ProcedureRegistry::default());
    engine.load(&counter().encode()).unwrap();

    let id = suspended(&engine.start("Counter", &no_params()).outcome);
    clock.advance(Duration::from_secs(19 * 60));
    assert_eq!(engine.sweep(), 0);
    clock.advance(Duration::from_secs(2 * 60));
    assert_eq!(engine.sweep(), 1);
    assert_eq!(engine.resume(&id, &no_params()).outcome, RunOutcome::Expired);
}

#[test]
fn full_registry_evicts_the_stalest_chain() {
    let clock = Arc::new(ManualClock::new());
    let config = ManagerConfig::default().with_max_entries(1);
    let manager = ContinuationManager::with_clock(config, clock.clone());
    let engine = Engine::with_parts(Arc::new(manager), ProcedureRegistry::default());
    engine.load(&counter().encode()).unwrap();

    let stale = suspended(&engine.start("Counter", &no_params()).outcome);
    clock.advance(Duration::from_secs(1));
    let fresh = suspended(&engine.start("Counter", &no_params()).outcome);
    assert_eq!(engine.resume(&stale, &no_params()).outcome, RunOutcome::Expired);
    assert_eq!(engine.resume(&fresh, &no_params()).output, "B:2\n");
}

fn named(name: &str) -> Request {
    Request::new().with_param("name", name)
}

#[test]
fn cloned_callee_answers_its_own_caller() {
    let engine = engine_with(&[parent("Child").cloneable(true), child().cloneable(true)]);
    let original = suspended(&engine.start("Parent", &no_params()).outcome);
    let copy = engine.clone_continuation(&original).unwrap();
    assert_eq!(engine.manager().len(), 4);

    let first = engine.resume(&original, &named("Ada"));
    assert_eq!(first.outcome, RunOutcome::Completed(None));
    assert_eq!(first.output, "child said: Ada\n");
    assert_eq!(engine.manager().len(), 2);

    let second = engine.resume(&copy, &named("Bob"));
    assert_eq!(second.outcome, RunOutcome::Completed(None));
    assert_eq!(second.output, "child said: Bob\n");
    assert!(engine.manager().is_empty());
}

#[test]
fn cloning_a_callee_needs_a_cloneable_caller() {
    let engine = engine_with(&[parent("Child"), child().cloneable(true)]);
    let id = suspended(&engine.start("Parent", &no_params()).outcome);
    match engine.clone_continuation(&id) {
        Err(ManagerError::NotCloneable { procedure }) => assert_eq!(procedure.class, "Parent"),
        other => panic!("expected a refusal, got {other:?}"),
    }
    assert_eq!(engine.manager().len(), 2);
}

#[test]
fn waiting_caller_survives_a_slow_callee() {
    let config = ManagerConfig::default().with_expiration(Duration::from_secs(60));
    let (engine, clock) = clocked_engine(config, &[parent("Patient"), patient_child()]);

    let first = suspended(&engine.start("Parent", &no_params()).outcome);
    clock.advance(Duration::from_secs(40));
    let again = engine.resume(&first, &no_params());
    assert_eq!(again.output, "child asks again\n");
    let second = suspended(&again.outcome);

    clock.advance(Duration::from_secs(40));
    let last = engine.resume(&second, &named("Ada"));
    assert_eq!(last.outcome, RunOutcome::Completed(None));
    assert_eq!(last.output, "child said: Ada\n");
    assert!(engine.manager().is_empty());
}

#[test]
fn abandoned_callee_expires_with_its_caller() {
    let config = ManagerConfig::default().with_expiration(Duration::from_secs(60));
    let (engine, clock) = clocked_engine(config, &[parent("Child"), child()]);
    let id = suspended(&engine.start("Parent", &no_params()).outcome);

    clock.advance(Duration::from_secs(61));
    assert_eq!(engine.sweep(), 2);
    assert!(engine.manager().is_empty());
    assert_eq!(engine.resume(&id, &named("Ada")).outcome, RunOutcome::Expired);
}

#[test]
fn waiting_caller_cannot_be_resumed_directly() {
    let engine = engine_with(&[parent("Child"), child()]);
    let child_id = suspended(&engine.start("Parent", &no_params()).outcome);
    let caller = engine.manager().get(&child_id).unwrap().caller.unwrap();
    assert!(
        engine
            .manager()
            .entries()
            .iter()
            .any(|row| row.id == caller && row.awaiting_answer)
    );

    assert_eq!(
        engine.resume(&caller, &no_params()).outcome,
        RunOutcome::Failed(RunError::AwaitingAnswer { id: caller })
    );
    assert_eq!(engine.resume(&child_id, &named("Ada")).output, "child said: Ada\n");
}

#[test]
fn single_slot_registry_refuses_a_call() {
    let config = ManagerConfig::default().with_max_entries(1);
    let (engine, _) = clocked_engine(config, &[parent("Child"), child()]);
    let run = engine.start("Parent", &no_params());
    assert_eq!(
        run.outcome,
        RunOutcome::Failed(RunError::CapacityExceeded { limit: 1 })
    );
    assert_eq!(run.output, "parent start\n");
    assert!(engine.manager().is_empty());
}

#[test]
fn evicting_a_callee_discards_its_caller() {
    let config = ManagerConfig::default().with_max_entries(2);
    let (engine, clock) = clocked_engine(config, &[parent("Child"), child(), counter()]);
    let child_id = suspended(&engine.start("Parent", &no_params()).outcome);
    clock.advance(Duration::from_secs(1));

    let counter_id = suspended(&engine.start("Counter", &no_params()).outcome);
    let rows = engine.manager().entries();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, counter_id);
    assert_eq!(engine.resume(&child_id, &named("Ada")).outcome, RunOutcome::Expired);
}

#[test]
fn callee_of_a_disposed_caller_is_discarded_on_answer() {
    let engine = engine_with(&[parent("Child"), child()]);
    let child_id = suspended(&engine.start("Parent", &no_params()).outcome);
    let caller = engine.manager().get(&child_id).unwrap().caller.unwrap();
    assert!(engine.manager().remove(&caller));

    assert_eq!(engine.resume(&child_id, &named("Ada")).outcome, RunOutcome::Expired);
    assert!(engine.manager().is_empty());
}

#[test]
fn disposing_a_callee_disposes_its_caller() {
    let engine = engine_with(&[parent("Child"), child()]);
    let child_id = suspended(&engine.start("Parent", &no_params()).outcome);
    assert!(engine.dispose(&child_id));
    assert!(engine.manager().is_empty());
}
