//! End to end: class files on disk, a TOML config, and a scripted session.

use std::fs;

use reprise::pipeline::load_all;
use reprise::{EngineConfig, Session};
use reprise_ir::{ClassFile, CodeBuilder, DEFAULT_METHOD, FieldDef, SlotType};

fn wizard() -> ClassFile {
    let mut b = CodeBuilder::new();
    let top = b.label();
    b.bind(top);
    b.get_field("step", SlotType::Int)
        .const_int(1)
        .arith(reprise_ir::ArithOp::Add, SlotType::Int)
        .put_field("step", SlotType::Int);
    b.const_str("step ").get_field("step", SlotType::Int).concat().print();
    b.pause();
    b.goto(top);
    ClassFile::new("Wizard")
        .with_field(FieldDef::new("step", SlotType::Int))
        .with_method(b.build(DEFAULT_METHOD).unwrap())
}

fn last_id(reply: &str) -> String {
    reply
        .lines()
        .filter_map(|line| {
            line.strip_prefix("suspended ")
                .or_else(|| line.strip_prefix("cloned "))
        })
        .last()
        .unwrap()
        .to_owned()
}

#[test]
fn configured_clone_requirement_rejects_the_class() {
    let dir = tempfile::tempdir().unwrap();
    let class = dir.path().join("wizard.json");
    fs::write(&class, wizard().encode()).unwrap();
    let config = dir.path().join("reprise.toml");
    fs::write(&config, "[procedures]\nrequire_cloneable = [\"Wizard\"]\n").unwrap();

    let engine = EngineConfig::from_file(&config)
        .unwrap()
        .build_engine()
        .unwrap();
    let err = load_all(&engine, &[&class]).unwrap_err();
    assert_eq!(err.to_string(), "class Wizard is required to support cloning");
}

#[test]
fn scripted_session_with_clones() {
    let dir = tempfile::tempdir().unwrap();
    let class = dir.path().join("wizard.json");
    fs::write(&class, wizard().cloneable(true).encode()).unwrap();

    let engine = EngineConfig::from_toml("[continuations]\nmax_entries = 4\n")
        .unwrap()
        .build_engine()
        .unwrap();
    assert_eq!(load_all(&engine, &[&class]).unwrap(), vec!["Wizard".to_owned()]);
    let session = Session::new(&engine);

    let first = session.execute("start Wizard").unwrap();
    assert!(first.starts_with("step 1\nsuspended "));
    let original = last_id(&first);
    let copy = last_id(&session.execute(&format!("clone {original}")).unwrap());

    let advanced = session.execute(&format!("resume {original}")).unwrap();
    assert!(advanced.starts_with("step 2\n"));
    let branched = session.execute(&format!("resume {copy}")).unwrap();
    assert!(branched.starts_with("step 2\n"));

    assert_eq!(session.execute(&format!("resume {original}")).unwrap(), "expired\n");
    assert_eq!(session.execute("list").unwrap().lines().count(), 2);
    assert!(session.execute("quit").is_none());
}
