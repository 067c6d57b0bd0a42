//! Tests for the step interpreter: control flow, data flow, action suspension

use serde_json::{json, Value as JsonValue};

use super::helpers::{call, executor, run, run_program};
use crate::compiler::{compile, Fsm};
use crate::composer;
use crate::conductor::{run_until_suspended, step, Outcome, Step, VM};

/* ===================== Pass-through ===================== */

#[test]
fn test_null_task_passes_params_through() {
    let node = composer::task(JsonValue::Null).unwrap();
    assert_eq!(run(node, json!({"foo": "bar"})), json!({"foo": "bar"}));
}

#[test]
fn test_null_task_reraises_pending_error() {
    let node = composer::task(JsonValue::Null).unwrap();
    assert_eq!(run(node, json!({"error": "bar", "n": 1})), json!({"error": "bar"}));
}

#[test]
fn test_empty_sequence_is_identity() {
    let node = composer::seq(Vec::<composer::Node>::new()).unwrap();
    assert_eq!(run(node, json!({"a": 1})), json!({"a": 1}));
}

#[test]
fn test_sequence_nesting_is_confluent() {
    let left = composer::seq([
        composer::seq([call("append"), call("append")]).unwrap(),
        call("append"),
    ])
    .unwrap();
    let right = composer::seq([
        call("append"),
        composer::seq([call("append"), call("append")]).unwrap(),
    ])
    .unwrap();

    let flat = composer::seq([call("append"), call("append"), call("append")]).unwrap();

    let expected = json!({"trail": [0, 1, 2]});
    assert_eq!(run(left, json!({})), expected);
    assert_eq!(run(right, json!({})), expected);
    assert_eq!(run(flat, json!({})), expected);
}

#[test]
fn test_value_replaces_params() {
    let node = composer::value(json!([1, 2])).unwrap();
    assert_eq!(run(node, json!({"a": 1})), json!({"value": [1, 2]}));

    let node = composer::literal(json!({"b": 2})).unwrap();
    assert_eq!(run(node, json!({"a": 1})), json!({"b": 2}));
}

/* ===================== Conditionals and loops ===================== */

#[test]
fn test_if_restores_input_for_branch() {
    let node = composer::if_(call("isEven"), call("half"), call("triple")).unwrap();
    assert_eq!(run(node.clone(), json!({"n": 4})), json!({"n": 2}));
    assert_eq!(run(node, json!({"n": 3})), json!({"n": 10}));
}

#[test]
fn test_if_nosave_passes_test_output() {
    let node = composer::if_nosave(call("isEven"), composer::empty(), composer::empty()).unwrap();
    assert_eq!(run(node, json!({"n": 4})), json!({"value": true}));
}

#[test]
fn test_if_without_alternate() {
    let node = composer::if_(call("isEven"), call("half"), JsonValue::Null).unwrap();
    assert_eq!(run(node, json!({"n": 5})), json!({"n": 5}));
}

#[test]
fn test_collatz() {
    let node = composer::while_(
        call("isNotOne"),
        composer::if_(call("isEven"), call("half"), call("triple")).unwrap(),
    )
    .unwrap();
    assert_eq!(run(node.clone(), json!({"n": 6})), json!({"n": 1}));
    assert_eq!(run(node, json!({"n": 27})), json!({"n": 1}));
}

#[test]
fn test_while_body_never_runs() {
    let node = composer::while_(call("isNotOne"), call("inc")).unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"n": 1}));
}

#[test]
fn test_dowhile_runs_body_first() {
    let node = composer::dowhile(call("inc"), call("isEven")).unwrap();
    assert_eq!(run(node.clone(), json!({"n": 1})), json!({"n": 3}));
    assert_eq!(run(node, json!({"n": 0})), json!({"n": 1}));
}

#[test]
fn test_repeat_counts_iterations() {
    let node = composer::repeat(3, [call("inc")]).unwrap();
    assert_eq!(run(node, json!({"n": 0})), json!({"n": 3}));

    let node = composer::repeat(0, [call("inc")]).unwrap();
    assert_eq!(run(node, json!({"n": 0})), json!({"n": 0}));
}

/* ===================== Errors ===================== */

#[test]
fn test_function_exception_is_opaque() {
    let result = run(call("boom"), json!({"n": 1}));
    let message = result["error"].as_str().unwrap();
    assert!(message.starts_with("An exception was caught at state"));
    assert!(message.ends_with("(see log for details)"));
    assert_eq!(result.as_object().unwrap().len(), 1);
}

#[test]
fn test_try_routes_error_to_handler() {
    let node = composer::try_(
        composer::seq([call("boom"), call("inc")]).unwrap(),
        composer::value(json!({"recovered": true})).unwrap(),
    )
    .unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"recovered": true}));
}

#[test]
fn test_try_skips_handler_without_error() {
    let node = composer::try_(call("inc"), composer::value(json!({"recovered": true})).unwrap())
        .unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"n": 2}));
}

#[test]
fn test_handler_sees_error_object() {
    let node = composer::try_(
        composer::value(json!({"error": "bad", "detail": 1})).unwrap(),
        composer::empty(),
    )
    .unwrap();
    // The identity handler re-raises the error it was given
    assert_eq!(run(node, json!({})), json!({"error": "bad"}));
}

#[test]
fn test_finally_runs_finalizer_on_error() {
    let node = composer::finally(call("boom"), call("inc")).unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"n": 1}));

    let node = composer::finally(call("inc"), call("inc")).unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"n": 3}));
}

#[test]
fn test_retry_until_success() {
    let node = composer::let_(
        json!({"x": 2}),
        [composer::retry(2, [call("flaky")]).unwrap()],
    )
    .unwrap();
    assert_eq!(run(node, json!({})), json!({"value": "success"}));
}

#[test]
fn test_retry_exhausted_surfaces_error() {
    let node = composer::let_(
        json!({"x": 2}),
        [composer::retry(1, [call("flaky")]).unwrap()],
    )
    .unwrap();
    assert_eq!(run(node, json!({})), json!({"error": "flaky"}));
}

/* ===================== Retain and merge ===================== */

#[test]
fn test_retain_pairs_input_and_output() {
    let node = composer::retain([call("inc")]).unwrap();
    assert_eq!(
        run(node, json!({"n": 1})),
        json!({"params": {"n": 1}, "result": {"n": 2}})
    );
}

#[test]
fn test_retain_catch_keeps_error_as_result() {
    let node = composer::retain_catch([composer::value(json!({"error": "bad"})).unwrap()]).unwrap();
    assert_eq!(
        run(node, json!({"n": 1})),
        json!({"params": {"n": 1}, "result": {"error": "bad"}})
    );
}

#[test]
fn test_retain_propagates_error() {
    let node = composer::retain([composer::value(json!({"error": "bad"})).unwrap()]).unwrap();
    assert_eq!(run(node, json!({"n": 1})), json!({"error": "bad"}));
}

#[test]
fn test_merge_overlays_result() {
    let node = composer::merge([call("inc")]).unwrap();
    assert_eq!(run(node, json!({"n": 1, "m": 5})), json!({"n": 2, "m": 5}));
}

/* ===================== Stack ===================== */

#[test]
fn test_push_snapshot_is_independent() {
    let program = Fsm::from_json(json!({
        "Entry": "0",
        "Exit": "4",
        "States": {
            "0": {"Type": "Task", "Value": {"a": {"b": 1}}, "Next": "1"},
            "1": {"Type": "Push", "Next": "2"},
            "2": {"Type": "Task", "Function": {"exec": {"kind": "native", "code": "mutate"}}, "Next": "3"},
            "3": {"Type": "Pop", "Next": "4"},
            "4": {"Type": "Pass"}
        }
    }))
    .unwrap();

    assert_eq!(
        run_program(&program, json!({})),
        json!({"result": {"a": {"b": 2}}, "params": {"a": {"b": 1}}})
    );
}

#[test]
fn test_step_reports_each_state() {
    let fsm = compile(&composer::empty()).unwrap().composition;
    let executor = executor();
    let mut vm = VM::new(&fsm, json!({"a": 1}));

    assert_eq!(step(&mut vm, &executor).unwrap(), Step::Continue);
    assert_eq!(vm.state, Some(fsm.exit));
    assert_eq!(step(&mut vm, &executor).unwrap(), Step::Continue);
    assert_eq!(vm.state, None);
    assert_eq!(step(&mut vm, &executor).unwrap(), Step::Done);
}

/* ===================== Actions ===================== */

#[test]
fn test_action_suspends_and_resumes() {
    let fsm = compile(&composer::seq(["double", "inc"]).unwrap())
        .unwrap()
        .composition;
    let executor = executor();

    let mut vm = VM::new(&fsm, json!({"n": 3}));
    let outcome = run_until_suspended(&mut vm, &executor).unwrap();
    let Outcome::Invoke { action, params } = outcome else {
        panic!("expected an action call, got {:?}", outcome);
    };
    assert_eq!(action, "/_/double");
    assert_eq!(JsonValue::Object(params), json!({"n": 3}));

    // A fresh VM picks up from the persisted state and stack
    let mut resumed = VM::resume(&fsm, vm.state, vm.stack.clone(), json!({"n": 6}));
    let outcome = run_until_suspended(&mut resumed, &executor).unwrap();
    assert!(matches!(outcome, Outcome::Invoke { ref action, .. } if action == "/_/inc"));
}

#[test]
fn test_resume_coerces_and_inspects_result() {
    let fsm = compile(&composer::try_("double", composer::value(json!({"caught": true})).unwrap()).unwrap())
        .unwrap()
        .composition;
    let executor = executor();

    let mut vm = VM::new(&fsm, json!({}));
    run_until_suspended(&mut vm, &executor).unwrap();

    let mut ok = VM::resume(&fsm, vm.state, vm.stack.clone(), json!(3));
    assert_eq!(
        run_until_suspended(&mut ok, &executor).unwrap(),
        Outcome::Complete(json!({"value": 3}).as_object().unwrap().clone())
    );

    let mut failed = VM::resume(&fsm, vm.state, vm.stack.clone(), json!({"error": "x", "n": 1}));
    assert_eq!(
        run_until_suspended(&mut failed, &executor).unwrap(),
        Outcome::Complete(json!({"caught": true}).as_object().unwrap().clone())
    );
}

#[test]
fn test_delivered_error_without_handler_ends_run() {
    let fsm = compile(&composer::seq(["double", "inc"]).unwrap())
        .unwrap()
        .composition;
    let executor = executor();

    let mut vm = VM::new(&fsm, json!({"n": 3}));
    run_until_suspended(&mut vm, &executor).unwrap();
    vm.deliver(json!({"error": "down", "n": 3}));

    assert_eq!(vm.state, None);
    assert_eq!(
        run_until_suspended(&mut vm, &executor).unwrap(),
        Outcome::Complete(json!({"error": "down"}).as_object().unwrap().clone())
    );
}
