use serde_json::json;

use super::*;
use crate::composer::{self, Function};

fn kinds(fsm: &Fsm) -> Vec<&'static str> {
    fsm.states.iter().map(|s| s.kind.type_name()).collect()
}

fn masks(fsm: &Fsm) -> usize {
    fsm.states
        .iter()
        .filter(|s| matches!(s.kind, StateKind::Let(Binding::Mask)))
        .count()
}

struct FanOut;

impl ConcurrencyExtension for FanOut {
    fn compile(&self, node: &Node, side: &mut Vec<SideAction>) -> Result<Task, String> {
        let mut action = Map::new();
        action.insert("kind".to_string(), json!("fan-out"));
        side.push(SideAction {
            name: "/_/fanout".to_string(),
            action,
        });
        Ok(Task::Value(json!({ "combinator": node.combinator().name() })))
    }
}

#[test]
fn test_sequence_layout() {
    let compiled = compile(&composer::seq(["a", "b"]).unwrap()).unwrap();
    let fsm = compiled.composition;

    assert_eq!(kinds(&fsm), vec!["Pass", "Task", "Task", "Pass"]);
    assert_eq!(fsm.entry, 0);
    assert_eq!(fsm.exit, 3);
    assert_eq!(
        fsm.states.iter().map(|s| s.next).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3), None]
    );
    assert_eq!(fsm.states[1].kind, StateKind::Task(Task::Action("/_/a".to_string())));
    assert_eq!(fsm.states[0].path.as_deref(), Some(""));
    assert!(compiled.actions.is_none());
}

#[test]
fn test_if_nosave_branches() {
    let node = composer::if_nosave("t", "yes", "no").unwrap();
    let fsm = compile(&node).unwrap().composition;

    // [Pass][t][Push][Choice][yes][no][Pass][exit]
    assert_eq!(
        kinds(&fsm),
        vec!["Pass", "Task", "Push", "Choice", "Task", "Task", "Pass", "Pass"]
    );
    assert_eq!(fsm.states[3].kind, StateKind::Choice { then: 4, otherwise: 5 });
    assert_eq!(fsm.states[4].next, Some(6));
    assert_eq!(fsm.states[5].next, Some(6));
    assert_eq!(fsm.states[6].next, Some(7));
}

#[test]
fn test_while_nosave_loops_back_to_test() {
    let node = composer::while_nosave("t", "body").unwrap();
    let fsm = compile(&node).unwrap().composition;

    // [Pass][t][Push][Choice][body][Pass][exit]
    assert_eq!(fsm.states[3].kind, StateKind::Choice { then: 4, otherwise: 5 });
    assert_eq!(fsm.states[4].next, Some(1));
    assert_eq!(fsm.states[5].next, Some(6));
}

#[test]
fn test_dowhile_nosave_loops_back_to_body() {
    let node = composer::dowhile_nosave("body", "t").unwrap();
    let fsm = compile(&node).unwrap().composition;

    // [Pass][body][t][Push][Choice][Pass][exit]
    assert_eq!(fsm.states[4].kind, StateKind::Choice { then: 1, otherwise: 5 });
}

#[test]
fn test_try_skips_handler_on_success() {
    let node = composer::try_("body", "handler").unwrap();
    let fsm = compile(&node).unwrap().composition;

    // [Try][body][Catch][handler][Pass][exit]
    assert_eq!(kinds(&fsm), vec!["Try", "Task", "Catch", "Task", "Pass", "Pass"]);
    assert_eq!(fsm.states[0].kind, StateKind::Try { handler: 3 });
    assert_eq!(fsm.states[2].next, Some(4));
}

#[test]
fn test_finally_falls_into_finalizer() {
    let node = composer::finally("body", "cleanup").unwrap();
    let fsm = compile(&node).unwrap().composition;

    assert_eq!(kinds(&fsm), vec!["Try", "Task", "Catch", "Task", "Pass"]);
    assert_eq!(fsm.states[0].kind, StateKind::Try { handler: 3 });
    assert_eq!(fsm.states[2].next, Some(3));
}

#[test]
fn test_let_binds_each_declaration() {
    let node = composer::let_(json!({"x": 1, "y": null}), ["a"]).unwrap();
    let fsm = compile(&node).unwrap().composition;

    assert_eq!(kinds(&fsm), vec!["Let", "Let", "Task", "End", "End", "Pass"]);
    assert_eq!(
        fsm.states[1].kind,
        StateKind::Let(Binding::Symbol {
            symbol: "y".to_string(),
            value: JsonValue::Null
        })
    );
}

#[test]
fn test_mask_hides_innermost_group() {
    let inner = composer::mask(["a"]).unwrap();
    let node = composer::let_(json!({"x": 1, "y": 2}), [inner]).unwrap();
    assert_eq!(masks(&compile(&node).unwrap().composition), 2);

    let node = composer::mask(["a"]).unwrap();
    assert_eq!(masks(&compile(&node).unwrap().composition), 1);

    // A let without declarations still pushes a frame for the mask to hide
    let inner = composer::let_(json!({}), [composer::mask(["a"]).unwrap()]).unwrap();
    let node = composer::let_(json!({"x": 1, "y": 2, "z": 3}), [inner]).unwrap();
    let fsm = compile(&node).unwrap().composition;
    assert_eq!(masks(&fsm), 1);
    assert_eq!(fsm.states[3].kind, StateKind::Let(Binding::Empty));
}

#[test]
fn test_empty_let_round_trips() {
    let node = composer::let_(json!({}), ["a"]).unwrap();
    let fsm = compile(&node).unwrap().composition;
    assert_eq!(kinds(&fsm), vec!["Let", "Task", "End", "Pass"]);

    let reloaded = Fsm::from_json(fsm.to_json()).unwrap();
    assert_eq!(reloaded.states[0].kind, StateKind::Let(Binding::Empty));
}

#[test]
fn test_nested_masks_reach_outer_groups() {
    let inner = composer::mask([composer::mask(["a"]).unwrap()]).unwrap();
    let middle = composer::let_(json!({"x": 1}), [inner]).unwrap();
    let node = composer::let_(json!({"x": 1, "y": 2}), [middle]).unwrap();

    // Outer mask hides the single binding, inner one the pair
    assert_eq!(masks(&compile(&node).unwrap().composition), 3);
}

#[test]
fn test_derived_combinators_are_lowered() {
    let node = composer::seq([
        composer::retry(2, ["a"]).unwrap(),
        composer::if_("t", "yes", "no").unwrap(),
    ])
    .unwrap();
    let fsm = compile(&node).unwrap().composition;

    assert!(fsm
        .states
        .iter()
        .any(|s| matches!(s.kind, StateKind::Task(Task::Function(Function::Builtin(_))))));
}

#[test]
fn test_fan_out_requires_extension() {
    let node = composer::parallel(["a", "b"]).unwrap();
    match compile(&node) {
        Err(CompileError::Unsupported { combinator, path }) => {
            assert_eq!(combinator, "parallel");
            assert_eq!(path, "");
        }
        other => panic!("expected unsupported, got {:?}", other),
    }
}

#[test]
fn test_fan_out_extension_registers_side_action() {
    let node = composer::seq([
        composer::map(["a"]).unwrap(),
        composer::async_(["b"]).unwrap(),
    ])
    .unwrap();
    let compiled = compile_with(&node, Some(&FanOut as &dyn ConcurrencyExtension)).unwrap();

    let actions = compiled.actions.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].name, "/_/fanout");

    let tasks = compiled
        .composition
        .states
        .iter()
        .filter_map(|s| match &s.kind {
            StateKind::Task(Task::Value(v)) => Some(v["combinator"].clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(tasks, vec![json!("map"), json!("async")]);
}

#[test]
fn test_inline_definitions_are_lifted() {
    let definition = json!({"exec": {"kind": "nodejs:default", "code": "main"}});
    let node = composer::seq([
        composer::action_with("a", definition.clone()).unwrap(),
        composer::action_with("a", definition).unwrap(),
    ])
    .unwrap();
    let actions = compile(&node).unwrap().actions.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].name, "/_/a");

    let node = composer::seq([
        composer::action_with("a", json!({"exec": {"code": "one"}})).unwrap(),
        composer::action_with("a", json!({"exec": {"code": "two"}})).unwrap(),
    ])
    .unwrap();
    assert!(matches!(
        compile(&node),
        Err(CompileError::ConflictingAction(name)) if name == "/_/a"
    ));
}

#[test]
fn test_program_json_round_trip() {
    let node = composer::seq([
        composer::let_(json!({"n": 0}), [composer::mask(["a"]).unwrap()]).unwrap(),
        composer::try_(
            composer::function(Function::exec("native", "half")).unwrap(),
            composer::value(json!({"ok": false})).unwrap(),
        )
        .unwrap(),
        composer::while_nosave("t", composer::empty()).unwrap(),
    ])
    .unwrap();
    let fsm = compile(&node).unwrap().composition;

    let json = fsm.to_json();
    assert_eq!(json["Entry"], json!("0"));
    assert_eq!(json["States"]["0"]["Type"], json!("Pass"));
    assert_eq!(Fsm::from_json(json).unwrap(), fsm);
}

#[test]
fn test_compiled_wrapper_shape() {
    let compiled = compile(&composer::action("a").unwrap()).unwrap();
    let json = serde_json::to_value(&compiled).unwrap();

    assert!(json["composition"]["States"].is_object());
    assert_eq!(json["ast"]["type"], json!("action"));
    assert_eq!(json["version"], json!(env!("CARGO_PKG_VERSION")));
    assert!(json.get("actions").is_none());
}

#[test]
fn test_program_load_errors() {
    let missing_next = json!({
        "Entry": "0", "Exit": "1",
        "States": {"0": {"Type": "Pass"}, "1": {"Type": "Pass"}}
    });
    assert!(matches!(
        Fsm::from_json(missing_next),
        Err(FsmError::MissingNext(state)) if state == "0"
    ));

    let unknown_target = json!({
        "Entry": "0", "Exit": "0",
        "States": {"0": {"Type": "Pass", "Next": "9"}}
    });
    assert!(matches!(
        Fsm::from_json(unknown_target),
        Err(FsmError::UnknownState { .. })
    ));

    let missing_else = json!({
        "Entry": "0", "Exit": "1",
        "States": {"0": {"Type": "Choice", "Then": "1"}, "1": {"Type": "Pass"}}
    });
    assert!(matches!(
        Fsm::from_json(missing_else),
        Err(FsmError::MissingField { field: "Else", .. })
    ));

    let unknown_type = json!({
        "Entry": "0", "Exit": "0",
        "States": {"0": {"Type": "Parallel"}}
    });
    assert!(matches!(Fsm::from_json(unknown_type), Err(FsmError::Malformed(_))));

    assert!(matches!(Fsm::from_json(json!([1, 2])), Err(FsmError::Malformed(_))));
}

#[test]
fn test_states_sort_numerically() {
    let program = json!({
        "Entry": "2", "Exit": "10",
        "States": {
            "2": {"Type": "Task", "Value": {"n": 1}, "Next": "10"},
            "10": {"Type": "Pass"}
        }
    });
    let fsm = Fsm::from_json(program).unwrap();
    assert_eq!(fsm.entry, 0);
    assert_eq!(fsm.exit, 1);
    assert_eq!(fsm.states[0].kind, StateKind::Task(Task::Value(json!({"n": 1}))));
}
