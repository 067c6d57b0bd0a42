//! Test helpers for conductor tests
//!
//! Native functions used across the workflows under test, and runners that
//! take a composition through compile and the interpreter.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use crate::compiler::{compile, Fsm};
use crate::composer::{self, Function, Node};
use crate::conductor::{
    run_until_suspended, Conductor, ConductorSettings, NativeExecutor, Outcome, TaskError, VM,
};
use crate::test_helpers::{memory_sessions, LocalPlatform};

pub fn native(code: &str) -> Function {
    Function::exec(NativeExecutor::KIND, code)
}

/// Function node over a registered native function
pub fn call(code: &str) -> Node {
    composer::function(native(code)).unwrap()
}

fn number(params: &crate::value::Params, field: &str) -> i64 {
    params.get(field).and_then(JsonValue::as_i64).unwrap_or(0)
}

pub fn executor() -> NativeExecutor {
    NativeExecutor::new()
        .with("isEven", |p, _| Ok(Some(json!({ "value": number(p, "n") % 2 == 0 }))))
        .with("isNotOne", |p, _| Ok(Some(json!({ "value": number(p, "n") != 1 }))))
        .with("half", |p, _| Ok(Some(json!({ "n": number(p, "n") / 2 }))))
        .with("triple", |p, _| Ok(Some(json!({ "n": 3 * number(p, "n") + 1 }))))
        .with("inc", |p, _| Ok(Some(json!({ "n": number(p, "n") + 1 }))))
        .with("getX", |_, env| {
            let x = env.get("x").cloned().ok_or_else(|| TaskError::Unbound("x".into()))?;
            Ok(Some(json!({ "value": x })))
        })
        .with("env", |_, env| Ok(Some(json!({ "value": JsonValue::Object(env.clone()) }))))
        .with("setX", |p, env| {
            env.insert("x".to_string(), p.get("value").cloned().unwrap_or(JsonValue::Null));
            Ok(None)
        })
        .with("flaky", |_, env| {
            let x = env.get("x").and_then(JsonValue::as_i64).unwrap_or(0);
            if x > 0 {
                env.insert("x".to_string(), json!(x - 1));
                return Ok(Some(json!({ "error": "flaky" })));
            }
            Ok(Some(json!({ "value": "success" })))
        })
        .with("append", |p, _| {
            let mut trail = p.get("trail").cloned().unwrap_or_else(|| json!([]));
            if let Some(items) = trail.as_array_mut() {
                items.push(json!(items.len()));
            }
            Ok(Some(json!({ "trail": trail })))
        })
        .with("mutate", |p, _| {
            let mut out = p.clone();
            out.insert("a".to_string(), json!({ "b": 2 }));
            Ok(Some(JsonValue::Object(out)))
        })
        .with("boom", |_, _| Err(TaskError::Failed("boom".to_string())))
}

/// Run a program with no action calls to completion
pub fn run_program(fsm: &Fsm, params: JsonValue) -> JsonValue {
    let executor = executor();
    let mut vm = VM::new(fsm, params);
    match run_until_suspended(&mut vm, &executor).unwrap() {
        Outcome::Complete(result) => JsonValue::Object(result),
        Outcome::Invoke { action, .. } => panic!("unexpected action call to {}", action),
    }
}

/// Compile and run a composition with no action calls
pub fn run(node: Node, params: JsonValue) -> JsonValue {
    let compiled = compile(&node).unwrap();
    run_program(&compiled.composition, params)
}

/// Conductor over a memory store and the given platform
pub fn conductor(platform: &Arc<LocalPlatform>) -> Conductor {
    Conductor::new(
        memory_sessions(),
        platform.clone(),
        Arc::new(executor()),
        ConductorSettings {
            blocking_timeout: Duration::from_millis(50),
            ..ConductorSettings::default()
        },
    )
}

/// Start a session without blocking and play it out on the platform
pub async fn start_and_drain(
    conductor: &Conductor,
    platform: &LocalPlatform,
    program: JsonValue,
    params: JsonValue,
) -> (String, JsonValue) {
    let mut request = params.as_object().cloned().unwrap_or_default();
    request.insert("$invoke".to_string(), program);

    let handle = conductor.dispatch(JsonValue::Object(request)).await;
    let session_id = handle["$sessionId"]
        .as_str()
        .unwrap_or_else(|| panic!("expected a session handle, got {}", handle))
        .to_string();

    platform.drain(conductor).await;
    let result = conductor
        .sessions()
        .poll_result(&session_id)
        .await
        .unwrap()
        .unwrap();
    (session_id, result)
}
