//! State handlers
//!
//! One handler per state kind. Each handler applies its effect to the VM and
//! sets the next state; the step loop only dispatches.

use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use tracing::error;

use super::builtins;
use super::errors::ExecutionError;
use super::executor::TaskExecutor;
use super::frames::Frame;
use super::vm::{Step, VM};
use crate::compiler::{Binding, Task};
use crate::composer::Function;
use crate::value::{copy_params, deep_copy, into_params, Env};

/* ===================== Stack helpers ===================== */

fn pop(
    vm: &mut VM,
    current: usize,
    kind: &'static str,
    expected: &'static str,
) -> Result<Frame, ExecutionError> {
    let frame = vm.stack.pop().ok_or(ExecutionError::EmptyStack {
        state: current,
        kind,
        expected,
    })?;
    if frame.name() != expected {
        return Err(ExecutionError::UnexpectedFrame {
            state: current,
            kind,
            expected,
            found: frame.name(),
        });
    }
    Ok(frame)
}

/* ===================== Handlers ===================== */

pub fn execute_choice(
    vm: &mut VM,
    current: usize,
    then: usize,
    otherwise: usize,
) -> Result<Step, ExecutionError> {
    if let Frame::Params(saved) = pop(vm, current, "Choice", "params")? {
        vm.params = saved;
    }
    let taken = vm.params.get("value") == Some(&JsonValue::Bool(true));
    vm.state = Some(if taken { then } else { otherwise });
    Ok(Step::Continue)
}

pub fn execute_try(vm: &mut VM, handler: usize, next: Option<usize>) -> Result<Step, ExecutionError> {
    vm.stack.push(Frame::Catch(handler));
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_catch(
    vm: &mut VM,
    current: usize,
    next: Option<usize>,
) -> Result<Step, ExecutionError> {
    pop(vm, current, "Catch", "catch")?;
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_push(vm: &mut VM, next: Option<usize>) -> Result<Step, ExecutionError> {
    vm.stack.push(Frame::Params(copy_params(&vm.params)));
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_pop(vm: &mut VM, current: usize, next: Option<usize>) -> Result<Step, ExecutionError> {
    if let Frame::Params(saved) = pop(vm, current, "Pop", "params")? {
        let result = std::mem::take(&mut vm.params);
        vm.params = into_params(json!({
            "result": JsonValue::Object(result),
            "params": JsonValue::Object(saved),
        }));
    }
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_let(vm: &mut VM, binding: &Binding, next: Option<usize>) -> Result<Step, ExecutionError> {
    let frame = match binding {
        Binding::Symbol { symbol, value } => {
            let mut bindings = Map::new();
            bindings.insert(symbol.clone(), deep_copy(value));
            Frame::Let(Some(bindings))
        }
        Binding::Empty => Frame::Let(Some(Map::new())),
        Binding::Mask => Frame::Let(None),
    };
    vm.stack.push(frame);
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_end(vm: &mut VM, current: usize, next: Option<usize>) -> Result<Step, ExecutionError> {
    pop(vm, current, "End", "let")?;
    vm.state = next;
    Ok(Step::Continue)
}

pub fn execute_task(
    vm: &mut VM,
    executor: &dyn TaskExecutor,
    current: usize,
    task: &Task,
    next: Option<usize>,
) -> Result<Step, ExecutionError> {
    vm.state = next;

    match task {
        // Inspection of the result happens on delivery
        Task::Action(action) => {
            return Ok(Step::Suspend {
                action: action.clone(),
            })
        }
        Task::Function(function) => execute_function(vm, executor, current, function),
        Task::Value(value) => vm.params = into_params(deep_copy(value)),
        Task::Identity => {}
    }

    vm.inspect();
    Ok(Step::Continue)
}

/* ===================== Functions ===================== */

fn execute_function(vm: &mut VM, executor: &dyn TaskExecutor, current: usize, function: &Function) {
    let (mut env, owners) = environment(&vm.stack);

    let outcome = match function {
        Function::Builtin(op) => builtins::evaluate(op, &vm.params, &mut env),
        Function::Exec(exec) => executor.evaluate(exec, &vm.params, &mut env),
    };

    write_back(&mut vm.stack, env, &owners);

    match outcome {
        Ok(Some(result)) => vm.params = into_params(deep_copy(&result)),
        Ok(None) => {}
        Err(e) => {
            error!(state = current, error = %e, "Function task raised an exception");
            vm.params = into_params(json!({
                "error": format!(
                    "An exception was caught at state {} (see log for details)",
                    current
                )
            }));
        }
    }
}

/// Bindings visible from the top of the stack, and the frame owning each
///
/// Walking down from the top, every mask boundary hides the next binding
/// frame below it; the innermost visible binding of a name wins.
pub fn environment(stack: &[Frame]) -> (Env, HashMap<String, usize>) {
    let mut env = Env::new();
    let mut owners = HashMap::new();
    let mut hidden = 0usize;

    for (i, frame) in stack.iter().enumerate().rev() {
        match frame {
            Frame::Let(None) => hidden += 1,
            Frame::Let(Some(_)) if hidden > 0 => hidden -= 1,
            Frame::Let(Some(bindings)) => {
                for (symbol, value) in bindings {
                    if !env.contains_key(symbol) {
                        env.insert(symbol.clone(), deep_copy(value));
                        owners.insert(symbol.clone(), i);
                    }
                }
            }
            Frame::Catch(_) | Frame::Params(_) => {}
        }
    }

    (env, owners)
}

/// Store bindings back into the frames that own them
fn write_back(stack: &mut [Frame], env: Env, owners: &HashMap<String, usize>) {
    for (symbol, value) in env {
        let Some(&i) = owners.get(&symbol) else {
            continue;
        };
        if let Some(Frame::Let(Some(bindings))) = stack.get_mut(i) {
            bindings.insert(symbol, value);
        }
    }
}
