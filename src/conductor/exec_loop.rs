//! Core execution loop
//!
//! `step()` executes one state; `run_until_suspended()` drives it until the
//! run needs an action result or ends.

use tracing::debug;

use super::errors::ExecutionError;
use super::executor::TaskExecutor;
use super::states::{
    execute_catch, execute_choice, execute_end, execute_let, execute_pop, execute_push,
    execute_task, execute_try,
};
use super::vm::{Step, VM};
use crate::compiler::StateKind;
use crate::value::{copy_params, Params};

/// Where a turn stopped
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Call `action` with `params`, then resume with its result
    Invoke { action: String, params: Params },
    /// The run ended with this result
    Complete(Params),
}

/* ===================== Public API ===================== */

/// Run until an action must be called or the run ends
pub fn run_until_suspended(
    vm: &mut VM,
    executor: &dyn TaskExecutor,
) -> Result<Outcome, ExecutionError> {
    loop {
        match step(vm, executor)? {
            Step::Continue => continue,
            Step::Suspend { action } => {
                return Ok(Outcome::Invoke {
                    action,
                    params: copy_params(&vm.params),
                })
            }
            Step::Done => return Ok(Outcome::Complete(copy_params(&vm.params))),
        }
    }
}

/// Execute one state
pub fn step(vm: &mut VM, executor: &dyn TaskExecutor) -> Result<Step, ExecutionError> {
    let Some(current) = vm.state else {
        return Ok(Step::Done);
    };
    let fsm = vm.fsm;
    let state = fsm
        .states
        .get(current)
        .ok_or(ExecutionError::MissingState(current))?;

    debug!(
        state = current,
        kind = state.kind.type_name(),
        path = state.path.as_deref().unwrap_or(""),
        "Entering state"
    );

    let next = state.next;
    match &state.kind {
        StateKind::Choice { then, otherwise } => execute_choice(vm, current, *then, *otherwise),
        StateKind::Try { handler } => execute_try(vm, *handler, next),
        StateKind::Catch => execute_catch(vm, current, next),
        StateKind::Push => execute_push(vm, next),
        StateKind::Pop => execute_pop(vm, current, next),
        StateKind::Let(binding) => execute_let(vm, binding, next),
        StateKind::End => execute_end(vm, current, next),
        StateKind::Task(task) => execute_task(vm, executor, current, task, next),
        StateKind::Pass => {
            vm.state = next;
            Ok(Step::Continue)
        }
    }
}
