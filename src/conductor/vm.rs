//! Interpreter state
//!
//! The VM holds everything a turn needs: the program, the current state,
//! the execution stack and the params flowing between states. The state and
//! the stack are what gets persisted between turns; params are handed to
//! the next action and come back as its result.

use serde_json::{json, Value as JsonValue};

use super::frames::Frame;
use crate::compiler::Fsm;
use crate::value::{into_params, is_error, Params};

/* ===================== VM ===================== */

#[derive(Debug, Clone)]
pub struct VM<'a> {
    pub fsm: &'a Fsm,

    /// Next state to execute; `None` once the run has ended
    pub state: Option<usize>,

    pub stack: Vec<Frame>,

    pub params: Params,
}

impl<'a> VM<'a> {
    /// Start a run at the program entry
    pub fn new(fsm: &'a Fsm, params: JsonValue) -> Self {
        VM {
            fsm,
            state: Some(fsm.entry),
            stack: vec![],
            params: into_params(params),
        }
    }

    /// Continue a suspended run with the result of the action it called
    pub fn resume(fsm: &'a Fsm, state: Option<usize>, stack: Vec<Frame>, result: JsonValue) -> Self {
        let mut vm = VM {
            fsm,
            state,
            stack,
            params: into_params(result),
        };
        vm.inspect();
        vm
    }

    /// Feed an action result back into a VM suspended in this turn
    pub fn deliver(&mut self, result: JsonValue) {
        self.params = into_params(result);
        self.inspect();
    }

    /// Error inspection
    ///
    /// A params object carrying `error` is stripped to that field and the
    /// stack unwinds to the nearest catch frame. With no catch frame left
    /// the run ends with the error as its result.
    pub fn inspect(&mut self) {
        if !is_error(&self.params) {
            return;
        }

        let error = self.params.remove("error").unwrap_or(JsonValue::Null);
        self.params = into_params(json!({ "error": error }));

        while let Some(frame) = self.stack.pop() {
            if let Frame::Catch(handler) = frame {
                self.state = Some(handler);
                return;
            }
        }
        self.state = None;
    }
}

/* ===================== Step Result ===================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// An action must be called; params hold its input
    Suspend { action: String },
    /// Run complete; params hold the result
    Done,
}
