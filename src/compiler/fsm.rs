//! Conductor program: the flat state machine and its JSON form
//!
//! JSON shape:
//!
//! ```json
//! {"Entry": "0", "Exit": "7", "States": {"0": {"Type": "Pass", "Next": "1"}, ...}}
//! ```
//!
//! In memory, states are a vector and every reference is an index into it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::composer::Function;

/* ===================== Program ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FsmJson", into = "FsmJson")]
pub struct Fsm {
    pub entry: usize,
    pub exit: usize,
    pub states: Vec<State>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub kind: StateKind,
    /// Successor; `None` only on the exit state and on Choice states
    pub next: Option<usize>,
    /// Structural path of the node this state was compiled from
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateKind {
    Choice { then: usize, otherwise: usize },
    Try { handler: usize },
    Catch,
    Push,
    Pop,
    Let(Binding),
    End,
    Task(Task),
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Symbol { symbol: String, value: JsonValue },
    /// Frame with no bindings, from a `let` without declarations
    Empty,
    /// Boundary frame hiding one binding below it
    Mask,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Action(String),
    Function(Function),
    Value(JsonValue),
    /// Pass params through unchanged
    Identity,
}

impl StateKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StateKind::Choice { .. } => "Choice",
            StateKind::Try { .. } => "Try",
            StateKind::Catch => "Catch",
            StateKind::Push => "Push",
            StateKind::Pop => "Pop",
            StateKind::Let(_) => "Let",
            StateKind::End => "End",
            StateKind::Task(_) => "Task",
            StateKind::Pass => "Pass",
        }
    }
}

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("Malformed conductor program: {0}")]
    Malformed(String),

    #[error("State '{state}' refers to unknown state '{target}'")]
    UnknownState { state: String, target: String },

    #[error("State '{state}' of type {kind} is missing field '{field}'")]
    MissingField {
        state: String,
        kind: String,
        field: &'static str,
    },

    #[error("State '{0}' has no Next and is not the exit state")]
    MissingNext(String),
}

impl Fsm {
    /// Load and validate a program from its JSON form
    pub fn from_json(value: JsonValue) -> Result<Self, FsmError> {
        let json: FsmJson =
            serde_json::from_value(value).map_err(|e| FsmError::Malformed(e.to_string()))?;
        Fsm::try_from(json)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(FsmJson::from(self.clone())).unwrap_or(JsonValue::Null)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/* ===================== JSON form ===================== */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FsmJson {
    pub entry: String,
    pub exit: String,
    pub states: BTreeMap<String, StateRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateRecord {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<String>,
    #[serde(rename = "Else", default, skip_serializing_if = "Option::is_none")]
    pub else_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// `Some(Null)` is a literal null, `None` is an absent field
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mask: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StateRecord {
    fn new(kind: &str) -> Self {
        StateRecord {
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn name(index: usize) -> String {
    index.to_string()
}

impl From<Fsm> for FsmJson {
    fn from(fsm: Fsm) -> Self {
        let states = fsm
            .states
            .into_iter()
            .enumerate()
            .map(|(i, state)| (name(i), StateRecord::from(state)))
            .collect();

        FsmJson {
            entry: name(fsm.entry),
            exit: name(fsm.exit),
            states,
        }
    }
}

impl From<State> for StateRecord {
    fn from(state: State) -> Self {
        let mut record = StateRecord::new(state.kind.type_name());
        record.next = state.next.map(name);
        record.path = state.path;

        match state.kind {
            StateKind::Choice { then, otherwise } => {
                record.then = Some(name(then));
                record.else_ = Some(name(otherwise));
            }
            StateKind::Try { handler } => record.handler = Some(name(handler)),
            StateKind::Let(Binding::Symbol { symbol, value }) => {
                record.symbol = Some(symbol);
                record.value = Some(value);
            }
            StateKind::Let(Binding::Empty) => {}
            StateKind::Let(Binding::Mask) => record.mask = true,
            StateKind::Task(Task::Action(action)) => record.action = Some(action),
            StateKind::Task(Task::Function(function)) => record.function = Some(function),
            StateKind::Task(Task::Value(value)) => record.value = Some(value),
            StateKind::Task(Task::Identity)
            | StateKind::Catch
            | StateKind::Push
            | StateKind::Pop
            | StateKind::End
            | StateKind::Pass => {}
        }

        record
    }
}

impl TryFrom<FsmJson> for Fsm {
    type Error = FsmError;

    fn try_from(json: FsmJson) -> Result<Self, Self::Error> {
        // Decimal names sort numerically under (length, name)
        let mut names: Vec<&String> = json.states.keys().collect();
        names.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        let index: BTreeMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let resolve = |state: &str, target: &str| -> Result<usize, FsmError> {
            index
                .get(target)
                .copied()
                .ok_or_else(|| FsmError::UnknownState {
                    state: state.to_string(),
                    target: target.to_string(),
                })
        };

        let entry = resolve("Entry", &json.entry)?;
        let exit = resolve("Exit", &json.exit)?;

        let mut states = Vec::with_capacity(names.len());
        for state_name in &names {
            let record = &json.states[*state_name];
            let missing = |field: &'static str| FsmError::MissingField {
                state: state_name.to_string(),
                kind: record.kind.clone(),
                field,
            };
            let target = |field: &'static str, value: &Option<String>| -> Result<usize, FsmError> {
                match value {
                    Some(target) => resolve(state_name.as_str(), target),
                    None => Err(missing(field)),
                }
            };

            let kind = match record.kind.as_str() {
                "Choice" => StateKind::Choice {
                    then: target("Then", &record.then)?,
                    otherwise: target("Else", &record.else_)?,
                },
                "Try" => StateKind::Try {
                    handler: target("Handler", &record.handler)?,
                },
                "Catch" => StateKind::Catch,
                "Push" => StateKind::Push,
                "Pop" => StateKind::Pop,
                "Let" if record.mask => StateKind::Let(Binding::Mask),
                "Let" if record.symbol.is_none() && record.value.is_none() => {
                    StateKind::Let(Binding::Empty)
                }
                "Let" => StateKind::Let(Binding::Symbol {
                    symbol: record.symbol.clone().ok_or_else(|| missing("Symbol"))?,
                    value: record.value.clone().ok_or_else(|| missing("Value"))?,
                }),
                "End" => StateKind::End,
                "Task" => StateKind::Task(match (&record.action, &record.function, &record.value) {
                    (Some(action), _, _) => Task::Action(action.clone()),
                    (None, Some(function), _) => Task::Function(function.clone()),
                    (None, None, Some(value)) => Task::Value(value.clone()),
                    (None, None, None) => Task::Identity,
                }),
                "Pass" => StateKind::Pass,
                other => {
                    return Err(FsmError::Malformed(format!(
                        "State '{}' has unknown type '{}'",
                        state_name, other
                    )))
                }
            };

            let next = match &record.next {
                Some(next) => Some(resolve(state_name.as_str(), next)?),
                None => None,
            };
            let i = states.len();
            if next.is_none() && i != exit && !matches!(kind, StateKind::Choice { .. }) {
                return Err(FsmError::MissingNext(state_name.to_string()));
            }

            states.push(State {
                kind,
                next,
                path: record.path.clone(),
            });
        }

        Ok(Fsm {
            entry,
            exit,
            states,
        })
    }
}
