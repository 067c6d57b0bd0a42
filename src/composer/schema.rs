//! Combinator table and argument validation
//!
//! Every combinator is bound to a fixed argument schema. [`build`] checks the
//! arguments against the schema, coerces them, and assembles the node with an
//! exhaustive match over [`Combinator`].

use serde_json::{Map, Value as JsonValue};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use super::errors::ComposerError;
use super::function::Function;
use super::node::{Kind, Node};
use crate::names;

/* ===================== Combinators ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    Empty,
    Seq,
    Sequence,
    Task,
    Action,
    Function,
    Literal,
    Value,
    If,
    IfNosave,
    While,
    WhileNosave,
    Dowhile,
    DowhileNosave,
    Try,
    Finally,
    Let,
    Mask,
    Retain,
    RetainCatch,
    Merge,
    Repeat,
    Retry,
    Async,
    Parallel,
    Par,
    Map,
    Dynamic,
}

/// Declared type of a positional argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// Child slot: node, function body, action name or null
    Task,
    /// Action name, canonicalized
    Name,
    /// Any JSON value
    Value,
    /// Non-null, non-array mapping
    Object,
    /// Non-negative integer
    Number,
    /// Function body
    Function,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub optional: bool,
}

const fn required(name: &'static str, ty: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        ty,
        optional: false,
    }
}

const fn optional(name: &'static str, ty: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        ty,
        optional: true,
    }
}

/// Positional arguments, then (optionally) a trailing list of children
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub args: &'static [ArgSpec],
    pub components: bool,
}

impl Combinator {
    pub const ALL: [Combinator; 28] = [
        Combinator::Empty,
        Combinator::Seq,
        Combinator::Sequence,
        Combinator::Task,
        Combinator::Action,
        Combinator::Function,
        Combinator::Literal,
        Combinator::Value,
        Combinator::If,
        Combinator::IfNosave,
        Combinator::While,
        Combinator::WhileNosave,
        Combinator::Dowhile,
        Combinator::DowhileNosave,
        Combinator::Try,
        Combinator::Finally,
        Combinator::Let,
        Combinator::Mask,
        Combinator::Retain,
        Combinator::RetainCatch,
        Combinator::Merge,
        Combinator::Repeat,
        Combinator::Retry,
        Combinator::Async,
        Combinator::Parallel,
        Combinator::Par,
        Combinator::Map,
        Combinator::Dynamic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Combinator::Empty => "empty",
            Combinator::Seq => "seq",
            Combinator::Sequence => "sequence",
            Combinator::Task => "task",
            Combinator::Action => "action",
            Combinator::Function => "function",
            Combinator::Literal => "literal",
            Combinator::Value => "value",
            Combinator::If => "if",
            Combinator::IfNosave => "if_nosave",
            Combinator::While => "while",
            Combinator::WhileNosave => "while_nosave",
            Combinator::Dowhile => "dowhile",
            Combinator::DowhileNosave => "dowhile_nosave",
            Combinator::Try => "try",
            Combinator::Finally => "finally",
            Combinator::Let => "let",
            Combinator::Mask => "mask",
            Combinator::Retain => "retain",
            Combinator::RetainCatch => "retain_catch",
            Combinator::Merge => "merge",
            Combinator::Repeat => "repeat",
            Combinator::Retry => "retry",
            Combinator::Async => "async",
            Combinator::Parallel => "parallel",
            Combinator::Par => "par",
            Combinator::Map => "map",
            Combinator::Dynamic => "dynamic",
        }
    }

    pub fn schema(self) -> Schema {
        use ArgType::*;

        const NONE: &[ArgSpec] = &[];
        const BRANCH: &[ArgSpec] = &[
            required("test", Task),
            required("consequent", Task),
            optional("alternate", Task),
        ];
        const LOOP: &[ArgSpec] = &[required("test", Task), required("body", Task)];
        const DO_LOOP: &[ArgSpec] = &[required("body", Task), required("test", Task)];
        const COUNTED: &[ArgSpec] = &[required("count", Number)];
        const TASK: &[ArgSpec] = &[required("task", Task)];
        const ACTION: &[ArgSpec] = &[required("name", Name), optional("action", Object)];
        const FUNCTION: &[ArgSpec] = &[required("function", Function)];
        const VALUE: &[ArgSpec] = &[required("value", Value)];
        const TRY: &[ArgSpec] = &[required("body", Task), required("handler", Task)];
        const FINALLY: &[ArgSpec] = &[required("body", Task), required("finalizer", Task)];
        const LET: &[ArgSpec] = &[required("declarations", Object)];

        let (args, components) = match self {
            Combinator::Empty | Combinator::Dynamic => (NONE, false),
            Combinator::Seq
            | Combinator::Sequence
            | Combinator::Mask
            | Combinator::Retain
            | Combinator::RetainCatch
            | Combinator::Merge
            | Combinator::Async
            | Combinator::Parallel
            | Combinator::Par
            | Combinator::Map => (NONE, true),
            Combinator::Task => (TASK, false),
            Combinator::Action => (ACTION, false),
            Combinator::Function => (FUNCTION, false),
            Combinator::Literal | Combinator::Value => (VALUE, false),
            Combinator::If | Combinator::IfNosave => (BRANCH, false),
            Combinator::While | Combinator::WhileNosave => (LOOP, false),
            Combinator::Dowhile | Combinator::DowhileNosave => (DO_LOOP, false),
            Combinator::Try => (TRY, false),
            Combinator::Finally => (FINALLY, false),
            Combinator::Let => (LET, true),
            Combinator::Repeat | Combinator::Retry => (COUNTED, true),
        };

        Schema { args, components }
    }

    /// Derived combinators are rewritten into primitives before compilation
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            Combinator::If
                | Combinator::While
                | Combinator::Dowhile
                | Combinator::Repeat
                | Combinator::Retry
                | Combinator::Retain
                | Combinator::RetainCatch
                | Combinator::Merge
                | Combinator::Literal
                | Combinator::Value
        )
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Combinator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Combinator::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("Unknown combinator '{}'", s))
    }
}

/* ===================== Arguments ===================== */

/// A combinator argument before validation
#[derive(Debug, Clone)]
pub enum Arg {
    Node(Node),
    Function(Function),
    Json(JsonValue),
}

impl From<Node> for Arg {
    fn from(node: Node) -> Self {
        Arg::Node(node)
    }
}

impl From<Function> for Arg {
    fn from(function: Function) -> Self {
        Arg::Function(function)
    }
}

impl From<JsonValue> for Arg {
    fn from(value: JsonValue) -> Self {
        Arg::Json(value)
    }
}

impl From<&str> for Arg {
    fn from(name: &str) -> Self {
        Arg::Json(JsonValue::String(name.to_string()))
    }
}

impl From<String> for Arg {
    fn from(name: String) -> Self {
        Arg::Json(JsonValue::String(name))
    }
}

impl From<u64> for Arg {
    fn from(n: u64) -> Self {
        Arg::Json(JsonValue::from(n))
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Arg::Json(JsonValue::Null))
    }
}

/// A validated argument
enum Slot {
    Task(Node),
    Name(String),
    Value(JsonValue),
    Object(Map<String, JsonValue>),
    Number(u64),
    Function(Function),
    Absent,
}

/* ===================== Building ===================== */

/// Build a node from a combinator and its positional arguments
pub fn build(combinator: Combinator, args: Vec<Arg>) -> Result<Node, ComposerError> {
    let schema = combinator.schema();

    if !schema.components && args.len() > schema.args.len() {
        return Err(ComposerError::Validation {
            combinator: combinator.name(),
            arg: format!("#{}", schema.args.len() + 1),
            message: format!(
                "too many arguments: expected at most {}, got {}",
                schema.args.len(),
                args.len()
            ),
        });
    }

    let mut args: VecDeque<Arg> = args.into();
    let mut slots = VecDeque::with_capacity(schema.args.len());
    for spec in schema.args {
        let slot = match args.pop_front() {
            Some(arg) => check(combinator, spec, arg)?,
            None if spec.optional => Slot::Absent,
            None => {
                return Err(ComposerError::Validation {
                    combinator: combinator.name(),
                    arg: spec.name.to_string(),
                    message: "missing required argument".to_string(),
                })
            }
        };
        slots.push_back(slot);
    }

    let components = args
        .into_iter()
        .enumerate()
        .map(|(i, arg)| coerce_task(combinator, &format!("components[{}]", i), arg))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(assemble(combinator, slots, components))
}

fn check(combinator: Combinator, spec: &ArgSpec, arg: Arg) -> Result<Slot, ComposerError> {
    let type_error = |message: &str| ComposerError::Type {
        combinator: combinator.name(),
        arg: spec.name.to_string(),
        message: message.to_string(),
    };

    match spec.ty {
        ArgType::Task => coerce_task(combinator, spec.name, arg).map(Slot::Task),

        ArgType::Name => match arg {
            Arg::Json(JsonValue::String(name)) => names::fqn(&name)
                .map(Slot::Name)
                .map_err(|source| ComposerError::Name {
                    combinator: combinator.name(),
                    arg: spec.name.to_string(),
                    source,
                }),
            _ => Err(type_error("expected an action name")),
        },

        ArgType::Value => match arg {
            Arg::Json(value) => Ok(Slot::Value(value)),
            _ => Err(type_error("expected a JSON value, not a function or composition")),
        },

        ArgType::Object => match arg {
            Arg::Json(JsonValue::Object(map)) => Ok(Slot::Object(map)),
            Arg::Json(JsonValue::Null) if spec.optional => Ok(Slot::Absent),
            _ => Err(ComposerError::Validation {
                combinator: combinator.name(),
                arg: spec.name.to_string(),
                message: "expected an object".to_string(),
            }),
        },

        ArgType::Number => match arg {
            Arg::Json(JsonValue::Number(n)) => n.as_u64().map(Slot::Number).ok_or_else(|| {
                ComposerError::Validation {
                    combinator: combinator.name(),
                    arg: spec.name.to_string(),
                    message: format!("expected a non-negative integer, got {}", n),
                }
            }),
            _ => Err(ComposerError::Validation {
                combinator: combinator.name(),
                arg: spec.name.to_string(),
                message: "expected a number".to_string(),
            }),
        },

        ArgType::Function => match arg {
            Arg::Function(function) => Ok(Slot::Function(function)),
            Arg::Json(value) => serde_json::from_value(value)
                .map(Slot::Function)
                .map_err(|e| type_error(&format!("expected a function body: {}", e))),
            Arg::Node(_) => Err(type_error("expected a function body, not a composition")),
        },
    }
}

/// Coerce an untyped child into a node
fn coerce_task(combinator: Combinator, arg: &str, task: Arg) -> Result<Node, ComposerError> {
    match task {
        Arg::Node(node) => Ok(node),
        Arg::Function(function) => Ok(Node::new(Kind::Function { function })),
        Arg::Json(JsonValue::Null) => Ok(Node::empty()),
        Arg::Json(JsonValue::String(name)) => names::fqn(&name)
            .map(|name| Node::new(Kind::Action { name, action: None }))
            .map_err(|source| ComposerError::Name {
                combinator: combinator.name(),
                arg: arg.to_string(),
                source,
            }),
        Arg::Json(other) => Err(ComposerError::Type {
            combinator: combinator.name(),
            arg: arg.to_string(),
            message: format!("cannot convert {} to a composition", other),
        }),
    }
}

fn assemble(combinator: Combinator, mut slots: VecDeque<Slot>, components: Vec<Node>) -> Node {
    let mut next = || slots.pop_front().unwrap_or(Slot::Absent);

    let kind = match combinator {
        Combinator::Empty => Kind::Empty,
        Combinator::Dynamic => Kind::Dynamic,
        Combinator::Seq | Combinator::Sequence => Kind::Sequence { components },
        Combinator::Task => return next().into_node(),
        Combinator::Action => Kind::Action {
            name: next().into_name(),
            action: next().into_object(),
        },
        Combinator::Function => Kind::Function {
            function: next().into_function(),
        },
        Combinator::Literal => Kind::Literal {
            value: next().into_value(),
        },
        Combinator::Value => Kind::Value {
            value: next().into_value(),
        },
        Combinator::If => Kind::If {
            test: Box::new(next().into_node()),
            consequent: Box::new(next().into_node()),
            alternate: Box::new(next().into_node()),
        },
        Combinator::IfNosave => Kind::IfNosave {
            test: Box::new(next().into_node()),
            consequent: Box::new(next().into_node()),
            alternate: Box::new(next().into_node()),
        },
        Combinator::While => Kind::While {
            test: Box::new(next().into_node()),
            body: Box::new(next().into_node()),
        },
        Combinator::WhileNosave => Kind::WhileNosave {
            test: Box::new(next().into_node()),
            body: Box::new(next().into_node()),
        },
        Combinator::Dowhile => Kind::Dowhile {
            body: Box::new(next().into_node()),
            test: Box::new(next().into_node()),
        },
        Combinator::DowhileNosave => Kind::DowhileNosave {
            body: Box::new(next().into_node()),
            test: Box::new(next().into_node()),
        },
        Combinator::Try => Kind::Try {
            body: Box::new(next().into_node()),
            handler: Box::new(next().into_node()),
        },
        Combinator::Finally => Kind::Finally {
            body: Box::new(next().into_node()),
            finalizer: Box::new(next().into_node()),
        },
        Combinator::Let => Kind::Let {
            declarations: next().into_object().unwrap_or_default(),
            components,
        },
        Combinator::Mask => Kind::Mask { components },
        Combinator::Retain => Kind::Retain { components },
        Combinator::RetainCatch => Kind::RetainCatch { components },
        Combinator::Merge => Kind::Merge { components },
        Combinator::Repeat => Kind::Repeat {
            count: next().into_number(),
            components,
        },
        Combinator::Retry => Kind::Retry {
            count: next().into_number(),
            components,
        },
        Combinator::Async => Kind::Async { components },
        Combinator::Parallel | Combinator::Par => Kind::Parallel { components },
        Combinator::Map => Kind::Map { components },
    };

    Node::new(kind)
}

// The schema check guarantees each slot's variant; absent optional slots
// take the neutral value for their type.
impl Slot {
    fn into_node(self) -> Node {
        match self {
            Slot::Task(node) => node,
            _ => Node::empty(),
        }
    }

    fn into_name(self) -> String {
        match self {
            Slot::Name(name) => name,
            _ => unreachable!("name argument is required by the schema"),
        }
    }

    fn into_object(self) -> Option<Map<String, JsonValue>> {
        match self {
            Slot::Object(map) => Some(map),
            _ => None,
        }
    }

    fn into_value(self) -> JsonValue {
        match self {
            Slot::Value(value) => value,
            _ => JsonValue::Null,
        }
    }

    fn into_number(self) -> u64 {
        match self {
            Slot::Number(n) => n,
            _ => 0,
        }
    }

    fn into_function(self) -> Function {
        match self {
            Slot::Function(function) => function,
            _ => unreachable!("function argument is required by the schema"),
        }
    }
}
