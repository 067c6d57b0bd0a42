//! Composition tree

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::errors::ComposerError;
use super::function::Function;
use super::schema::Combinator;
use crate::names;

/// A node of the composition tree
///
/// `path` is the structural path from the tree root (`""` for the root,
/// `.body`, `[2]`, ...). It is assigned by [`Node::labelled`] and is only used
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: Kind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Node kind and kind-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kind {
    /// Identity task: passes params through, re-raises a pending error
    Empty,
    Sequence {
        components: Vec<Node>,
    },
    Action {
        name: String,
        /// Optional inline definition, deployed alongside the composition
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<Map<String, JsonValue>>,
    },
    Function {
        function: Function,
    },
    Literal {
        value: JsonValue,
    },
    Value {
        value: JsonValue,
    },
    If {
        test: Box<Node>,
        consequent: Box<Node>,
        #[serde(default)]
        alternate: Box<Node>,
    },
    IfNosave {
        test: Box<Node>,
        consequent: Box<Node>,
        #[serde(default)]
        alternate: Box<Node>,
    },
    While {
        test: Box<Node>,
        body: Box<Node>,
    },
    WhileNosave {
        test: Box<Node>,
        body: Box<Node>,
    },
    Dowhile {
        body: Box<Node>,
        test: Box<Node>,
    },
    DowhileNosave {
        body: Box<Node>,
        test: Box<Node>,
    },
    Try {
        body: Box<Node>,
        handler: Box<Node>,
    },
    Finally {
        body: Box<Node>,
        finalizer: Box<Node>,
    },
    Let {
        declarations: Map<String, JsonValue>,
        components: Vec<Node>,
    },
    Mask {
        components: Vec<Node>,
    },
    Retain {
        components: Vec<Node>,
    },
    RetainCatch {
        components: Vec<Node>,
    },
    Merge {
        components: Vec<Node>,
    },
    Repeat {
        count: u64,
        components: Vec<Node>,
    },
    Retry {
        count: u64,
        components: Vec<Node>,
    },
    Async {
        components: Vec<Node>,
    },
    Parallel {
        components: Vec<Node>,
    },
    Map {
        components: Vec<Node>,
    },
    Dynamic,
}

impl Default for Node {
    fn default() -> Self {
        Node::empty()
    }
}

impl Node {
    pub fn new(kind: Kind) -> Self {
        Node { kind, path: None }
    }

    pub fn empty() -> Self {
        Node::new(Kind::Empty)
    }

    /// Combinator this node was built from
    pub fn combinator(&self) -> Combinator {
        match &self.kind {
            Kind::Empty => Combinator::Empty,
            Kind::Sequence { .. } => Combinator::Sequence,
            Kind::Action { .. } => Combinator::Action,
            Kind::Function { .. } => Combinator::Function,
            Kind::Literal { .. } => Combinator::Literal,
            Kind::Value { .. } => Combinator::Value,
            Kind::If { .. } => Combinator::If,
            Kind::IfNosave { .. } => Combinator::IfNosave,
            Kind::While { .. } => Combinator::While,
            Kind::WhileNosave { .. } => Combinator::WhileNosave,
            Kind::Dowhile { .. } => Combinator::Dowhile,
            Kind::DowhileNosave { .. } => Combinator::DowhileNosave,
            Kind::Try { .. } => Combinator::Try,
            Kind::Finally { .. } => Combinator::Finally,
            Kind::Let { .. } => Combinator::Let,
            Kind::Mask { .. } => Combinator::Mask,
            Kind::Retain { .. } => Combinator::Retain,
            Kind::RetainCatch { .. } => Combinator::RetainCatch,
            Kind::Merge { .. } => Combinator::Merge,
            Kind::Repeat { .. } => Combinator::Repeat,
            Kind::Retry { .. } => Combinator::Retry,
            Kind::Async { .. } => Combinator::Async,
            Kind::Parallel { .. } => Combinator::Parallel,
            Kind::Map { .. } => Combinator::Map,
            Kind::Dynamic => Combinator::Dynamic,
        }
    }

    /// Direct children, each with the path segment that leads to it
    pub fn children_mut(&mut self) -> Vec<(String, &mut Node)> {
        fn field<'a>(name: &str, node: &'a mut Node) -> (String, &'a mut Node) {
            (format!(".{}", name), node)
        }
        fn indexed(components: &mut [Node]) -> Vec<(String, &mut Node)> {
            components
                .iter_mut()
                .enumerate()
                .map(|(i, node)| (format!("[{}]", i), node))
                .collect()
        }

        match &mut self.kind {
            Kind::Empty
            | Kind::Action { .. }
            | Kind::Function { .. }
            | Kind::Literal { .. }
            | Kind::Value { .. }
            | Kind::Dynamic => vec![],

            Kind::If {
                test,
                consequent,
                alternate,
            }
            | Kind::IfNosave {
                test,
                consequent,
                alternate,
            } => vec![
                field("test", test),
                field("consequent", consequent),
                field("alternate", alternate),
            ],

            Kind::While { test, body } | Kind::WhileNosave { test, body } => {
                vec![field("test", test), field("body", body)]
            }

            Kind::Dowhile { body, test } | Kind::DowhileNosave { body, test } => {
                vec![field("body", body), field("test", test)]
            }

            Kind::Try { body, handler } => vec![field("body", body), field("handler", handler)],

            Kind::Finally { body, finalizer } => {
                vec![field("body", body), field("finalizer", finalizer)]
            }

            Kind::Sequence { components }
            | Kind::Let { components, .. }
            | Kind::Mask { components }
            | Kind::Retain { components }
            | Kind::RetainCatch { components }
            | Kind::Merge { components }
            | Kind::Repeat { components, .. }
            | Kind::Retry { components, .. }
            | Kind::Async { components }
            | Kind::Parallel { components }
            | Kind::Map { components } => indexed(components),
        }
    }

    /// Assign structural paths to this node (as the root) and every descendant
    pub fn labelled(mut self) -> Self {
        self.label("");
        self
    }

    fn label(&mut self, path: &str) {
        self.path = Some(path.to_string());
        for (segment, child) in self.children_mut() {
            child.label(&format!("{}{}", path, segment));
        }
    }

    /// Read a composition from its JSON form and re-validate it
    ///
    /// Action names are canonicalized, exactly as the combinator
    /// constructors do.
    pub fn from_json(value: JsonValue) -> Result<Self, ComposerError> {
        let mut node: Node = serde_json::from_value(value)
            .map_err(|e| ComposerError::Malformed(e.to_string()))?;
        node.validate()?;
        Ok(node)
    }

    fn validate(&mut self) -> Result<(), ComposerError> {
        if let Kind::Action { name, .. } = &mut self.kind {
            *name = names::fqn(name).map_err(|source| ComposerError::Name {
                combinator: Combinator::Action.name(),
                arg: "name".to_string(),
                source,
            })?;
        }
        for (_, child) in self.children_mut() {
            child.validate()?;
        }
        Ok(())
    }
}
