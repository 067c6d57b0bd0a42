//! # Lowering
//!
//! Rewrites derived combinators into the primitive set the compiler
//! understands. Rewrites are applied at a node until it is primitive, then
//! recursively to its children, so a rule may produce further derived kinds.
//! The rewritten node keeps the structural path of the node it replaces;
//! generated helper nodes carry no path.

use serde_json::{json, Map, Value as JsonValue};

use crate::composer::{Builtin, Combinator, Function, Kind, Node};


/// Symbol bound by the params-preserving rewrites
const PARAMS: &str = "params";

/// Lower every derived combinator
pub fn lower(node: Node) -> Node {
    lower_only(node, &[])
}

/// Lower only the listed derived combinators; an empty list lowers all of them
pub fn lower_only(node: Node, kinds: &[Combinator]) -> Node {
    let selected = |c: Combinator| c.is_derived() && (kinds.is_empty() || kinds.contains(&c));
    lower_with(node, &selected)
}

fn lower_with(mut node: Node, selected: &dyn Fn(Combinator) -> bool) -> Node {
    while selected(node.combinator()) {
        let path = node.path.take();
        node = rewrite(node.kind);
        node.path = path;
    }

    for (_, child) in node.children_mut() {
        let owned = std::mem::take(child);
        *child = lower_with(owned, selected);
    }

    node
}

/* ===================== Node shorthands ===================== */

fn node(kind: Kind) -> Node {
    Node::new(kind)
}

fn builtin(op: Builtin) -> Node {
    node(Kind::Function {
        function: Function::Builtin(op),
    })
}

fn capture(symbol: &str) -> Node {
    builtin(Builtin::Capture {
        symbol: symbol.to_string(),
    })
}

fn get(symbol: &str) -> Node {
    builtin(Builtin::Get {
        symbol: symbol.to_string(),
    })
}

fn seq(components: Vec<Node>) -> Node {
    node(Kind::Sequence { components })
}

fn mask(components: Vec<Node>) -> Node {
    node(Kind::Mask { components })
}

fn finally(body: Node, finalizer: Node) -> Node {
    node(Kind::Finally {
        body: Box::new(body),
        finalizer: Box::new(finalizer),
    })
}

fn let_(symbol: &str, value: JsonValue, components: Vec<Node>) -> Node {
    let mut declarations = Map::new();
    declarations.insert(symbol.to_string(), value);
    node(Kind::Let {
        declarations,
        components,
    })
}

/// `let({params: null}, finally(capture params, body))`
fn saving_params(body: Node) -> Node {
    let_(PARAMS, JsonValue::Null, vec![finally(capture(PARAMS), body)])
}

fn retain(components: Vec<Node>) -> Node {
    node(Kind::Retain { components })
}

/* ===================== Rewrite rules ===================== */

/// One rewrite step for a derived kind
fn rewrite(kind: Kind) -> Node {
    match kind {
        Kind::Literal { value } | Kind::Value { value } => {
            let_("value", value, vec![get("value")])
        }

        Kind::Retain { components } => let_(
            PARAMS,
            JsonValue::Null,
            vec![finally(
                capture(PARAMS),
                seq(vec![
                    mask(components),
                    builtin(Builtin::Retain {
                        symbol: PARAMS.to_string(),
                    }),
                ]),
            )],
        ),

        Kind::RetainCatch { components } => seq(vec![
            retain(vec![finally(
                seq(components),
                builtin(Builtin::Wrap {
                    field: "result".to_string(),
                }),
            )]),
            builtin(Builtin::UnwrapResult),
        ]),

        Kind::If {
            test,
            consequent,
            alternate,
        } => saving_params(node(Kind::IfNosave {
            test: Box::new(mask(vec![*test])),
            consequent: Box::new(finally(get(PARAMS), mask(vec![*consequent]))),
            alternate: Box::new(finally(get(PARAMS), mask(vec![*alternate]))),
        })),

        Kind::While { test, body } => saving_params(seq(vec![
            node(Kind::WhileNosave {
                test: Box::new(mask(vec![*test])),
                body: Box::new(finally(
                    get(PARAMS),
                    seq(vec![mask(vec![*body]), capture(PARAMS)]),
                )),
            }),
            get(PARAMS),
        ])),

        Kind::Dowhile { body, test } => saving_params(seq(vec![
            node(Kind::DowhileNosave {
                body: Box::new(finally(
                    get(PARAMS),
                    seq(vec![mask(vec![*body]), capture(PARAMS)]),
                )),
                test: Box::new(mask(vec![*test])),
            }),
            get(PARAMS),
        ])),

        Kind::Repeat { count, components } => let_(
            "count",
            json!(count),
            vec![node(Kind::While {
                test: Box::new(builtin(Builtin::CountDown {
                    symbol: "count".to_string(),
                })),
                body: Box::new(mask(components)),
            })],
        ),

        Kind::Retry { count, components } => let_(
            "count",
            json!(count),
            vec![
                builtin(Builtin::Wrap {
                    field: PARAMS.to_string(),
                }),
                node(Kind::Dowhile {
                    body: Box::new(finally(
                        builtin(Builtin::Field {
                            field: PARAMS.to_string(),
                        }),
                        mask(vec![node(Kind::RetainCatch { components })]),
                    )),
                    test: Box::new(builtin(Builtin::RetryCheck {
                        symbol: "count".to_string(),
                    })),
                }),
                builtin(Builtin::Field {
                    field: "result".to_string(),
                }),
            ],
        ),

        Kind::Merge { components } => seq(vec![retain(components), builtin(Builtin::Merge)]),

        primitive => node(primitive),
    }
}
