//! # Compiler
//!
//! Flattens a lowered composition into a conductor program.
//!
//! Each primitive node expands to a fixed block of states. Blocks are built
//! with offsets relative to the state that holds them; a state whose `next`
//! is still unset falls through to whatever block is chained after it. A
//! final pass turns the offsets into absolute indices and appends the exit
//! state.

pub mod fsm;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::composer::{ComposerError, Kind, Node};
use crate::lowering;

pub use fsm::{Binding, Fsm, FsmError, State, StateKind, Task};

/* ===================== Errors ===================== */

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Combinator '{combinator}' at '{path}' must be lowered before compilation")]
    NotLowered {
        combinator: &'static str,
        path: String,
    },

    #[error("Combinator '{combinator}' at '{path}' is not supported by this conductor")]
    Unsupported {
        combinator: &'static str,
        path: String,
    },

    #[error("Conflicting definitions for action '{0}'")]
    ConflictingAction(String),

    #[error("Extension failed at '{path}': {message}")]
    Extension { path: String, message: String },

    #[error(transparent)]
    Composer(#[from] ComposerError),
}

/* ===================== Artifacts ===================== */

/// An action definition lifted out of the composition, to deploy alongside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideAction {
    pub name: String,
    pub action: Map<String, JsonValue>,
}

/// Compiled wrapper: program, source tree, compiler version, side table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compiled {
    pub composition: Fsm,
    pub ast: Node,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<SideAction>>,
}

/// Turns a fan-out node (`async`, `parallel`, `map`, `dynamic`) into a task
///
/// The returned task occupies a single state. An extension may register
/// side actions, for instance the fan-out service it delegates to.
pub trait ConcurrencyExtension: Send + Sync {
    fn compile(&self, node: &Node, side: &mut Vec<SideAction>) -> Result<Task, String>;
}

/// Compile a composition: label paths, lower, flatten
pub fn compile(node: &Node) -> Result<Compiled, CompileError> {
    compile_with(node, None)
}

pub fn compile_with(
    node: &Node,
    extension: Option<&dyn ConcurrencyExtension>,
) -> Result<Compiled, CompileError> {
    let lowered = lowering::lower(node.clone().labelled());

    let mut compiler = Compiler::new(extension);
    let composition = compiler.flatten(&lowered)?;

    debug!(
        states = composition.len(),
        actions = compiler.side.len(),
        "Compiled composition"
    );

    Ok(Compiled {
        composition,
        ast: node.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        actions: if compiler.side.is_empty() {
            None
        } else {
            Some(compiler.side)
        },
    })
}

/* ===================== Drafts ===================== */

#[derive(Debug, Clone)]
enum DraftKind {
    Choice { then: isize, otherwise: isize },
    Try { handler: isize },
    Catch,
    Push,
    Let(Binding),
    End,
    Task(Task),
    Pass,
}

#[derive(Debug, Clone)]
struct Draft {
    kind: DraftKind,
    next: Option<isize>,
    path: Option<String>,
}

type Block = Vec<Draft>;

fn draft(kind: DraftKind, path: &Option<String>) -> Block {
    vec![Draft {
        kind,
        next: None,
        path: path.clone(),
    }]
}

fn len(block: &Block) -> isize {
    block.len() as isize
}

/// Concatenate blocks, letting each block fall through to the next one
fn chain(blocks: Vec<Block>) -> Block {
    let mut out: Block = vec![];
    for block in blocks {
        if block.is_empty() {
            continue;
        }
        if let Some(last) = out.last_mut() {
            if last.next.is_none() {
                last.next = Some(1);
            }
        }
        out.extend(block);
    }
    out
}

/// Point the fall-through state of a block at `offset` from itself
fn jump(mut block: Block, offset: isize) -> Block {
    if let Some(last) = block.last_mut() {
        last.next = Some(offset);
    }
    block
}

/* ===================== Flattening ===================== */

struct Compiler<'a> {
    extension: Option<&'a dyn ConcurrencyExtension>,
    side: Vec<SideAction>,
    /// Sizes of the binding groups visible at the current point, innermost last
    groups: Vec<usize>,
}

impl<'a> Compiler<'a> {
    fn new(extension: Option<&'a dyn ConcurrencyExtension>) -> Self {
        Compiler {
            extension,
            side: vec![],
            groups: vec![],
        }
    }

    fn flatten(&mut self, root: &Node) -> Result<Fsm, CompileError> {
        let block = chain(vec![self.node(root)?, draft(DraftKind::Pass, &None)]);

        let states = block
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let at = |offset: isize| (i as isize + offset) as usize;
                let kind = match d.kind {
                    DraftKind::Choice { then, otherwise } => StateKind::Choice {
                        then: at(then),
                        otherwise: at(otherwise),
                    },
                    DraftKind::Try { handler } => StateKind::Try {
                        handler: at(handler),
                    },
                    DraftKind::Catch => StateKind::Catch,
                    DraftKind::Push => StateKind::Push,
                    DraftKind::Let(binding) => StateKind::Let(binding),
                    DraftKind::End => StateKind::End,
                    DraftKind::Task(task) => StateKind::Task(task),
                    DraftKind::Pass => StateKind::Pass,
                };
                State {
                    kind,
                    next: d.next.map(at),
                    path: d.path,
                }
            })
            .collect::<Vec<_>>();

        Ok(Fsm {
            entry: 0,
            exit: states.len() - 1,
            states,
        })
    }

    /// Compile one node; the result always holds at least one state
    fn node(&mut self, node: &Node) -> Result<Block, CompileError> {
        let block = self.expand(node)?;
        if block.is_empty() {
            return Ok(draft(DraftKind::Pass, &node.path));
        }
        Ok(block)
    }

    fn components(&mut self, components: &[Node]) -> Result<Block, CompileError> {
        let blocks = components
            .iter()
            .map(|c| self.node(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chain(blocks))
    }

    fn expand(&mut self, node: &Node) -> Result<Block, CompileError> {
        let path = &node.path;

        match &node.kind {
            Kind::Empty => Ok(draft(DraftKind::Task(Task::Identity), path)),

            Kind::Sequence { components } => Ok(chain(vec![
                draft(DraftKind::Pass, path),
                self.components(components)?,
            ])),

            Kind::Action { name, action } => {
                if let Some(definition) = action {
                    self.lift(name, definition)?;
                }
                Ok(draft(DraftKind::Task(Task::Action(name.clone())), path))
            }

            Kind::Function { function } => Ok(draft(
                DraftKind::Task(Task::Function(function.clone())),
                path,
            )),

            // [Try H][body][Catch] H:[finalizer]
            Kind::Finally { body, finalizer } => {
                let body = self.node(body)?;
                let finalizer = self.node(finalizer)?;
                Ok(chain(vec![
                    draft(
                        DraftKind::Try {
                            handler: len(&body) + 2,
                        },
                        path,
                    ),
                    body,
                    draft(DraftKind::Catch, path),
                    finalizer,
                ]))
            }

            // [Try H][body][Catch -> J] H:[handler] J:[Pass]
            Kind::Try { body, handler } => {
                let body = self.node(body)?;
                let handler = self.node(handler)?;
                let catch = jump(draft(DraftKind::Catch, path), len(&handler) + 1);
                Ok(chain(vec![
                    draft(
                        DraftKind::Try {
                            handler: len(&body) + 2,
                        },
                        path,
                    ),
                    body,
                    catch,
                    handler,
                    draft(DraftKind::Pass, path),
                ]))
            }

            Kind::Let {
                declarations,
                components,
            } => {
                let mut lets = declarations
                    .iter()
                    .map(|(symbol, value)| {
                        draft(
                            DraftKind::Let(Binding::Symbol {
                                symbol: symbol.clone(),
                                value: value.clone(),
                            }),
                            path,
                        )
                    })
                    .collect::<Vec<_>>();
                if lets.is_empty() {
                    lets.push(draft(DraftKind::Let(Binding::Empty), path));
                }

                // One frame per Let state
                let size = lets.len();
                self.groups.push(size);
                let body = self.components(components);
                self.groups.pop();

                let mut blocks = lets;
                blocks.push(body?);
                blocks.extend((0..size).map(|_| draft(DraftKind::End, path)));
                Ok(chain(blocks))
            }

            // One boundary frame per binding of the innermost visible group
            Kind::Mask { components } => {
                let hidden = self.groups.pop();
                let body = self.components(components);
                if let Some(size) = hidden {
                    self.groups.push(size);
                }

                let size = hidden.unwrap_or(1);
                let mut blocks = (0..size)
                    .map(|_| draft(DraftKind::Let(Binding::Mask), path))
                    .collect::<Vec<_>>();
                blocks.push(body?);
                blocks.extend((0..size).map(|_| draft(DraftKind::End, path)));
                Ok(chain(blocks))
            }

            // [Pass][test][Push][Choice] then:[consequent -> J] else:[alternate] J:[Pass]
            Kind::IfNosave {
                test,
                consequent,
                alternate,
            } => {
                let test = self.node(test)?;
                let alternate = self.node(alternate)?;
                let consequent = self.node(consequent)?;
                let consequent = jump(consequent, len(&alternate) + 1);
                let choice = draft(
                    DraftKind::Choice {
                        then: 1,
                        otherwise: 1 + len(&consequent),
                    },
                    path,
                );
                Ok(chain(vec![
                    draft(DraftKind::Pass, path),
                    test,
                    draft(DraftKind::Push, path),
                    choice,
                    consequent,
                    alternate,
                    draft(DraftKind::Pass, path),
                ]))
            }

            // [Pass] T:[test][Push][Choice] then:[body -> T] else: J:[Pass]
            Kind::WhileNosave { test, body } => {
                let test = self.node(test)?;
                let body = self.node(body)?;
                let back = -(len(&body) + 1 + len(&test));
                let choice = draft(
                    DraftKind::Choice {
                        then: 1,
                        otherwise: 1 + len(&body),
                    },
                    path,
                );
                Ok(chain(vec![
                    draft(DraftKind::Pass, path),
                    test,
                    draft(DraftKind::Push, path),
                    choice,
                    jump(body, back),
                    draft(DraftKind::Pass, path),
                ]))
            }

            // [Pass] B:[body][test][Push][Choice] then: B, else: [Pass]
            Kind::DowhileNosave { body, test } => {
                let body = self.node(body)?;
                let test = self.node(test)?;
                let choice = draft(
                    DraftKind::Choice {
                        then: -(len(&body) + len(&test) + 1),
                        otherwise: 1,
                    },
                    path,
                );
                Ok(chain(vec![
                    draft(DraftKind::Pass, path),
                    body,
                    test,
                    draft(DraftKind::Push, path),
                    choice,
                    draft(DraftKind::Pass, path),
                ]))
            }

            Kind::Async { .. } | Kind::Parallel { .. } | Kind::Map { .. } | Kind::Dynamic => {
                let combinator = node.combinator().name();
                let at = path.clone().unwrap_or_default();
                let Some(extension) = self.extension else {
                    return Err(CompileError::Unsupported {
                        combinator,
                        path: at,
                    });
                };
                let mut side = vec![];
                let task = extension
                    .compile(node, &mut side)
                    .map_err(|message| CompileError::Extension {
                        path: at,
                        message,
                    })?;
                for action in side {
                    self.lift(&action.name, &action.action)?;
                }
                Ok(draft(DraftKind::Task(task), path))
            }

            Kind::Literal { .. }
            | Kind::Value { .. }
            | Kind::If { .. }
            | Kind::While { .. }
            | Kind::Dowhile { .. }
            | Kind::Retain { .. }
            | Kind::RetainCatch { .. }
            | Kind::Merge { .. }
            | Kind::Repeat { .. }
            | Kind::Retry { .. } => Err(CompileError::NotLowered {
                combinator: node.combinator().name(),
                path: path.clone().unwrap_or_default(),
            }),
        }
    }

    /// Add an action definition to the side table
    fn lift(&mut self, name: &str, definition: &Map<String, JsonValue>) -> Result<(), CompileError> {
        match self.side.iter().find(|a| a.name == name) {
            Some(existing) if &existing.action == definition => Ok(()),
            Some(_) => Err(CompileError::ConflictingAction(name.to_string())),
            None => {
                self.side.push(SideAction {
                    name: name.to_string(),
                    action: definition.clone(),
                });
                Ok(())
            }
        }
    }
}
