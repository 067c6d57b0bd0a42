//! Typed constructors, one per combinator
//!
//! All of them go through [`build`], so arguments get the same checks whether
//! a composition is written in Rust or read from a combinator table.

use serde_json::Value as JsonValue;

use super::errors::ComposerError;
use super::function::Function;
use super::node::Node;
use super::schema::{build, Arg, Combinator};

type Result<T> = std::result::Result<T, ComposerError>;

fn with_components<I>(combinator: Combinator, mut args: Vec<Arg>, components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    args.extend(components.into_iter().map(Into::into));
    build(combinator, args)
}

/// Coerce a node, function body, action name or null into a node
pub fn task(task: impl Into<Arg>) -> Result<Node> {
    build(Combinator::Task, vec![task.into()])
}

pub fn empty() -> Node {
    Node::empty()
}

pub fn seq<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Seq, vec![], components)
}

pub fn sequence<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Sequence, vec![], components)
}

pub fn action(name: &str) -> Result<Node> {
    build(Combinator::Action, vec![name.into()])
}

/// Action reference with an inline definition to deploy alongside
pub fn action_with(name: &str, definition: JsonValue) -> Result<Node> {
    build(Combinator::Action, vec![name.into(), definition.into()])
}

pub fn function(function: impl Into<Function>) -> Result<Node> {
    build(Combinator::Function, vec![Arg::Function(function.into())])
}

pub fn literal(value: JsonValue) -> Result<Node> {
    build(Combinator::Literal, vec![value.into()])
}

pub fn value(value: JsonValue) -> Result<Node> {
    build(Combinator::Value, vec![value.into()])
}

pub fn if_(
    test: impl Into<Arg>,
    consequent: impl Into<Arg>,
    alternate: impl Into<Arg>,
) -> Result<Node> {
    build(
        Combinator::If,
        vec![test.into(), consequent.into(), alternate.into()],
    )
}

pub fn if_nosave(
    test: impl Into<Arg>,
    consequent: impl Into<Arg>,
    alternate: impl Into<Arg>,
) -> Result<Node> {
    build(
        Combinator::IfNosave,
        vec![test.into(), consequent.into(), alternate.into()],
    )
}

pub fn while_(test: impl Into<Arg>, body: impl Into<Arg>) -> Result<Node> {
    build(Combinator::While, vec![test.into(), body.into()])
}

pub fn while_nosave(test: impl Into<Arg>, body: impl Into<Arg>) -> Result<Node> {
    build(Combinator::WhileNosave, vec![test.into(), body.into()])
}

pub fn dowhile(body: impl Into<Arg>, test: impl Into<Arg>) -> Result<Node> {
    build(Combinator::Dowhile, vec![body.into(), test.into()])
}

pub fn dowhile_nosave(body: impl Into<Arg>, test: impl Into<Arg>) -> Result<Node> {
    build(Combinator::DowhileNosave, vec![body.into(), test.into()])
}

pub fn try_(body: impl Into<Arg>, handler: impl Into<Arg>) -> Result<Node> {
    build(Combinator::Try, vec![body.into(), handler.into()])
}

pub fn finally(body: impl Into<Arg>, finalizer: impl Into<Arg>) -> Result<Node> {
    build(Combinator::Finally, vec![body.into(), finalizer.into()])
}

pub fn let_<I>(declarations: JsonValue, components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Let, vec![declarations.into()], components)
}

pub fn mask<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Mask, vec![], components)
}

pub fn retain<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Retain, vec![], components)
}

pub fn retain_catch<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::RetainCatch, vec![], components)
}

pub fn merge<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Merge, vec![], components)
}

pub fn repeat<I>(count: u64, components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Repeat, vec![count.into()], components)
}

pub fn retry<I>(count: u64, components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Retry, vec![count.into()], components)
}

pub fn async_<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Async, vec![], components)
}

pub fn parallel<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Parallel, vec![], components)
}

pub fn par<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Par, vec![], components)
}

pub fn map<I>(components: I) -> Result<Node>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    with_components(Combinator::Map, vec![], components)
}

pub fn dynamic() -> Result<Node> {
    build(Combinator::Dynamic, vec![])
}
