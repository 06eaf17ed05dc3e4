//! Graph Builders
//!
//! `applyN` wires a function of `N` cells into the graph and returns the cell
//! that will receive its result. Nothing runs at build time: the stage is
//! posted to its context once every input is ready (immediately, for
//! `apply0`).
//!
//! The target context is explicit. Passing `None` inherits the caller's
//! ambient context: the context currently dispatching on this thread, or the
//! one bound to it. A stage built on a thread with neither runs on whichever
//! context delivers its inputs, or inline if none does.
//!
//! # Example
//!
//! ```rust,ignore
//! use datavis_reactive::{apply1, apply2, value, WorkerContext, Context};
//!
//! let ui = Context::new("ui");
//! let io = WorkerContext::spawn("io")?;
//!
//! let raw = apply1(Some(io.context()), &value(path), |_, path| read(path));
//! let dataset = apply1(Some(io.context()), &raw, |_, raw| parse(raw));
//! let shown = apply2(Some(&ui), &dataset, &view, |_, dataset, view| view.show(dataset));
//!
//! ui.wait_ready(&shown, Duration::from_secs(5))?;
//! ```

use super::cell::Cell;
use super::stage::build;
use super::token::Token;
use crate::scheduler::Context;

/// Run `f` once, with no inputs.
pub fn apply0<R, F>(on: Option<&Context>, f: F) -> Cell<R>
where
    R: Send + Sync + 'static,
    F: FnOnce(&Token) -> R + Send + 'static,
{
    build(on, (), Box::new(move |token: &Token, _: &()| f(token)))
}

/// Run `f` once `a` is ready.
pub fn apply1<A, R, F>(on: Option<&Context>, a: &Cell<A>, f: F) -> Cell<R>
where
    A: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(&Token, &A) -> R + Send + 'static,
{
    build(
        on,
        (a.clone(),),
        Box::new(move |token: &Token, (a,): &(Cell<A>,)| f(token, a.get())),
    )
}

/// Run `f` once `a` and `b` are ready.
pub fn apply2<A, B, R, F>(on: Option<&Context>, a: &Cell<A>, b: &Cell<B>, f: F) -> Cell<R>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(&Token, &A, &B) -> R + Send + 'static,
{
    build(
        on,
        (a.clone(), b.clone()),
        Box::new(move |token: &Token, (a, b): &(Cell<A>, Cell<B>)| {
            f(token, a.get(), b.get())
        }),
    )
}

/// Run `f` once `a`, `b` and `c` are ready.
pub fn apply3<A, B, C, R, F>(
    on: Option<&Context>,
    a: &Cell<A>,
    b: &Cell<B>,
    c: &Cell<C>,
    f: F,
) -> Cell<R>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(&Token, &A, &B, &C) -> R + Send + 'static,
{
    build(
        on,
        (a.clone(), b.clone(), c.clone()),
        Box::new(
            move |token: &Token, (a, b, c): &(Cell<A>, Cell<B>, Cell<C>)| {
                f(token, a.get(), b.get(), c.get())
            },
        ),
    )
}

/// Run `f` once all four inputs are ready.
pub fn apply4<A, B, C, D, R, F>(
    on: Option<&Context>,
    a: &Cell<A>,
    b: &Cell<B>,
    c: &Cell<C>,
    d: &Cell<D>,
    f: F,
) -> Cell<R>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(&Token, &A, &B, &C, &D) -> R + Send + 'static,
{
    build(
        on,
        (a.clone(), b.clone(), c.clone(), d.clone()),
        Box::new(
            move |token: &Token, (a, b, c, d): &(Cell<A>, Cell<B>, Cell<C>, Cell<D>)| {
                f(token, a.get(), b.get(), c.get(), d.get())
            },
        ),
    )
}

/// Run `f` once every cell in `cells` is ready, passing the values in order.
///
/// An empty vector behaves like [`apply0`].
pub fn join_all<T, R, F>(on: Option<&Context>, cells: Vec<Cell<T>>, f: F) -> Cell<R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(&Token, Vec<&T>) -> R + Send + 'static,
{
    build(
        on,
        cells,
        Box::new(move |token: &Token, cells: &Vec<Cell<T>>| {
            f(token, cells.iter().map(Cell::get).collect())
        }),
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
