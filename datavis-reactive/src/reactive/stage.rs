//! Stage Implementation
//!
//! A stage is one schedulable unit of work: a function, the cells it reads,
//! the cell it writes and the context it runs on.
//!
//! # Lifecycle
//!
//! ```text
//! Constructed -> Waiting -> Running -> Completed
//!      |            |          |
//!      +------------+----------+-----> Cancelled
//! ```
//!
//! A stage is scheduled once per input notification and re-checks on every
//! dispatch whether all of its inputs are ready. Readiness is derived from
//! the input cells, never counted separately. The transition to `Running` is
//! a compare-and-swap, so the function runs at most once even when two input
//! notifications are dispatched concurrently on different contexts.
//!
//! Cancellation requested before the stage starts makes it skip the function
//! entirely. Cancellation requested while it runs only sets the token; if
//! the token is set when the function returns, the result is discarded and
//! the output cell stays pending.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cell::{Cell, WeakCell};
use super::subscriber::{schedule, StageId, Subscriber, Target};
use super::token::Token;
use crate::scheduler::Context;

/// Execution state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum StageState {
    /// Being wired into the graph.
    Constructed = 0,
    /// Subscribed to its inputs, not yet run.
    Waiting = 1,
    /// The function is executing.
    Running = 2,
    /// The output cell has been completed.
    Completed = 3,
    /// Will not run, or ran and had its result discarded.
    Cancelled = 4,
}

impl StageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StageState::Constructed,
            1 => StageState::Waiting,
            2 => StageState::Running,
            3 => StageState::Completed,
            _ => StageState::Cancelled,
        }
    }
}

/// The argument cells of a stage.
///
/// Implemented for tuples of up to four cells, and for `Vec<Cell<T>>`.
pub(crate) trait Inputs: Send + Sync + 'static {
    fn subscribe(&self, stage: &Weak<dyn Subscriber>);

    fn all_ready(&self) -> bool;

    fn count(&self) -> usize;
}

impl Inputs for () {
    fn subscribe(&self, _stage: &Weak<dyn Subscriber>) {}

    fn all_ready(&self) -> bool {
        true
    }

    fn count(&self) -> usize {
        0
    }
}

macro_rules! tuple_inputs {
    ($($ty:ident => $var:ident),+) => {
        impl<$($ty),+> Inputs for ($(Cell<$ty>,)+)
        where
            $($ty: Send + Sync + 'static,)+
        {
            fn subscribe(&self, stage: &Weak<dyn Subscriber>) {
                let ($($var,)+) = self;
                $($var.subscribe(stage);)+
            }

            fn all_ready(&self) -> bool {
                let ($($var,)+) = self;
                true $(&& $var.is_ready())+
            }

            fn count(&self) -> usize {
                [$(stringify!($var)),+].len()
            }
        }
    };
}

tuple_inputs!(A => a);
tuple_inputs!(A => a, B => b);
tuple_inputs!(A => a, B => b, C => c);
tuple_inputs!(A => a, B => b, C => c, D => d);

impl<T> Inputs for Vec<Cell<T>>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, stage: &Weak<dyn Subscriber>) {
        for cell in self {
            cell.subscribe(stage);
        }
    }

    fn all_ready(&self) -> bool {
        self.iter().all(Cell::is_ready)
    }

    fn count(&self) -> usize {
        self.len()
    }
}

/// The user function, adapted to receive the whole input set.
pub(crate) type Work<I, R> = Box<dyn FnOnce(&Token, &I) -> R + Send>;

pub(crate) struct Stage<I, R> {
    id: StageId,
    inputs: I,
    /// Taken by the single dispatch that wins the `Waiting -> Running` swap.
    work: Mutex<Option<Work<I, R>>>,
    output: WeakCell<R>,
    token: Token,
    target: Target,
    state: AtomicU8,
}

impl<I, R> Stage<I, R>
where
    I: Inputs,
    R: Send + Sync + 'static,
{
    pub(crate) fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: StageState, to: StageState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl<I, R> Subscriber for Stage<I, R>
where
    I: Inputs,
    R: Send + Sync + 'static,
{
    fn id(&self) -> StageId {
        self.id
    }

    fn on_input_ready(&self) {
        if !self.inputs.all_ready() {
            trace!(stage = %self.id, "input ready, still waiting on others");
            return;
        }
        if !self.transition(StageState::Waiting, StageState::Running) {
            trace!(stage = %self.id, state = ?self.state(), "ignoring notification");
            return;
        }
        if self.token.is_cancelled() {
            debug!(stage = %self.id, "cancelled before running, skipping");
            self.finish(StageState::Cancelled);
            return;
        }

        let Some(work) = self.work.lock().take() else {
            self.finish(StageState::Cancelled);
            return;
        };

        trace!(stage = %self.id, "running");
        let result = work(&self.token, &self.inputs);

        if self.token.is_cancelled() {
            debug!(stage = %self.id, "cancelled while running, discarding result");
            self.finish(StageState::Cancelled);
            return;
        }

        match self.output.upgrade() {
            Some(output) => {
                self.finish(StageState::Completed);
                output.complete(result);
            }
            None => {
                debug!(stage = %self.id, "output abandoned, discarding result");
                self.finish(StageState::Cancelled);
            }
        }
    }

    fn cancel(&self) {
        self.token.cancel();
        if self.transition(StageState::Waiting, StageState::Cancelled)
            || self.transition(StageState::Constructed, StageState::Cancelled)
        {
            debug!(stage = %self.id, "cancelled before running");
        }
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl<I, R> Drop for Stage<I, R> {
    fn drop(&mut self) {
        trace!(stage = %self.id, "stage released");
    }
}

/// Build a stage over `inputs`, wire it into the graph and return its output.
pub(crate) fn build<I, R>(on: Option<&Context>, inputs: I, work: Work<I, R>) -> Cell<R>
where
    I: Inputs,
    R: Send + Sync + 'static,
{
    build_stage(on, inputs, work).0
}

pub(crate) fn build_stage<I, R>(
    on: Option<&Context>,
    inputs: I,
    work: Work<I, R>,
) -> (Cell<R>, Arc<Stage<I, R>>)
where
    I: Inputs,
    R: Send + Sync + 'static,
{
    let target = match on {
        Some(context) => Target::Bound(context.downgrade()),
        None => Target::ambient(),
    };

    let output = Cell::pending();
    let stage = Arc::new(Stage {
        id: StageId::new(),
        inputs,
        work: Mutex::new(Some(work)),
        output: output.downgrade(),
        token: Token::new(),
        target,
        state: AtomicU8::new(StageState::Constructed as u8),
    });

    let subscriber: Arc<dyn Subscriber> = stage.clone();
    output.set_owner(Arc::clone(&subscriber));

    debug!(
        stage = %stage.id,
        inputs = stage.inputs.count(),
        target = ?stage.target,
        "stage constructed"
    );

    stage.transition(StageState::Constructed, StageState::Waiting);
    if stage.inputs.count() == 0 {
        schedule(subscriber);
    } else {
        stage.inputs.subscribe(&Arc::downgrade(&subscriber));
    }

    (output, stage)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
