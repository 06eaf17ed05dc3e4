//! Subscriber types for the dataflow graph.
//!
//! A subscriber is anything a [`Cell`](super::Cell) notifies when it becomes
//! ready. In practice every subscriber is a stage, but cells only see the
//! type-erased [`Subscriber`] trait so that a `Cell<A>` can wake a stage whose
//! output is a `Cell<R>` without knowing `R`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::token::Token;
use crate::scheduler::{Context, Notification, WeakContext};

/// Unique identifier for a stage.
///
/// Used for log correlation only; the graph itself links stages through
/// cells, not through ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(u64);

impl StageId {
    /// Generate a new unique stage ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Where a stage runs.
#[derive(Clone, Debug)]
pub(crate) enum Target {
    /// A specific context. Held weakly: a stage never keeps a context alive.
    Bound(WeakContext),
    /// No context was known when the stage was built. Resolved each time the
    /// stage is scheduled, to the current context of the notifying thread;
    /// with no such context the stage runs inline.
    Ambient,
}

impl Target {
    /// Capture the caller's ambient context, if it has one.
    pub(crate) fn ambient() -> Self {
        match Context::current() {
            Some(context) => Target::Bound(context.downgrade()),
            None => Target::Ambient,
        }
    }

    /// The bound context, if it is still alive.
    pub(crate) fn context(&self) -> Option<Context> {
        match self {
            Target::Bound(weak) => weak.upgrade(),
            Target::Ambient => None,
        }
    }
}

/// A party interested in a cell becoming ready.
pub(crate) trait Subscriber: Send + Sync {
    fn id(&self) -> StageId;

    /// Re-check readiness and run if every input is ready. Invoked by the
    /// dispatch loop of the stage's context.
    fn on_input_ready(&self);

    /// Request cancellation. A stage that has not started yet will not run.
    fn cancel(&self);

    fn token(&self) -> &Token;

    fn target(&self) -> &Target;
}

/// Deliver a "ready" notification to `subscriber` on its target context.
pub(crate) fn schedule(subscriber: Arc<dyn Subscriber>) {
    let context = match subscriber.target() {
        Target::Bound(weak) => match weak.upgrade() {
            Some(context) => Some(context),
            None => {
                debug!(stage = %subscriber.id(), "target context is gone, cancelling stage");
                subscriber.cancel();
                return;
            }
        },
        Target::Ambient => Context::current(),
    };

    match context {
        Some(context) => {
            let handle = Arc::clone(&subscriber);
            if let Err(err) = context.post(Notification::Ready(subscriber)) {
                warn!(stage = %handle.id(), %err, "cannot schedule stage, cancelling it");
                handle.cancel();
            }
        }
        None => {
            trace!(stage = %subscriber.id(), "no ambient context, running inline");
            subscriber.on_input_ready();
        }
    }
}
