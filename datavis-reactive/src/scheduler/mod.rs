//! Scheduling
//!
//! Where stages run. A [`Context`] is a FIFO queue owned by one thread; a
//! [`WorkerContext`] is a context with its own dispatch thread.
//!
//! Stages never run on the thread that completed their inputs unless that
//! thread happens to own their context. Completing a cell only posts a
//! notification; the owning thread picks it up when it next dispatches.

mod context;
mod worker;

pub use context::{Context, ContextId, ContextStats, WeakContext};
pub use worker::WorkerContext;

pub(crate) use context::Notification;
