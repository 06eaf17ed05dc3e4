//! Worker Contexts
//!
//! A worker context is a [`Context`] driven by a dedicated OS thread. The
//! thread blocks on the queue while idle (no thread is busy while stages wait
//! for their inputs) and dispatches notifications one at a time as they
//! arrive.
//!
//! # Shutdown
//!
//! Shutting down closes the context, wakes the thread and joins it. Ready
//! notifications still queued at that point are discarded and their stages
//! cancelled. Deferred releases still run on the worker thread, so nothing
//! owned by the context is dropped elsewhere.

use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use super::context::{Context, DispatchGuard};
use crate::config::ContextConfig;
use crate::error::ContextError;

/// A context with its own dispatch thread. Dropping it shuts the thread down.
#[derive(Debug)]
pub struct WorkerContext {
    context: Context,
    handle: Option<JoinHandle<()>>,
}

impl WorkerContext {
    /// Spawn a worker thread named `name` with the default stack size.
    pub fn spawn(name: impl Into<String>) -> Result<Self, ContextError> {
        Self::spawn_with(&ContextConfig::named(name))
    }

    /// Spawn a worker thread as described by `config`.
    pub fn spawn_with(config: &ContextConfig) -> Result<Self, ContextError> {
        let context = Context::detached(config.name.clone());

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_context = context.clone();
        let handle = builder
            .spawn(move || run(thread_context))
            .map_err(|source| ContextError::Spawn {
                name: config.name.clone(),
                source,
            })?;

        Ok(Self {
            context,
            handle: Some(handle),
        })
    }

    /// The context this worker dispatches.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Close the context and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.context.close();

        if handle.thread().id() == thread::current().id() {
            // Shut down from one of our own stages: the loop exits once the
            // current notification returns, nothing to join.
            return;
        }
        if handle.join().is_err() {
            warn!(context = %self.context.name(), "dispatch thread panicked");
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The dispatch loop of a worker thread.
fn run(context: Context) {
    context.bind_current_thread();
    info!(context = %context.name(), "dispatch thread started");

    let _exit = ExitGuard(context.clone());
    let _guard = DispatchGuard::enter(&context);
    while let Some(notification) = context.next_blocking() {
        context.dispatch(notification);
    }
}

/// Closes the context and cancels whatever is still queued once the loop
/// ends, whether it returned or a stage panicked.
struct ExitGuard(Context);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let context = &self.0;
        if thread::panicking() {
            error!(context = %context.name(), "stage panicked, closing context");
        }
        context.close();
        context.discard_remaining();

        let stats = context.stats();
        info!(
            context = %context.name(),
            dispatched = stats.dispatched,
            discarded = stats.discarded,
            "dispatch thread stopped"
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
