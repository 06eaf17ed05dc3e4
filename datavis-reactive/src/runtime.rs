//! Runtime
//!
//! The runtime owns the set of contexts an application dispatches on: the
//! main context, bound to the thread that built the runtime (usually the UI
//! thread), and one worker context per configured entry.
//!
//! Workers are kept in creation order and torn down in reverse, so a worker
//! that feeds a later one outlives it.

use indexmap::IndexMap;
use tracing::info;

use crate::config::{RuntimeConfig, DEFAULT_WORKER};
use crate::error::{ConfigError, Result};
use crate::scheduler::{Context, WorkerContext};

/// Name of the context bound to the thread that builds the runtime.
pub const MAIN_CONTEXT: &str = "main";

/// The main context plus the configured workers. Dropping it shuts every
/// worker down.
pub struct Runtime {
    main: Context,
    workers: IndexMap<String, WorkerContext>,
    stopped: bool,
}

impl Runtime {
    /// Build the main context on the calling thread and start every
    /// configured worker.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        if config.contexts.iter().any(|c| c.name == MAIN_CONTEXT) {
            return Err(ConfigError::Invalid(format!(
                "context name `{}` is reserved",
                MAIN_CONTEXT
            ))
            .into());
        }

        let main = Context::new(MAIN_CONTEXT);
        let mut workers = IndexMap::with_capacity(config.contexts.len());
        for context in &config.contexts {
            // Already started workers are shut down by their Drop on error.
            let worker = WorkerContext::spawn_with(context)?;
            workers.insert(context.name.clone(), worker);
        }

        info!(workers = workers.len(), "runtime started");
        Ok(Self {
            main,
            workers,
            stopped: false,
        })
    }

    /// The context owned by the thread that built the runtime.
    pub fn main(&self) -> &Context {
        &self.main
    }

    /// Look up a context by name. `"main"` resolves to the main context.
    pub fn context(&self, name: &str) -> Option<&Context> {
        if name == MAIN_CONTEXT {
            return Some(&self.main);
        }
        self.workers.get(name).map(WorkerContext::context)
    }

    /// The default worker, if the configuration declared one.
    pub fn worker(&self) -> Option<&Context> {
        self.context(DEFAULT_WORKER)
    }

    /// Every context, main first, then workers in creation order.
    pub fn contexts(&self) -> impl Iterator<Item = &Context> + '_ {
        std::iter::once(&self.main).chain(self.workers.values().map(WorkerContext::context))
    }

    /// Stop every worker, most recent first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        while let Some((name, worker)) = self.workers.pop() {
            info!(context = %name, "stopping worker");
            worker.shutdown();
        }
        self.main.close();
        info!("runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("main", &self.main.name())
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
