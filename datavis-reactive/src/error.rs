//! Error types
//!
//! Recoverable failures of the dispatch machinery and of configuration
//! loading. Misuse of the graph itself (completing a cell twice, reading a
//! cell before it is ready) is not represented here: those are programming
//! errors and panic at the call site.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`Context`](crate::scheduler::Context).
#[derive(Error, Debug)]
pub enum ContextError {
    /// The context no longer accepts notifications.
    #[error("context `{0}` is closed")]
    Closed(String),

    /// `drain` was called from inside a handler running on the same context.
    #[error("context `{0}` is already dispatching on this thread")]
    Reentrant(String),

    /// The context was pumped from a thread that does not own it.
    #[error("context `{0}` can only be dispatched from its owning thread")]
    WrongThread(String),

    /// The pumping condition did not hold before the deadline.
    #[error("timed out after {timeout:?} while dispatching context `{name}`")]
    Timeout { name: String, timeout: Duration },

    /// The OS refused to start a dispatch thread.
    #[error("failed to spawn dispatch thread for context `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for runtime construction.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used by the runtime and configuration layers.
pub type Result<T> = std::result::Result<T, Error>;
