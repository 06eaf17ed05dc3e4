//! Datavis Reactive
//!
//! This crate provides the asynchronous value graph behind the datavis
//! dataset browser. Loading, parsing, filtering and rendering are expressed
//! as stages over single-assignment cells, and each stage runs on the
//! context (thread) it was built for.
//!
//! It implements:
//!
//! - Single-assignment cells and the `applyN` builders that derive new cells
//! - Cancellation and progress reporting per stage
//! - Thread-affine dispatch contexts, manual or backed by a worker thread
//! - A small runtime that starts the configured contexts
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, stages, tokens and the graph builders
//! - `scheduler`: Dispatch contexts and worker threads
//! - `runtime`: The set of contexts an application runs
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use datavis_reactive::{apply1, apply2, value, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(&RuntimeConfig::default())?;
//! let worker = runtime.worker().unwrap();
//!
//! // Load on the worker, combine on the main thread
//! let rows = apply1(Some(worker), &value("samples.csv"), |_, path| load(path));
//! let filter = value(Filter::default());
//! let table = apply2(Some(runtime.main()), &rows, &filter, |_, rows, filter| {
//!     filter.apply(rows)
//! });
//!
//! let table = runtime.main().wait_ready(&table, Duration::from_secs(5))?;
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod runtime;
pub mod scheduler;

pub use config::{ContextConfig, RuntimeConfig};
pub use error::{ConfigError, ContextError, Error, Result};
pub use reactive::{apply0, apply1, apply2, apply3, apply4, join_all, value, Cell, StageId, Token};
pub use runtime::Runtime;
pub use scheduler::{Context, ContextId, ContextStats, WeakContext, WorkerContext};
