//! Reactive Value Graph
//!
//! This module implements the asynchronous dataflow graph the dataset browser
//! is built on: cells, the stages that fill them, and the builders that wire
//! the two together.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a single-assignment value. It is either pending or ready, and
//! once ready it never changes. Cells are cheap to clone and safe to share
//! between threads.
//!
//! ## Stages
//!
//! A Stage is one function application in the graph. It reads a fixed set of
//! input cells and completes one output cell. It runs at most once, on the
//! context it was built for, after every input is ready.
//!
//! ## Tokens
//!
//! Every stage carries a Token. Dropping the last handle to a pending output
//! cell (or calling [`Cell::cancel`]) sets it. A stage that has not started is
//! then skipped; a running stage can poll the token and stop early.
//!
//! # Implementation Notes
//!
//! Graph edges point backwards for ownership: a cell owns the stage that
//! produces it, and the stage owns its input cells. Forward edges (a cell
//! notifying the stages that read it) are weak. Holding a result therefore
//! keeps exactly the computation needed to produce it alive, and nothing
//! else.

mod apply;
mod cell;
mod stage;
mod subscriber;
mod token;

pub use apply::{apply0, apply1, apply2, apply3, apply4, join_all};
pub use cell::{value, Cell};
pub use subscriber::StageId;
pub use token::Token;

pub(crate) use subscriber::Subscriber;
