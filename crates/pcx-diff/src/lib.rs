//! Graph diffs and change logs for PCX.
//!
//! A context records every mutation of its object graph as a [`GraphDiff`].
//! Diffs replay forward through a [`GraphChangeHandler`] and undo in reverse,
//! which is how commits ship work upstream and how rollbacks revert it.
//!
//! # Key Types
//!
//! - [`GraphDiff`] -- One atomic graph mutation, or a compound of them
//! - [`CompoundDiff`] -- Ordered list of diffs replayed in order
//! - [`GraphChangeHandler`] -- Target a diff is applied to
//! - [`ChangeLog`] -- Append-only diff log with named markers

pub mod change_log;
pub mod error;
pub mod graph_diff;

pub use change_log::ChangeLog;
pub use error::{DiffError, DiffResult};
pub use graph_diff::{CompoundDiff, GraphChangeHandler, GraphDiff};
