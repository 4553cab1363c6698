//! Terminal backing store for PCX contexts.
//!
//! [`InMemoryDataStore`] sits at the root of a context tree. It applies
//! flushed diffs atomically, hands out permanent keys for newly inserted
//! objects, and answers point, relationship and entity queries.
//!
//! # Key Types
//!
//! - [`InMemoryDataStore`] -- `DataChannel` over in-memory rows
//! - [`StoreConfig`] -- Key generation and event publication settings
//! - [`StoreError`] -- Failures while applying a flush
//!
//! # Storage Rules
//!
//! 1. A flush is applied completely or not at all.
//! 2. Rows hold attributes and to-one arcs. A to-many arc with a to-one
//!    reverse is stored on the target row; other to-many arcs are stored as
//!    link pairs.
//! 3. Rolling back is a no-op: the store never holds uncommitted state.

pub mod config;
pub mod error;
pub mod memory;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDataStore;
