//! Persistence contexts for PCX.
//!
//! A [`Context`] tracks an object graph in memory: which objects are new,
//! modified or deleted, and the ordered diffs that got them there. It commits
//! those diffs through an upstream [`DataChannel`], which is either a backing
//! store or another context. Nested contexts give scratch-pad editing: a child
//! can flush into its parent without touching the store, or roll back without
//! disturbing it.
//!
//! Objects are resolved lazily. An identifier that is known but not loaded is
//! a hollow object; the first property access faults it in with a point
//! query upstream.
//!
//! # Key Types
//!
//! - [`Context`] -- Identity map, commit/rollback, faults, child contexts
//! - [`PersistentObject`] -- Shared handle to one tracked object
//! - [`DataChannel`] / [`SyncMode`] / [`Query`] -- Upstream seam
//! - [`IdentityMap`] -- Registered objects and the change log
//! - [`Validator`] / [`ValidationResult`] -- Pre-commit checks
//! - [`PeerEventBridge`] -- Subscription to upstream commit events
//! - [`ContextConfig`] -- Event and validation switches

pub mod bridge;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod identity_map;
mod merge;
pub mod object;
pub mod validation;

#[cfg(test)]
mod testing;

pub use bridge::PeerEventBridge;
pub use channel::{DataChannel, Query, QueryResponse, SyncMode};
pub use config::ContextConfig;
pub use context::Context;
pub use error::{ContextError, ContextResult};
pub use identity_map::{CommitPhase, IdentityMap};
pub use object::PersistentObject;
pub use validation::{
    MandatoryAttributeValidator, ObjectView, ValidationFailure, ValidationResult, Validator,
};
