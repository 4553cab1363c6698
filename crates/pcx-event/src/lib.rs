//! Event broadcasting for PCX.
//!
//! Contexts and stores publish [`GraphEvent`]s keyed by an [`EventSubject`] and
//! an [`EventTopic`]. Subscribers either register a synchronous
//! [`EventListener`], which runs on the publishing thread, or take a
//! `tokio::sync::broadcast` [`EventStream`].
//!
//! # Key Types
//!
//! - [`EventManager`] -- Fan-out router with filters
//! - [`GraphEvent`] -- Subject, topic, originator and diff payload
//! - [`EventFilter`] -- Subject/topic selection

pub mod event;
pub mod manager;

pub use event::{EventSubject, EventTopic, GraphEvent};
pub use manager::{
    EventFilter, EventListener, EventManager, EventManagerConfig, EventStream, SubscriptionId,
};
