//! Foundation types for PCX, the persistence-context change-graph engine.
//!
//! Every other PCX crate depends on `pcx-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Entity name plus key map; temporary until a store assigns a permanent key
//! - [`KeyValue`] -- A single primary-key column value
//! - [`PersistenceState`] -- Lifecycle state of a persistent object
//! - [`ObjectValues`] -- Attribute and relationship values of one object
//! - [`DataRow`] -- An identified value bag returned by queries
//! - [`ChannelId`] -- Identity of a context or store on the sync chain

pub mod channel;
pub mod error;
pub mod object_id;
pub mod state;
pub mod values;

pub use channel::ChannelId;
pub use error::TypeError;
pub use object_id::{IdKey, KeyValue, ObjectId};
pub use state::PersistenceState;
pub use values::{DataRow, ObjectValues};
