//! The synchronization-channel seam.
//!
//! A context consumes one upstream [`DataChannel`] and is itself a channel for
//! its children. The terminal channel is a backing store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pcx_diff::GraphDiff;
use pcx_event::EventManager;
use pcx_map::EntityResolver;
use pcx_types::{ChannelId, DataRow, ObjectId};

use crate::error::{ContextError, ContextResult};

/// How an `on_sync` call should be handled by the receiving channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Merge the diff and stop.
    FlushNoCascade,
    /// Merge the diff and commit onwards to the terminal store.
    FlushCascade,
    /// Revert uncommitted changes all the way up.
    RollbackCascade,
}

impl SyncMode {
    pub fn code(self) -> u8 {
        match self {
            Self::FlushNoCascade => 1,
            Self::FlushCascade => 2,
            Self::RollbackCascade => 3,
        }
    }

    pub fn is_cascade(self) -> bool {
        !matches!(self, Self::FlushNoCascade)
    }
}

impl TryFrom<u8> for SyncMode {
    type Error = ContextError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::FlushNoCascade),
            2 => Ok(Self::FlushCascade),
            3 => Ok(Self::RollbackCascade),
            other => Err(ContextError::UnrecognizedSyncMode(other)),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FlushNoCascade => "flush-no-cascade",
            Self::FlushCascade => "flush-cascade",
            Self::RollbackCascade => "rollback-cascade",
        };
        write!(f, "{s}")
    }
}

/// Queries a channel can answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// Exact-identifier point lookup.
    ObjectId(ObjectId),
    /// Targets of a named relationship of `source`.
    Relationship { source: ObjectId, relationship: String },
    /// Every object of `entity` whose attributes equal all `filter` entries.
    Select {
        entity: String,
        filter: BTreeMap<String, Value>,
    },
}

impl Query {
    pub fn select(entity: impl Into<String>) -> Self {
        Self::Select {
            entity: entity.into(),
            filter: BTreeMap::new(),
        }
    }

    /// Add an attribute equality condition to a `Select`. Other queries are
    /// returned unchanged.
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Select { filter, .. } = &mut self {
            filter.insert(name.into(), value.into());
        }
        self
    }
}

/// Rows answering a query, in result order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<DataRow>,
}

impl QueryResponse {
    pub fn new(rows: Vec<DataRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Upstream target of a context.
pub trait DataChannel: Send + Sync {
    /// Identity of this channel, used as `originator` in calls it makes and
    /// as the subject of the events it publishes.
    fn channel_id(&self) -> ChannelId;

    fn on_query(&self, originator: ChannelId, query: &Query) -> ContextResult<QueryResponse>;

    /// Apply or revert `changes` sent by `originator`. Returns a result diff,
    /// which may carry permanent identifiers for newly inserted objects.
    fn on_sync(
        &self,
        originator: ChannelId,
        changes: &GraphDiff,
        mode: SyncMode,
    ) -> ContextResult<GraphDiff>;

    /// `on_sync` with a raw mode code, for callers that carry the mode as a
    /// number.
    fn on_sync_code(
        &self,
        originator: ChannelId,
        changes: &GraphDiff,
        code: u8,
    ) -> ContextResult<GraphDiff> {
        let mode = SyncMode::try_from(code)?;
        self.on_sync(originator, changes, mode)
    }

    fn entity_resolver(&self) -> Option<Arc<EntityResolver>>;

    /// Event manager on which this channel publishes its channel events.
    fn event_manager(&self) -> Option<Arc<EventManager>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_mode_codes() {
        for mode in [
            SyncMode::FlushNoCascade,
            SyncMode::FlushCascade,
            SyncMode::RollbackCascade,
        ] {
            assert_eq!(SyncMode::try_from(mode.code()).unwrap(), mode);
        }
        assert!(matches!(
            SyncMode::try_from(7),
            Err(ContextError::UnrecognizedSyncMode(7))
        ));
        assert!(!SyncMode::FlushNoCascade.is_cascade());
    }

    #[test]
    fn select_builder() {
        let query = Query::select("Artist").with_filter("name", "Monet");
        match query {
            Query::Select { entity, filter } => {
                assert_eq!(entity, "Artist");
                assert_eq!(filter.get("name"), Some(&Value::from("Monet")));
            }
            other => panic!("expected Select, got {:?}", other),
        }
    }
}
