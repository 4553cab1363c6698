use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a participant on the synchronization chain: a context or the
/// terminal store.
///
/// Used as the `originator` of sync calls and as the subject of broadcast
/// events, so that a context can recognise (and ignore) its own notifications.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(uuid::Uuid);

impl ChannelId {
    /// Generate a new time-ordered channel ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (last 8 hex characters, the random part of a v7 UUID).
    pub fn short_id(&self) -> String {
        let simple = self.0.simple().to_string();
        format!("ch:{}", &simple[simple.len() - 8..])
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.short_id())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}
