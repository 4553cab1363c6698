use std::fmt;

use serde::{Deserialize, Serialize};

use pcx_diff::GraphDiff;
use pcx_types::ChannelId;

/// Classification of graph events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// A commit reached this channel and was applied.
    Committed,
    /// Uncommitted changes were reverted.
    RolledBack,
    /// Changes were merged without a commit, or an object was edited.
    Changed,
    /// A commit attempt began.
    CommitStarted,
    /// A commit attempt failed and left dirty state in place.
    CommitAborted,
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Committed => "Committed",
            Self::RolledBack => "RolledBack",
            Self::Changed => "Changed",
            Self::CommitStarted => "CommitStarted",
            Self::CommitAborted => "CommitAborted",
        };
        write!(f, "{s}")
    }
}

/// What an event is about.
///
/// `Channel` events describe traffic through a synchronization channel and
/// are what peer contexts listen to. `Graph` events describe one context's
/// own object graph and are for application observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSubject {
    Channel(ChannelId),
    Graph(ChannelId),
}

impl fmt::Display for EventSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel/{id}"),
            Self::Graph(id) => write!(f, "graph/{id}"),
        }
    }
}

/// A single published event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEvent {
    /// Per-manager publication sequence number, starting at 1.
    pub seq: u64,
    pub subject: EventSubject,
    pub topic: EventTopic,
    /// The context or store whose action caused the event.
    pub posted_by: ChannelId,
    pub diff: GraphDiff,
}
