use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Lifecycle state of a persistent object within one context.
///
/// ```text
/// Transient -> New -> Committed <-> Modified -> Deleted -> (evicted)
///                       ^
///          Hollow ------+  (only via a successful identifier fetch)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceState {
    /// Not registered with any context.
    Transient,
    /// Registered, never stored.
    New,
    /// Values match the upstream channel.
    Committed,
    /// Committed object with local edits.
    Modified,
    /// Placeholder with a permanent identifier and no loaded values.
    Hollow,
    /// Scheduled for deletion on the next commit.
    Deleted,
}

impl PersistenceState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::New => "new",
            Self::Committed => "committed",
            Self::Modified => "modified",
            Self::Hollow => "hollow",
            Self::Deleted => "deleted",
        }
    }

    /// Returns `true` for states that carry uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        matches!(self, Self::New | Self::Modified | Self::Deleted)
    }
}

impl fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PersistenceState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "new" => Ok(Self::New),
            "committed" => Ok(Self::Committed),
            "modified" => Ok(Self::Modified),
            "hollow" => Ok(Self::Hollow),
            "deleted" => Ok(Self::Deleted),
            other => Err(TypeError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_states() {
        assert!(PersistenceState::New.is_dirty());
        assert!(PersistenceState::Modified.is_dirty());
        assert!(PersistenceState::Deleted.is_dirty());
        assert!(!PersistenceState::Committed.is_dirty());
        assert!(!PersistenceState::Hollow.is_dirty());
        assert!(!PersistenceState::Transient.is_dirty());
    }

    #[test]
    fn name_parses_back() {
        for state in [
            PersistenceState::Transient,
            PersistenceState::New,
            PersistenceState::Committed,
            PersistenceState::Modified,
            PersistenceState::Hollow,
            PersistenceState::Deleted,
        ] {
            assert_eq!(state.name().parse::<PersistenceState>().unwrap(), state);
        }
        assert!("zombie".parse::<PersistenceState>().is_err());
    }
}
