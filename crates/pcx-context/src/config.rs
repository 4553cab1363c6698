use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ContextResult};

/// Configuration for a [`Context`](crate::Context).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Publish a `Changed` graph event for every tracked object edit.
    pub change_events: bool,
    /// Publish commit-started/committed/aborted/rolled-back graph events.
    pub lifecycle_events: bool,
    /// Run validators over dirty objects before each commit.
    pub validate_on_commit: bool,
    /// Child contexts copy this context's event flags.
    pub inherit_events: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            change_events: false,
            lifecycle_events: false,
            validate_on_commit: true,
            inherit_events: false,
        }
    }
}

impl ContextConfig {
    /// Parse from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> ContextResult<Self> {
        toml::from_str(text).map_err(|e| ContextError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ContextResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Configuration for a child context created from this one.
    pub fn child_config(&self) -> Self {
        if self.inherit_events {
            self.clone()
        } else {
            Self {
                validate_on_commit: self.validate_on_commit,
                ..Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ContextConfig::default();
        assert!(!config.change_events);
        assert!(!config.lifecycle_events);
        assert!(config.validate_on_commit);
        assert!(!config.inherit_events);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = ContextConfig::from_toml_str("lifecycle_events = true").unwrap();
        assert!(config.lifecycle_events);
        assert!(config.validate_on_commit);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ContextConfig::from_toml_str("change_events = \"yes\"").unwrap_err();
        assert!(matches!(err, ContextError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "change_events = true\ninherit_events = true").unwrap();

        let config = ContextConfig::load(file.path()).unwrap();
        assert!(config.change_events);
        assert!(config.inherit_events);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContextConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ContextError::Io(_)));
    }

    #[test]
    fn child_config_inheritance() {
        let parent = ContextConfig {
            change_events: true,
            lifecycle_events: true,
            validate_on_commit: false,
            inherit_events: false,
        };
        let child = parent.child_config();
        assert!(!child.change_events);
        assert!(!child.lifecycle_events);
        assert!(!child.validate_on_commit);

        let inheriting = ContextConfig {
            inherit_events: true,
            ..parent
        };
        assert_eq!(inheriting.child_config(), inheriting);
    }
}
