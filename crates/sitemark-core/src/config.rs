//! Editor configuration.

use crate::handles::{HANDLE_HIT_TOLERANCE_PX, ROTATE_HANDLE_OFFSET_PX};
use crate::history::DEFAULT_MAX_HISTORY;
use crate::persistence::DEFAULT_VIEWPORT_DEBOUNCE_MS;
use crate::transform::DEFAULT_ANGLE_SNAP;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// What to do with the local state when a persistence call fails after an
/// optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Keep the local change and its undo entry; report the error.
    #[default]
    KeepOptimistic,
    /// Restore the previous local state; no undo entry is recorded.
    Rollback,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of the editing engine. Every field has a default, so a config
/// file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub max_history: usize,
    pub persist_policy: PersistPolicy,
    pub angle_snap_degrees: f64,
    pub rotate_handle_offset_px: f64,
    pub handle_hit_tolerance_px: f64,
    pub viewport_debounce_ms: u64,
    /// Fraction of the span added on each side by fit-to-content.
    pub fit_padding: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            persist_policy: PersistPolicy::default(),
            angle_snap_degrees: DEFAULT_ANGLE_SNAP,
            rotate_handle_offset_px: ROTATE_HANDLE_OFFSET_PX,
            handle_hit_tolerance_px: HANDLE_HIT_TOLERANCE_PX,
            viewport_debounce_ms: DEFAULT_VIEWPORT_DEBOUNCE_MS,
            fit_padding: 0.05,
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn with_policy(mut self, policy: PersistPolicy) -> Self {
        self.persist_policy = policy;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.max_history, 50);
        assert_eq!(config.persist_policy, PersistPolicy::KeepOptimistic);
        assert_eq!(config.angle_snap_degrees, 15.0);
        assert_eq!(config.viewport_debounce_ms, 1000);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            EditorConfig::from_json(r#"{"max_history": 10, "persist_policy": "rollback"}"#).unwrap();
        assert_eq!(config.max_history, 10);
        assert_eq!(config.persist_policy, PersistPolicy::Rollback);
        assert_eq!(config.fit_padding, 0.05);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EditorConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EditorConfig::load(Path::new("/nonexistent/sitemark.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
