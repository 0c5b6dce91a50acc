//! Lowering configuration: recursion guards, error cap, and the names of
//! the runtime primitives the emitted pipeline calls.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default limit on observable-context nesting.
pub const DEFAULT_MAX_CONTEXT_DEPTH: usize = 32;
/// Default limit on syntax nesting in the reader, and on function and
/// context nesting in the tree walkers.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 256;
/// Default maximum number of errors collected in recovering mode.
pub const DEFAULT_MAX_ERRORS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoweringConfig {
    pub max_context_depth: usize,
    pub max_tree_depth: usize,
    pub max_errors: usize,
    pub operators: OperatorNames,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        LoweringConfig {
            max_context_depth: DEFAULT_MAX_CONTEXT_DEPTH,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            max_errors: DEFAULT_MAX_ERRORS,
            operators: OperatorNames::default(),
        }
    }
}

impl LoweringConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }
}

/// Names the generated code uses for the runtime primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorNames {
    pub combine: String,
    pub transform: String,
    pub flatten_latest: String,
    pub default_until_first: String,
    pub subscribe: String,
}

impl Default for OperatorNames {
    fn default() -> Self {
        OperatorNames {
            combine: "combine".to_owned(),
            transform: "transform".to_owned(),
            flatten_latest: "flattenLatest".to_owned(),
            default_until_first: "defaultUntilFirst".to_owned(),
            subscribe: "subscribe".to_owned(),
        }
    }
}

/// Recursion counter checked against a configured limit.
#[derive(Debug)]
pub(crate) struct DepthGuard {
    depth: usize,
    limit: usize,
}

impl DepthGuard {
    pub(crate) fn new(limit: usize) -> Self {
        DepthGuard { depth: 0, limit }
    }

    /// Returns false once the limit is exceeded.
    pub(crate) fn enter(&mut self) -> bool {
        self.depth += 1;
        self.depth <= self.limit
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = LoweringConfig::from_toml_str("").unwrap();
        assert_eq!(config, LoweringConfig::default());
        assert_eq!(config.operators.flatten_latest, "flattenLatest");
    }

    #[test]
    fn operator_names_can_be_overridden() {
        let src = r#"
max_context_depth = 4

[operators]
combine = "combineLatest"
flatten_latest = "switchAll"
"#;
        let config = LoweringConfig::from_toml_str(src).unwrap();
        assert_eq!(config.max_context_depth, 4);
        assert_eq!(config.max_tree_depth, DEFAULT_MAX_TREE_DEPTH);
        assert_eq!(config.operators.combine, "combineLatest");
        assert_eq!(config.operators.flatten_latest, "switchAll");
        assert_eq!(config.operators.transform, "transform");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = LoweringConfig::from_toml_str("max_depth = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)), "got {:?}", err);
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let err = LoweringConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }

    #[test]
    fn depth_guard_trips_past_limit() {
        let mut guard = DepthGuard::new(2);
        assert!(guard.enter());
        assert!(guard.enter());
        assert!(!guard.enter());
        guard.exit();
        guard.exit();
        assert!(guard.enter());
    }
}
