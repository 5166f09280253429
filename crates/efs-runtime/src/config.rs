//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Settings for [`crate::Engine`]. Every field has a default, so partial
/// configuration files are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Record a warning on rules whose conditions all fail in a cycle.
    pub warn_on_unmatched_rule: bool,
    /// Maximum nesting of function and procedure calls.
    pub max_call_depth: usize,
    /// Memoize results of cacheable functions within a cycle.
    pub function_cache: bool,
    /// Cycles run per invocation by hosts that batch cycles.
    pub cycles: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warn_on_unmatched_rule: false,
            max_call_depth: 64,
            function_cache: true,
            cycles: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"cycles": 5}"#).unwrap();
        assert_eq!(config.cycles, 5);
        assert_eq!(config.max_call_depth, 64);
        assert!(config.function_cache);
        assert!(!config.warn_on_unmatched_rule);
    }
}
