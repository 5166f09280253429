//! `efs.toml` parsing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use efs_runtime::EngineConfig;
use serde::{Deserialize, Serialize};

pub const FILE_NAME: &str = "efs.toml";

/// Top-level configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EfsConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

impl EfsConfig {
    /// Load `explicit` if given, else the nearest `efs.toml` at or above
    /// `start_dir`, else defaults.
    pub fn load(explicit: Option<&Path>, start_dir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find(start_dir),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

fn find(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_section_is_optional() {
        let config = EfsConfig::parse("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());

        let config = EfsConfig::parse("[engine]\ncycles = 3\nwarn_on_unmatched_rule = true\n").unwrap();
        assert_eq!(config.engine.cycles, 3);
        assert!(config.engine.warn_on_unmatched_rule);
        assert_eq!(config.engine.max_call_depth, 64);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(EfsConfig::parse("[engine]\ncycles = \"many\"\n").is_err());
    }

    #[test]
    fn nearest_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(FILE_NAME), "[engine]\ncycles = 7\n").unwrap();

        let config = EfsConfig::load(None, &nested).unwrap();
        assert_eq!(config.engine.cycles, 7);
        assert!(EfsConfig::load(Some(&dir.path().join("missing.toml")), &nested).is_err());
    }
}
