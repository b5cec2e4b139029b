//! Configuration loader
//!
//! Loads and validates mapping set YAML files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::types::MappingSet;

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Create loader from ETL_CONFIG_DIR env var or default to "config"
    pub fn from_env() -> Self {
        match std::env::var("ETL_CONFIG_DIR") {
            Ok(dir) => Self::new(dir),
            Err(_) => Self::new("config"),
        }
    }

    /// Load `<config_dir>/<name>.yaml`
    pub fn load_mappings(&self, name: &str) -> Result<MappingSet> {
        let path = self.config_dir.join(format!("{}.yaml", name));
        Self::load_mappings_file(&path)
    }

    pub fn load_mappings_file(path: &Path) -> Result<MappingSet> {
        info!("Loading mapping set from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mappings = MappingSet::from_yaml_str(&content)
            .with_context(|| format!("Failed to load {}", path.display()))?;

        info!(
            "Loaded {} mappings keyed by {} (batch size {})",
            mappings.mapping.len(),
            mappings.id_column,
            mappings.effective_batch_size()
        );
        Ok(mappings)
    }
}
