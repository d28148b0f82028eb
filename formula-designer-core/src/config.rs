use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_BUILDING_BLOCK_MODULE: &str = "quantum_walk_blocks";

pub const DEFAULT_HEADER: &str = "Auto-generated Python code from your domain model.\n\
Includes aggregation rewriting and CollectionWrapper for relationships.";

/// Settings for one generation run.
///
/// Every key is optional in the TOML file; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Module the detected building blocks are imported from.
    pub building_block_module: String,
    /// Append a `sample_main()` entry point to the output.
    pub include_sample_main: bool,
    /// Text of the module docstring.
    pub header: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            building_block_module: DEFAULT_BUILDING_BLOCK_MODULE.to_string(),
            include_sample_main: false,
            header: DEFAULT_HEADER.to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a TOML file, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `FORMULA_DESIGNER_BLOCK_MODULE` replaces the building-block module.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(module) = env::var("FORMULA_DESIGNER_BLOCK_MODULE") {
            if !module.trim().is_empty() {
                self.building_block_module = module.trim().to_string();
            }
        }
    }
}
