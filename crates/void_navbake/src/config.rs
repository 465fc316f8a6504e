//! Bake configuration.
//!
//! Loaded from a TOML file next to the editor preferences. Missing keys take
//! their defaults, unknown keys are rejected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BakeError, Result, StorageError};

/// Settings shared by the bake services.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BakeConfig {
    /// File name prefix of baked artifacts
    pub asset_prefix: String,
    /// File extension of baked artifacts (without the dot)
    pub asset_extension: String,
    /// Folder used when a surface lives neither in a saved scene nor in a
    /// template. `None` turns such bakes into an invalid-target error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_folder: Option<PathBuf>,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            asset_prefix: "NavMesh-".to_string(),
            asset_extension: "asset".to_string(),
            fallback_folder: None,
        }
    }
}

impl BakeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| BakeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(StorageError::from)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded bake configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| BakeError::Config(e.to_string()))?;
        std::fs::write(path, text).map_err(StorageError::from)?;
        log::info!("Saved bake configuration to {:?}", path);
        Ok(())
    }

    /// Base artifact file name for a surface, e.g. `NavMesh-Plane.asset`.
    pub fn asset_file_name(&self, surface_name: &str) -> String {
        format!("{}{}.{}", self.asset_prefix, surface_name, self.asset_extension)
    }

    fn validate(&self) -> Result<()> {
        if self.asset_extension.is_empty() || self.asset_extension.contains('.') {
            return Err(BakeError::Config(format!(
                "asset_extension must be a bare extension, got {:?}",
                self.asset_extension
            )));
        }
        if self.asset_prefix.contains(['/', '\\']) {
            return Err(BakeError::Config(format!(
                "asset_prefix must not contain path separators, got {:?}",
                self.asset_prefix
            )));
        }
        Ok(())
    }
}
