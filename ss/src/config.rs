//! Configuration for sessionstore

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the session store directory
    #[serde(default = "default_store_path", rename = "store-path")]
    pub store_path: PathBuf,
}

/// Default session directory, shared with the resolution loop
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resolvd")
        .join("sessions")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path)
                .context(format!("Failed to load config from {}", config_path.display()));
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("sessionstore").join("config.yml")),
            Some(PathBuf::from("sessionstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        Ok(Config::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
