//! Configuration loader with dual-location support
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.weft/weft.toml
//! 3. Project-level config: ./.weft/weft.toml
//!
//! Later configs override earlier ones, section by section.

use crate::config::schema::WeftConfig;
use crate::error::{Result, ServerError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Loads configuration from the user and project locations
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader over the default locations
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(".weft").join("weft.toml")),
            project_config_path: PathBuf::from(".weft").join("weft.toml"),
        }
    }

    /// Loader over explicit paths, for tests and embedding
    pub fn with_paths(user: Option<PathBuf>, project: PathBuf) -> Self {
        Self {
            user_config_path: user,
            project_config_path: project,
        }
    }

    /// Load configuration, project overriding user overriding defaults
    pub async fn load(&self) -> Result<WeftConfig> {
        let mut config = WeftConfig::default();

        if let Some(user_path) = &self.user_config_path {
            if let Some(user_config) = Self::load_from_path(user_path).await? {
                info!(path = %user_path.display(), "Loaded user config");
                config = user_config;
            }
        }

        if let Some(project_config) = Self::load_from_path(&self.project_config_path).await? {
            info!(path = %self.project_config_path.display(), "Loaded project config");
            config = project_config;
        }

        Ok(config)
    }

    async fn load_from_path(path: &Path) -> Result<Option<WeftConfig>> {
        if !path.exists() {
            debug!(path = %path.display(), "No config at path");
            return Ok(None);
        }
        let raw = fs::read_to_string(path).await?;
        let config = toml::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(config))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the database path: absolute stays, relative lands in ~/.weft
pub fn resolve_database_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        return path;
    }
    dirs::home_dir()
        .map(|home| home.join(".weft").join(&path))
        .unwrap_or(path)
}
