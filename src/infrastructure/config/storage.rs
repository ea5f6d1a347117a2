//! Locations pixcache resolves on disk: the config file and the cache directory.

use super::app_config::AppConfig;
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const CONFIG_FILE_NAME: &str = "config.toml";
const CACHE_SUBDIR: &str = "images";

/// Errors raised while locating, reading or writing configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "linuxmobile", "pixcache")
}

/// Cache directory used when none is configured. Falls back to the system
/// temp directory when no home directory is known.
pub(crate) fn default_cache_dir() -> PathBuf {
    project_dirs().map_or_else(
        || std::env::temp_dir().join("pixcache").join(CACHE_SUBDIR),
        |dirs| dirs.cache_dir().join(CACHE_SUBDIR),
    )
}

/// Resolved config file and disk cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_file: PathBuf,
    cache_dir: PathBuf,
}

impl AppPaths {
    /// Resolves the platform locations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigDirNotFound` if no home directory is known.
    pub fn resolve() -> Result<Self, ConfigError> {
        let dirs = project_dirs().ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(Self {
            config_file: dirs.config_dir().join(CONFIG_FILE_NAME),
            cache_dir: dirs.cache_dir().join(CACHE_SUBDIR),
        })
    }

    /// Places both locations under `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            config_file: root.join(CONFIG_FILE_NAME),
            cache_dir: root.join("cache").join(CACHE_SUBDIR),
        }
    }

    /// Returns the config file path.
    #[must_use]
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Returns the disk cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Loads the configuration from `path_override` or the resolved config
    /// file, writing defaults if it is missing. A malformed file yields the
    /// defaults. An unset cache directory resolves to [`cache_dir`](Self::cache_dir).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the defaults cannot be written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let path = path_override.unwrap_or(self.config_file.as_path());

        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                AppConfig::default()
            })
        } else {
            info!(path = %path.display(), "Config file not found, creating default");
            let config = AppConfig::default();
            save_to_file(path, &config)?;
            config
        };

        config
            .cache
            .cache_dir
            .get_or_insert_with(|| self.cache_dir.clone());
        Ok(config)
    }

    /// Saves the configuration to the resolved config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be written.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        save_to_file(&self.config_file, config)
    }
}

fn save_to_file(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("Invalid path"))?;
    fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
