//! Global Configuration (~/.tccbind/config.toml)
//!
//! Handles user-level defaults stored in `~/.tccbind/config.toml`.

use crate::project::NamingConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.tccbind/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Naming templates applied to every project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming: Option<NamingConfig>,
}

/// Default settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Where libtcc lives on this machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Compiler runtime directory on this machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib_path: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if let Some(library) = &defaults.library {
                if library.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "defaults.library".to_string(),
                        reason: "library cannot be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Get the global config file path (~/.tccbind/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".tccbind").join("config.toml"))
    }

    /// Get the default libtcc location
    pub fn default_library(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.library.as_deref())
    }

    /// Get the default compiler runtime directory
    pub fn default_lib_path(&self) -> Option<&Path> {
        self.defaults.as_ref().and_then(|d| d.lib_path.as_deref())
    }
}
