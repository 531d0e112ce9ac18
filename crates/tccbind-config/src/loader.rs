//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{CompilerConfig, NamingConfig, OutputKind, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_FILE: &str = "tccbind.toml";

/// Library name used when nothing else is configured
pub const DEFAULT_LIBRARY: &str = "tcc";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.tccbind/config.toml) - lowest priority
/// 2. Project config (./tccbind.toml) - overrides global
/// 3. Environment variables (TCCBIND_*) - overrides project
/// 4. Explicit session calls - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where tccbind.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads global defaults from an explicit path
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find tccbind.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        let global_config = self.load_global_config().unwrap_or_default();

        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.tccbind/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognized variables: TCCBIND_LIBRARY, TCCBIND_LIB_PATH, TCCBIND_OUTPUT
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(library) = env::var("TCCBIND_LIBRARY") {
            config
                .compiler
                .get_or_insert_with(CompilerConfig::default)
                .library = Some(library);
        }

        if let Ok(lib_path) = env::var("TCCBIND_LIB_PATH") {
            config
                .compiler
                .get_or_insert_with(CompilerConfig::default)
                .lib_path = Some(PathBuf::from(lib_path));
        }

        if let Ok(output) = env::var("TCCBIND_OUTPUT") {
            let kind = OutputKind::parse(&output).ok_or_else(|| ConfigError::InvalidValue {
                field: "TCCBIND_OUTPUT".to_string(),
                reason: format!(
                    "'{}' is not one of memory, exe, dll, obj, preprocess",
                    output
                ),
            })?;
            config
                .compiler
                .get_or_insert_with(CompilerConfig::default)
                .output = Some(kind);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the global configuration directory (~/.tccbind)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".tccbind"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Effective libtcc location (project > global > default)
    pub fn library(&self) -> &str {
        self.project
            .compiler
            .as_ref()
            .and_then(|c| c.library.as_deref())
            .or_else(|| self.global.default_library())
            .unwrap_or(DEFAULT_LIBRARY)
    }

    /// Effective compiler runtime directory (project > global)
    pub fn lib_path(&self) -> Option<PathBuf> {
        self.project
            .compiler
            .as_ref()
            .and_then(|c| c.lib_path.as_deref())
            .map(|p| self.resolve(p))
            .or_else(|| self.global.default_lib_path().map(Path::to_path_buf))
    }

    /// Effective output mode, if one is configured
    pub fn output(&self) -> Option<OutputKind> {
        self.project.output()
    }

    /// Compiler settings with relative directories resolved against the project root
    pub fn compiler(&self) -> CompilerConfig {
        let mut compiler = self.project.compiler.clone().unwrap_or_default();
        compiler.library = Some(self.library().to_string());
        compiler.lib_path = self.lib_path();
        for list in [
            &mut compiler.include_paths,
            &mut compiler.sysinclude_paths,
            &mut compiler.library_paths,
        ] {
            for path in list.iter_mut() {
                *path = self.resolve(path);
            }
        }
        compiler
    }

    /// Naming templates (global, then project on top)
    pub fn naming(&self) -> NamingConfig {
        let mut naming = self.global.naming.clone().unwrap_or_default();
        if let Some(project) = &self.project.naming {
            naming.merge(project);
        }
        naming
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has tccbind.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
