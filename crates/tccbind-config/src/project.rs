//! Project Configuration (tccbind.toml)
//!
//! Handles project-level configuration stored in `tccbind.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Project configuration from tccbind.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Native compiler settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerConfig>,

    /// Symbol naming templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming: Option<NamingConfig>,
}

/// What the compiler produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Compile into memory and execute in-process
    #[default]
    Memory,
    /// Emit an executable file
    Exe,
    /// Emit a shared library
    Dll,
    /// Emit an object file
    Obj,
    /// Only run the preprocessor
    Preprocess,
}

impl OutputKind {
    /// Parse an output kind from its configuration spelling
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(OutputKind::Memory),
            "exe" => Some(OutputKind::Exe),
            "dll" => Some(OutputKind::Dll),
            "obj" => Some(OutputKind::Obj),
            "preprocess" => Some(OutputKind::Preprocess),
            _ => None,
        }
    }
}

/// Native compiler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// libtcc to load: a short name ("tcc") or a path to the shared library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Directory holding the compiler runtime (libtcc1.a and its headers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib_path: Option<PathBuf>,

    /// User include directories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<PathBuf>,

    /// System include directories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sysinclude_paths: Vec<PathBuf>,

    /// Library search directories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_paths: Vec<PathBuf>,

    /// Libraries to link against
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,

    /// Preprocessor definitions (`NAME = "value"`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defines: BTreeMap<String, String>,

    /// Raw command-line style options passed to the compiler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,

    /// Output mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputKind>,
}

/// Symbol naming templates
///
/// Templates use `{class}`, `{method}`, `{property}`, `{field}`, `{mutator}`
/// and `{args}` tokens, each optionally followed by a format specifier such
/// as `{class:L}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,

    /// Name of the shared handle release symbol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_symbol: Option<String>,
}

impl NamingConfig {
    /// Merge another naming config into this one, field by field
    pub fn merge(&mut self, other: &NamingConfig) {
        if other.method.is_some() {
            self.method = other.method.clone();
        }
        if other.property.is_some() {
            self.property = other.property.clone();
        }
        if other.field.is_some() {
            self.field = other.field.clone();
        }
        if other.constructor.is_some() {
            self.constructor = other.constructor.clone();
        }
        if other.release_symbol.is_some() {
            self.release_symbol = other.release_symbol.clone();
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        let templates = [
            ("naming.method", &self.method),
            ("naming.property", &self.property),
            ("naming.field", &self.field),
            ("naming.constructor", &self.constructor),
        ];
        for (field, template) in templates {
            if let Some(template) = template {
                validate_template(field, template)?;
            }
        }

        if let Some(symbol) = &self.release_symbol {
            if !is_c_identifier(symbol) {
                return Err(ConfigError::InvalidValue {
                    field: "naming.release_symbol".to_string(),
                    reason: format!("'{}' is not a valid C identifier", symbol),
                });
            }
        }

        Ok(())
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(compiler) = &self.compiler {
            if let Some(library) = &compiler.library {
                if library.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "compiler.library".to_string(),
                        reason: "library cannot be empty".to_string(),
                    });
                }
            }

            for name in compiler.defines.keys() {
                if !is_c_identifier(name) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("compiler.defines.{}", name),
                        reason: "macro name must be a C identifier".to_string(),
                    });
                }
            }
        }

        if let Some(naming) = &self.naming {
            naming.validate()?;
        }

        Ok(())
    }

    /// Get the configured output mode, if present
    pub fn output(&self) -> Option<OutputKind> {
        self.compiler.as_ref().and_then(|c| c.output)
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.compiler.is_some() {
            self.compiler = other.compiler.clone();
        }
        match (&mut self.naming, &other.naming) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.naming = Some(theirs.clone()),
            _ => {}
        }
    }
}

/// Check that braces in a template are balanced and name known tokens
fn validate_template(field: &str, template: &str) -> ConfigResult<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("unterminated token in '{}'", template),
        })?;
        let token = after[..close].split(':').next().unwrap_or("");
        if !matches!(
            token,
            "class" | "method" | "property" | "field" | "mutator" | "args"
        ) {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("unknown token '{{{}}}'", token),
            });
        }
        rest = &after[close + 1..];
    }
    Ok(())
}

fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
