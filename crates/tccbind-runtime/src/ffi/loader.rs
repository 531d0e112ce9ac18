//! Dynamic library loading for the native compiler
//!
//! Resolves short library names (`tcc` → `libtcc.so`) against the
//! platform search paths and loads them with `libloading`.

use libloading::Library;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Library loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    #[error("failed to load library: {0}")]
    LoadFailed(String),
}

/// Library resolver with platform-specific search paths
pub struct LibraryLoader {
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
        }
    }

    /// Standard library locations for the current platform, current
    /// working directory first
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));
            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
                paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
                paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Windows\\System32"));
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Platform file names to try for a short library name
    fn candidate_names(name: &str) -> Vec<String> {
        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };
        let prefixes: &[&str] = if cfg!(target_os = "windows") {
            &["", "lib"]
        } else {
            &["lib", ""]
        };

        let mut names = Vec::new();
        for prefix in prefixes {
            for ext in extensions {
                names.push(format!("{}{}.{}", prefix, name, ext));
            }
        }
        names
    }

    /// Resolve a library name or path to an existing file
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.components().count() > 1 || path.extension().is_some() {
            return path.exists().then(|| path.to_path_buf());
        }

        let candidates = Self::candidate_names(name);
        self.search_paths
            .iter()
            .flat_map(|dir| candidates.iter().map(move |file| dir.join(file)))
            .find(|full| full.exists())
    }

    /// Load a library by short name or path
    ///
    /// Names that are not found on the search paths are handed to the
    /// system loader as a bare platform file name, so `LD_LIBRARY_PATH` and
    /// friends still apply.
    pub fn load(&self, name: &str) -> Result<Library, LoadError> {
        let target = match self.resolve(name) {
            Some(path) => path,
            None => {
                let path = Path::new(name);
                if path.components().count() > 1 {
                    return Err(LoadError::LibraryNotFound(name.to_string()));
                }
                let bare = Self::candidate_names(name)
                    .into_iter()
                    .next()
                    .ok_or_else(|| LoadError::LibraryNotFound(name.to_string()))?;
                PathBuf::from(bare)
            }
        };

        debug!(library = %target.display(), "loading library");
        unsafe { Library::new(&target) }.map_err(|e| {
            if target.is_absolute() || target.components().count() > 1 {
                LoadError::LoadFailed(e.to_string())
            } else {
                LoadError::LibraryNotFound(name.to_string())
            }
        })
    }

    /// Add a custom search path (searched before the defaults)
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.insert(0, path.into());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_search_paths_not_empty() {
        let paths = LibraryLoader::default_search_paths();
        assert!(!paths.is_empty());

        if let Ok(cwd) = std::env::current_dir() {
            assert_eq!(paths[0], cwd);
        }
    }

    #[test]
    fn test_platform_specific_paths() {
        let paths = LibraryLoader::default_search_paths();

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            assert!(paths.iter().any(|p| p == Path::new("/usr/lib")));
        }

        #[cfg(target_os = "windows")]
        {
            assert!(paths
                .iter()
                .any(|p| p.to_string_lossy().contains("System32")));
        }
    }

    #[test]
    fn test_library_not_found() {
        let loader = LibraryLoader::new();
        let result = loader.load("nonexistent_library_xyz");
        assert!(matches!(result, Err(LoadError::LibraryNotFound(_))));
    }

    #[test]
    fn test_missing_explicit_path() {
        let loader = LibraryLoader::new();
        let result = loader.load("/nonexistent/dir/libtcc.so");
        assert!(matches!(result, Err(LoadError::LibraryNotFound(_))));
    }

    #[test]
    fn test_custom_search_path_resolves_first() {
        let dir = tempfile::tempdir().unwrap();
        let file = LibraryLoader::candidate_names("fake")[0].clone();
        fs::write(dir.path().join(&file), b"").unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(dir.path());
        assert_eq!(loader.search_paths()[0], dir.path());
        assert_eq!(loader.resolve("fake"), Some(dir.path().join(file)));
    }

    #[test]
    fn test_invalid_library_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = LibraryLoader::candidate_names("broken")[0].clone();
        fs::write(dir.path().join(&file), b"not a library").unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(dir.path());
        assert!(matches!(
            loader.load("broken"),
            Err(LoadError::LoadFailed(_))
        ));
    }
}
