//! Configuration loading and precedence tests

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tccbind_config::{ConfigError, ConfigLoader, OutputKind, ProjectConfig};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("tccbind.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn write_global(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("global.toml");
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Loading
// ============================================================================

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(!config.is_project());
    assert_eq!(config.library(), "tcc");
    assert_eq!(config.output(), None);
}

#[test]
#[serial]
fn test_load_with_empty_config() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(config.is_project());
}

#[test]
#[serial]
fn test_load_from_deep_subdirectory() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[compiler]
libraries = ["m", "pthread"]
"#,
    );

    let sub2 = temp_dir.path().join("sub1").join("sub2");
    fs::create_dir_all(&sub2).unwrap();

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(&sub2).unwrap();

    assert_eq!(config.project_root(), Some(temp_dir.path()));
    assert_eq!(
        config.compiler().libraries,
        vec!["m".to_string(), "pthread".to_string()]
    );
}

#[test]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[compiler\nlibrary = 1");

    match ProjectConfig::load_from_file(&path) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_unknown_section_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[package]\nname = \"x\"\n");

    assert!(ProjectConfig::load_from_file(&path).is_err());
}

#[test]
fn test_missing_file_is_not_found() {
    let result = ProjectConfig::load_from_file(Path::new("/definitely/not/here/tccbind.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[rstest]
#[case("memory", OutputKind::Memory)]
#[case("exe", OutputKind::Exe)]
#[case("dll", OutputKind::Dll)]
#[case("obj", OutputKind::Obj)]
#[case("preprocess", OutputKind::Preprocess)]
fn test_output_kinds_parse_from_toml(#[case] spelling: &str, #[case] expected: OutputKind) {
    let toml = format!("[compiler]\noutput = \"{}\"\n", spelling);
    let config: ProjectConfig = toml::from_str(&toml).unwrap();
    assert_eq!(config.output(), Some(expected));
}

#[rstest]
#[case("{class:L}_{method")]
#[case("{receiver}_{method}")]
fn test_bad_naming_template_rejected(#[case] template: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(
        temp_dir.path(),
        &format!("[naming]\nmethod = \"{}\"\n", template),
    );

    assert!(matches!(
        ProjectConfig::load_from_file(&path),
        Err(ConfigError::InvalidValue { .. })
    ));
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
#[serial]
fn test_global_defaults_used_when_project_silent() {
    let temp_dir = TempDir::new().unwrap();
    let global = write_global(
        temp_dir.path(),
        r#"
[defaults]
library = "/usr/local/lib/libtcc.so"
lib_path = "/usr/local/lib/tcc"
"#,
    );

    let mut loader = ConfigLoader::with_global_path(global);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.library(), "/usr/local/lib/libtcc.so");
    assert_eq!(config.lib_path(), Some(PathBuf::from("/usr/local/lib/tcc")));
}

#[test]
#[serial]
fn test_project_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    let global = write_global(
        temp_dir.path(),
        r#"
[defaults]
library = "/usr/local/lib/libtcc.so"

[naming]
method = "{class}_{method}"
release_symbol = "global_free"
"#,
    );
    create_config_file(
        temp_dir.path(),
        r#"
[compiler]
library = "vendor/libtcc.so"

[naming]
release_symbol = "project_free"
"#,
    );

    let mut loader = ConfigLoader::with_global_path(global);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.library(), "vendor/libtcc.so");
    let naming = config.naming();
    assert_eq!(naming.method.as_deref(), Some("{class}_{method}"));
    assert_eq!(naming.release_symbol.as_deref(), Some("project_free"));
}

#[test]
#[serial]
fn test_env_overrides_project() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[compiler]
library = "vendor/libtcc.so"
lib_path = "vendor/lib"
"#,
    );

    env::set_var("TCCBIND_LIBRARY", "/env/libtcc.so");
    env::set_var("TCCBIND_LIB_PATH", "/env/lib");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path());

    env::remove_var("TCCBIND_LIBRARY");
    env::remove_var("TCCBIND_LIB_PATH");

    let config = config.unwrap();
    assert_eq!(config.library(), "/env/libtcc.so");
    assert_eq!(config.lib_path(), Some(PathBuf::from("/env/lib")));
}

#[test]
#[serial]
fn test_project_lib_path_resolves_against_root() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[compiler]
lib_path = "vendor/tcc"
"#,
    );

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.lib_path(), Some(temp_dir.path().join("vendor/tcc")));
}
