//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`RouterConfig`], and run
//! validation before returning. [`load`] is the startup entry point: file
//! (or defaults), then environment overrides, then validation.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::RouterConfig;

/// Load a [`RouterConfig`] from a TOML file.
///
/// Environment overrides are not applied; see [`load`].
///
/// # Returns
///
/// - `Ok(RouterConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<RouterConfig, ConfigError> {
    let config = read_toml(path)?;
    check(&config)?;
    Ok(config)
}

/// Load a [`RouterConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<RouterConfig, ConfigError> {
    let config: RouterConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    check(&config)?;
    Ok(config)
}

/// Startup loader: read `path` if given (defaults otherwise), apply
/// `QUERY_ROUTER_*` environment overrides, then validate.
///
/// # Errors
///
/// Any [`ConfigError`] from reading, parsing, overrides or validation.
pub fn load(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    let mut config = match path {
        Some(p) => read_toml(p)?,
        None => RouterConfig::default(),
    };
    config.apply_env_overrides()?;
    check(&config)?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<RouterConfig, ConfigError> {
    let file = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: file.clone(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse { file, source: e })
}

fn check(config: &RouterConfig) -> Result<(), ConfigError> {
    validation::validate(config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
ml_enabled = true
initial_complexity_threshold = 6.0
cache_ttl_seconds = 120
remote_timeout_ms = 1500
cache_capacity = 500
remote_base_url = "http://localhost:8090"

[weights]
statistical_term = 3.0
advanced_cutoff = 8.0

[adaptive]
interval_secs = 10
min_samples = 10
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert!((config.initial_complexity_threshold - 6.0).abs() < f64::EPSILON);
        assert_eq!(config.cache_capacity, 500);
        assert_eq!(config.adaptive.interval_secs, 10);
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let err = load_from_str("not valid toml [[[", "bad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_from_str_wrong_type_returns_parse_error() {
        let err = load_from_str("cache_ttl_seconds = \"soon\"", "typed.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_validation_failure_returns_validation_error() {
        let err = load_from_str(
            "remote_timeout_ms = 0\ntelemetry_capacity = 0",
            "zero.toml",
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(msg) => {
                assert!(msg.contains("remote_timeout_ms"));
                assert!(msg.contains("telemetry_capacity"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("router.toml");
        let mut f = std::fs::File::create(&path).expect("test: create file");
        f.write_all(VALID_TOML.as_bytes()).expect("test: write");
        drop(f);

        let config = load_from_file(&path).expect("test: load");
        assert_eq!(config.remote_base_url.as_deref(), Some("http://localhost:8090"));
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("absent.toml");
        let err = load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        // only meaningful when no QUERY_ROUTER_* variables are set
        if std::env::vars().any(|(k, _)| k.starts_with("QUERY_ROUTER_")) {
            return;
        }
        let config = load(None).expect("test: defaults");
        assert_eq!(config, RouterConfig::default());
    }
}
