//! Configuration loading
//!
//! Reads a JSON5 config file, substitutes `${VAR}` environment references in
//! string values, and deserializes into the typed [`Config`]. A missing file
//! yields the defaults.

mod defaults;

pub use defaults::{Config, LogFormatSetting, LogSettings, MemoryStoreConfig};

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Get the config file path.
/// Priority: CHATMETA_CONFIG_PATH > CHATMETA_STATE_DIR/chatmeta.json5 > ~/.chatmeta/chatmeta.json5
/// Falls back to .json extension if the .json5 file doesn't exist.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("CHATMETA_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    let dir = match env::var("CHATMETA_STATE_DIR") {
        Ok(state_dir) => PathBuf::from(state_dir),
        Err(_) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatmeta"),
    };
    let json5 = dir.join("chatmeta.json5");
    if json5.exists() {
        return json5;
    }
    dir.join("chatmeta.json")
}

/// Load the config from the default location.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load the config at `path`. Returns defaults if the file doesn't exist.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        debug!(target: "config", path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config(&content, path)
}

/// Parse config text. `path` is only used for error messages.
pub fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
    let mut value: Value = json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    substitute_env_vars(&mut value)?;

    let config: Config = serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let store = &config.memory_store;
    if store.busy_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            path: "memoryStore.busyTimeoutMs".into(),
            message: "must be greater than zero".into(),
        });
    }
    if store.lock_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            path: "memoryStore.lockTimeoutMs".into(),
            message: "must be greater than zero".into(),
        });
    }
    if store.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError {
            path: "memoryStore.path".into(),
            message: "must not be empty".into(),
        });
    }
    Ok(())
}

/// Recursively substitute environment variables in string values
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute environment variables in a single string.
///
/// `${VAR}` is replaced with the variable's value; `$${VAR}` is an escape
/// that yields a literal `${VAR}`.
fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid")
    });

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn parse(content: &str) -> Result<Config, ConfigError> {
        parse_config(content, Path::new("test.json5"))
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_json5_syntax() {
        let config = parse(
            r#"{
                // comments and trailing commas are fine
                memoryStore: {
                    path: "/var/lib/chatmeta/messages.db",
                    lockTimeoutMs: 1500,
                },
                log: { level: "debug", format: "json" },
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.memory_store.path,
            PathBuf::from("/var/lib/chatmeta/messages.db")
        );
        assert_eq!(config.memory_store.lock_timeout(), Duration::from_millis(1500));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormatSetting::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chatmeta.json5");
        fs::write(&path, r#"{ memoryStore: { busyTimeoutMs: 42 } }"#).unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.memory_store.busy_timeout_ms, 42);
    }

    #[test]
    fn test_parse_error() {
        let err = parse("{ memoryStore: ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = parse(r#"{ memoryStore: { lockTimeoutMs: 0 } }"#).unwrap_err();
        match err {
            ConfigError::ValidationError { path, .. } => {
                assert_eq!(path, "memoryStore.lockTimeoutMs")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_substitution() {
        env::set_var("CHATMETA_TEST_STORE_DIR", "/srv/meta");
        let config = parse(r#"{ memoryStore: { path: "${CHATMETA_TEST_STORE_DIR}/m.db" } }"#)
            .unwrap();
        assert_eq!(config.memory_store.path, PathBuf::from("/srv/meta/m.db"));
    }

    #[test]
    fn test_env_substitution_escape() {
        assert_eq!(
            substitute_env_in_string("literal $${NOT_SET_ANYWHERE}").unwrap(),
            "literal ${NOT_SET_ANYWHERE}"
        );
    }

    #[test]
    fn test_missing_env_var() {
        let err = substitute_env_in_string("${CHATMETA_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar { var } if var == "CHATMETA_TEST_DEFINITELY_UNSET"));
    }
}
