//! Configuration file discovery, TOML loading and atomic file writes
//!
//! Configuration file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/cellar/cellar.toml` on Linux)
//! 4. `cellar.toml` in the working directory
//!
//! A missing configuration file is not an error: callers get compiled
//! defaults and a warning is logged.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "cellar.toml";

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "CELLAR_CONFIG";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which configuration file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("cellar").join(CONFIG_FILE_NAME)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: Working directory
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    None
}

/// Load a TOML configuration file, falling back to defaults when absent
///
/// A file that exists but cannot be parsed is an error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Configuration file not found, using compiled defaults"
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Default directory for pipeline state (checkpoints, offline batches)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cellar"))
        .unwrap_or_else(|| PathBuf::from("./cellar_data"))
}

/// Write bytes to `path` atomically
///
/// The content goes to a temporary sibling file which is flushed to disk and
/// then renamed over the destination, so readers never observe a partially
/// written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file atomically");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// Read and decode a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: String,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(LoggingConfig::default().level, "info");
        assert!(LoggingConfig::default().file.is_none());
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let loaded: Sample = load_toml_or_default(Some(&missing)).unwrap();
        assert_eq!(loaded, Sample::default());

        let none: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(none, Sample::default());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "name = [unclosed").unwrap();

        let result: Result<Sample> = load_toml_or_default(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_arg_wins() {
        let path = PathBuf::from("/tmp/explicit.toml");
        let resolved = resolve_config_path(Some(&path), "CELLAR_TEST_UNUSED_VAR");
        assert_eq!(resolved, Some(path));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_json_atomic(&path, &serde_json::json!({ "a": 1 })).unwrap();
        write_json_atomic(&path, &serde_json::json!({ "a": 2 })).unwrap();

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["a"], 2);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }
}
