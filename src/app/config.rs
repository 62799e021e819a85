//! Application configuration management
//!
//! Loading is lenient: a missing file gives defaults, and a section that
//! fails to parse is logged and replaced by its defaults. `validate` is the
//! strict variant used by `--validate-config`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::error::ConfigError;
use crate::scanner::anticsrf::DEFAULT_TOKEN_NAMES;
use crate::scanner::{ScanPolicy, ScannerParam};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    /// Engine settings
    pub scanner: ScannerParam,

    /// Transport settings
    pub connection: ConnectionParam,

    pub anti_csrf: AntiCsrfParam,

    /// Active scan policy
    pub policy: ScanPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParam {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirect depth when a plugin asks to follow redirects
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Upstream proxy (for chaining)
    pub upstream_proxy: Option<String>,

    pub accept_invalid_certs: bool,
}

impl Default for ConnectionParam {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 10,
            user_agent: format!("Ancarna-Ascan/{}", env!("CARGO_PKG_VERSION")),
            upstream_proxy: None,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCsrfParam {
    /// Field-name fragments that mark a token, matched case-insensitively
    pub token_names: Vec<String>,
}

impl Default for AntiCsrfParam {
    fn default() -> Self {
        Self {
            token_names: DEFAULT_TOKEN_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Typed section; on error, `strict` returns it, otherwise defaults
fn section<T: DeserializeOwned + Default>(table: &Table, name: &str, strict: bool) -> Result<T, ConfigError> {
    let Some(value) = table.get(name) else {
        return Ok(T::default());
    };
    match value.clone().try_into::<T>() {
        Ok(parsed) => Ok(parsed),
        Err(e) if strict => Err(ConfigError::ValidationError {
            field: name.to_string(),
            reason: e.to_string(),
        }),
        Err(e) => {
            tracing::warn!(section = name, error = %e, "Invalid configuration section, using defaults");
            Ok(T::default())
        }
    }
}

/// `policy = "quick"` names a preset, a `[policy]` table spells one out
fn policy_section(table: &Table, strict: bool) -> Result<ScanPolicy, ConfigError> {
    match table.get("policy") {
        Some(Value::String(name)) => match ScanPolicy::preset(name) {
            Some(policy) => Ok(policy),
            None if strict => Err(ConfigError::ValidationError {
                field: "policy".to_string(),
                reason: format!("unknown preset '{}'", name),
            }),
            None => {
                tracing::warn!(preset = %name, "Unknown policy preset, using standard");
                Ok(ScanPolicy::standard())
            }
        },
        _ => section(table, "policy", strict),
    }
}

impl Config {
    /// Load configuration from `path`, or the platform config file
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "No configuration file found, using defaults");
            return Ok(Self::default());
        }

        let contents = read(&config_path)?;
        let config = Self::from_toml(&contents);
        tracing::info!(path = %config_path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse leniently; malformed input gives defaults
    pub fn from_toml(contents: &str) -> Self {
        match contents.parse::<Table>() {
            Ok(table) => Self::from_table(&table, false).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Parse strictly: any syntax or section error is returned
    pub fn validate(path: &Path) -> Result<Self, ConfigError> {
        let contents = read(path)?;
        let table = contents
            .parse::<Table>()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if let Some(scanner) = table.get("scanner") {
            if !scanner.is_table() {
                return Err(ConfigError::ValidationError {
                    field: "scanner".to_string(),
                    reason: "expected a table".to_string(),
                });
            }
        }
        Self::from_table(&table, true)
    }

    fn from_table(table: &Table, strict: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            scanner: ScannerParam::from_table(table.get("scanner").and_then(Value::as_table)),
            connection: section(table, "connection", strict)?,
            anti_csrf: section(table, "anti_csrf", strict)?,
            policy: policy_section(table, strict)?,
        })
    }

    /// Pretty TOML, as written by `save`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };
        let write_error = |source| ConfigError::WriteError {
            path: config_path.display().to_string(),
            source,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(&config_path, self.to_toml()?).map_err(write_error)?;

        tracing::info!(path = %config_path.display(), "Saved configuration");
        Ok(config_path)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "ancarna", "ascan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path (log files)
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "ancarna", "ascan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::AttackStrength;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scanner.host_per_scan(), 2);
        assert_eq!(config.scanner.thread_per_host(), 1);
        assert_eq!(config.scanner.delay_in_ms(), 0);
        assert!(!config.scanner.handle_anti_csrf);
    }

    #[test]
    fn test_sections_and_aliases() {
        let config = Config::from_toml(
            r#"
policy = "quick"

[scanner]
threadPerHost = 4
antiCSFR = true

[connection]
timeout_secs = 5
upstream_proxy = "http://127.0.0.1:8080"

[anti_csrf]
token_names = ["nonce"]
"#,
        );
        assert_eq!(config.scanner.thread_per_host(), 4);
        assert!(config.scanner.handle_anti_csrf);
        assert_eq!(config.connection.timeout_secs, 5);
        assert_eq!(config.connection.max_redirects, 10);
        assert_eq!(config.anti_csrf.token_names, vec!["nonce".to_string()]);
        assert_eq!(config.policy.default_strength, AttackStrength::Low);
    }

    #[test]
    fn test_bad_section_is_defaulted_but_fails_validation() {
        let src = "[connection]\ntimeout_secs = \"soon\"\n\n[scanner]\ndelay_in_ms = 25\n";
        let config = Config::from_toml(src);
        assert_eq!(config.connection, ConnectionParam::default());
        assert_eq!(config.scanner.delay_in_ms(), 25);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, src).unwrap();
        assert!(matches!(
            Config::validate(&path),
            Err(ConfigError::ValidationError { field, .. }) if field == "connection"
        ));
    }

    #[test]
    fn test_malformed_toml_gives_defaults() {
        assert_eq!(Config::from_toml("[scanner\nthreadPerHost = "), Config::default());
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.scanner.set_host_per_scan(5);
        config.scanner.target_params_cookie = true;
        config.policy = ScanPolicy::full();

        config.save(Some(&path)).unwrap();
        let loaded = Config::validate(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
