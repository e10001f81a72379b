// Configuration module
// Reads INI-style tool settings with environment variable overrides

use configparser::ini::Ini;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading a settings file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Settings file parser
/// Keys may live in any section; the unnamed leading section is searched first.
pub struct Config {
    ini: Ini,
    filename: PathBuf,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            ini: Ini::new_cs(),
            filename: PathBuf::new(),
            env_prefix: String::new(),
        }
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "MoveMapGen_")
    pub fn set_source(&mut self, filename: impl AsRef<Path>, env_prefix: &str) -> Result<(), ConfigError> {
        self.filename = filename.as_ref().to_path_buf();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(&self.filename).map_err(|e| ConfigError::Read {
            path: self.filename.clone(),
            message: e.to_string(),
        })?;
        self.ini = Ini::new_cs();
        self.ini.read(content).map_err(ConfigError::Parse)?;
        Ok(())
    }

    /// Parse settings from an in-memory string
    pub fn load_str(&mut self, content: &str, env_prefix: &str) -> Result<(), ConfigError> {
        self.env_prefix = env_prefix.to_string();
        self.ini = Ini::new_cs();
        self.ini.read(content.to_string()).map_err(ConfigError::Parse)?;
        Ok(())
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a string value (empty string default)
    pub fn get_string(&self, key: &str) -> String {
        self.get_string_default(key, "")
    }

    /// Get a boolean value with a default
    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => {
                let lower = val.to_lowercase();
                matches!(lower.as_str(), "1" | "true" | "yes")
            }
            None => default,
        }
    }

    /// Get an integer value with a default
    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Get a float value with a default
    pub fn get_float_default(&self, key: &str, default: f32) -> f32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Get a comma separated list. Entries that fail to parse are dropped.
    pub fn get_list<T: FromStr>(&self, key: &str) -> Option<Vec<T>> {
        let raw = self.get_env_or_config(key)?;
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect(),
        )
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        let map = self.ini.get_map_ref();
        let value = map
            .get("default")
            .and_then(|section| section.get(key))
            .or_else(|| map.values().find_map(|section| section.get(key)))
            .cloned()
            .flatten()?;

        Some(strip_quotes(value.trim()).to_string())
    }
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_int_default("nonexistent", 42), 42);
        assert_eq!(config.get_string_default("nonexistent", "hello"), "hello");
        assert!(config.get_bool_default("nonexistent", true));
        assert!(config.get_list::<u32>("nonexistent").is_none());
    }

    #[test]
    fn test_values_and_lists() {
        let mut config = Config::new();
        config
            .load_str(
                "MapsDir = \"./maps\"\nThreads = 4\n\n[Skip]\nSkipJunkIds = 13, 25,x, 29\n",
                "",
            )
            .unwrap();
        assert_eq!(config.get_string("MapsDir"), "./maps");
        assert_eq!(config.get_int_default("Threads", 1), 4);
        assert_eq!(config.get_list::<u32>("SkipJunkIds"), Some(vec![13, 25, 29]));
        assert!(config.is_set("Threads"));
        assert!(!config.is_set("LogsDir"));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movemapgen.conf");
        std::fs::write(&path, "LogLevel = 2\nSkipLiquid = yes\n").unwrap();

        let mut config = Config::new();
        config.set_source(&path, "").unwrap();
        assert_eq!(config.get_int_default("LogLevel", 0), 2);
        assert!(config.get_bool_default("SkipLiquid", false));

        let mut missing = Config::new();
        assert!(missing.set_source(dir.path().join("absent.conf"), "").is_err());
    }
}
