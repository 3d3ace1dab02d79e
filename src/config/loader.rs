//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/tidyzone/config.toml)
//! 3. Project config (.tidyzone/config.toml)
//! 4. Environment variables (TIDYZONE_* prefix, `__` separates nesting)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{Result, TidyError};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific file (plus env overrides)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(TidyError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Config> {
        // TIDYZONE_SCHEDULER__WORKERS -> scheduler.workers
        let config: Config = figment
            .merge(Env::prefixed("TIDYZONE_").split("__").lowercase(true))
            .extract()
            .map_err(|e| TidyError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory: $XDG_CONFIG_HOME/tidyzone, else the platform default
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|p| PathBuf::from(p).join("tidyzone"))
            .or_else(|| {
                ProjectDirs::from("", "", "tidyzone").map(|dirs| dirs.config_dir().to_path_buf())
            })
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".tidyzone")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    pub fn show_config(config: &Config, as_json: bool) -> Result<()> {
        if as_json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| TidyError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            TidyError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_global_config())?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }
        Ok(config_path)
    }

    pub fn init_project(force: bool) -> Result<PathBuf> {
        let project_dir = Self::project_dir();
        fs::create_dir_all(project_dir.join("snapshots"))?;

        let config_path = Self::project_config_path();
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        }
        Ok(config_path)
    }

    fn default_global_config() -> String {
        r#"# tidyzone global configuration
# Project settings in .tidyzone/config.toml override these.

version = "1.0"

[scheduler]
workers = 2
queue_limit = 32

[cache]
ttl_secs = 300
"#
        .to_string()
    }

    fn default_project_config() -> String {
        r#"# tidyzone project configuration

version = "1.0"

[capture]
kind = "file"
base_dir = ".tidyzone/snapshots"

[[zones]]
name = "kitchen"
camera = "kitchen.jpg"
task_list = "kitchen"
purpose = "Cooking and dining area"
ignore_rules = ["fruit bowl on the counter"]
interval_secs = 3600

[[providers]]
name = "openai"
kind = "openai"
model = "gpt-4o-mini"
priority = 0

[[providers]]
name = "local"
kind = "ollama"
model = "llava"
priority = 1
requires_key = false

[[api_keys]]
id = "primary"
key_env = "OPENAI_API_KEY"
providers = ["openai"]
daily_limit = 1000
minute_limit = 15
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, ConfigLoader::default_project_config()).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.zones[0].ignore_rules.len(), 1);
        assert_eq!(config.providers.len(), 2);
        assert!(!config.providers[1].requires_key);
        assert_eq!(config.api_keys[0].key_env.as_deref(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigLoader::load_from_file(Path::new("/nonexistent/tidyzone.toml"));
        assert!(matches!(err, Err(TidyError::Config(_))));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[scheduler]\nworkers = 0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_env_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "version = \"1.0\"\n").unwrap();

        // SAFETY: This test runs in isolation
        unsafe {
            env::set_var("TIDYZONE_CACHE__TTL_SECS", "42");
        }
        let config = ConfigLoader::load_from_file(&path).unwrap();
        unsafe {
            env::remove_var("TIDYZONE_CACHE__TTL_SECS");
        }
        assert_eq!(config.cache.ttl_secs, 42);
    }

    #[test]
    fn test_default_global_config_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, ConfigLoader::default_global_config()).unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.scheduler.workers, 2);
    }
}
