//! Config Command
//!
//! Usage:
//!   tidyzone config show [-f json]
//!   tidyzone config path
//!   tidyzone config init [-g] [--force]

use crate::cli::ui::Output;
use crate::config::{Config, ConfigLoader};
use crate::types::Result;

/// Show the effective configuration (API key values are never printed)
pub fn show(config: &Config, format: &str) -> Result<()> {
    ConfigLoader::show_config(config, format == "json")
}

pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

pub fn init(global: bool, force: bool) -> Result<()> {
    let output = Output::new();
    let path = if global {
        ConfigLoader::init_global(force)?
    } else {
        ConfigLoader::init_project(force)?
    };
    output.success(&format!("Configuration ready at {}", path.display()));
    Ok(())
}
