//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/tidyzone/config.toml)
//! 3. Project config (.tidyzone/config.toml)
//! 4. Environment variables (TIDYZONE_*)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
