//! CLI Common Utilities
//!
//! Configuration and storage setup shared by command handlers.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ConfigLoader};
use crate::storage::{Database, SharedDatabase};
use crate::types::Result;

/// Load configuration from an explicit file, or the layered default chain
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Open the configured database read-side, if it exists yet
pub fn open_database(config: &Config) -> Result<Option<SharedDatabase>> {
    let path = &config.storage.database_path;
    if !path.exists() {
        return Ok(None);
    }

    let db = Database::open(path)?;
    db.initialize()?;
    Ok(Some(Arc::new(db)))
}
