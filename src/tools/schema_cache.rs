//! Discovered-schema cache
//!
//! Generated command schemas are memoized as JSON files so repeated
//! discovery of the same command skips the help fetch and the LM call.
//! Entries older than the TTL are treated as absent.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::sanitize_component;

/// Entries older than this are treated as absent
pub const SCHEMA_TTL_DAYS: i64 = 7;

/// A cached command schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSchema {
    pub command: String,
    pub schema: serde_json::Value,
    pub help_text: String,
    pub generated_at: DateTime<Utc>,
}

/// File-backed schema cache
pub struct SchemaCache {
    cache_dir: PathBuf,
    // Serializes read-modify-write sequences on the cache directory
    lock: Mutex<()>,
}

impl SchemaCache {
    /// Create a cache rooted at the given directory
    pub fn new(cache_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            lock: Mutex::new(()),
        })
    }

    /// Retrieve a cached schema if present and not expired
    pub fn get(&self, command: &str) -> Option<CachedSchema> {
        let _guard = self.guard();
        let path = self.schema_path(command);
        let data = std::fs::read_to_string(&path).ok()?;
        let schema: CachedSchema = serde_json::from_str(&data).ok()?;

        if Utc::now() - schema.generated_at > Duration::days(SCHEMA_TTL_DAYS) {
            debug!(%command, "get: cached schema expired");
            return None;
        }

        Some(schema)
    }

    /// Store a schema, stamping the generation time
    pub fn set(&self, mut schema: CachedSchema) -> std::io::Result<()> {
        let _guard = self.guard();
        schema.generated_at = Utc::now();

        let data = serde_json::to_string_pretty(&schema)?;
        std::fs::write(self.schema_path(&schema.command), data)
    }

    /// All cached command names
    pub fn list(&self) -> Vec<String> {
        let _guard = self.guard();
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };

        let mut commands: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        commands.sort();
        commands
    }

    /// Remove all cached schemas
    pub fn clear(&self) -> std::io::Result<()> {
        let _guard = self.guard();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    fn schema_path(&self, command: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", sanitize_component(command)))
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Default cache location under the config directory
pub fn default_cache_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("cache").join("schemas")
}
