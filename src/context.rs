//! Runtime configuration of the import pipeline.

use std::time::Duration;

use crate::{
    cache::{DEFAULT_CAPACITY, ModelCache},
    resources::archive::MAX_PACKAGE_BYTES,
};

pub const CACHE_CAPACITY_VAR: &str = "SCENE_IMPORT_CACHE_CAPACITY";
pub const PART_TIMEOUT_VAR: &str = "SCENE_IMPORT_PART_TIMEOUT_MS";
pub const PACKAGE_TIMEOUT_VAR: &str = "SCENE_IMPORT_PACKAGE_TIMEOUT_MS";
pub const MAX_PACKAGE_BYTES_VAR: &str = "SCENE_IMPORT_MAX_PACKAGE_BYTES";

#[derive(Clone, Debug, PartialEq)]
pub struct ImportConfig {
    pub cache_capacity: usize,
    /// Per mesh fetch. Expiry skips the part.
    pub part_timeout: Duration,
    /// Scene description or single-mesh fetch. Expiry fails the import.
    pub package_timeout: Duration,
    /// Upload size and total inflated archive size.
    pub max_package_bytes: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            part_timeout: Duration::from_secs(15),
            package_timeout: Duration::from_secs(60),
            max_package_bytes: MAX_PACKAGE_BYTES,
        }
    }
}

impl ImportConfig {
    /// Defaults, overridden by the `SCENE_IMPORT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ImportConfig::from_env`] with a custom variable source.
    /// Unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(capacity) = read_number(&lookup, CACHE_CAPACITY_VAR) {
            config.cache_capacity = capacity.max(1) as usize;
        }
        if let Some(ms) = read_number(&lookup, PART_TIMEOUT_VAR) {
            config.part_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_number(&lookup, PACKAGE_TIMEOUT_VAR) {
            config.package_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = read_number(&lookup, MAX_PACKAGE_BYTES_VAR) {
            config.max_package_bytes = bytes;
        }
        config
    }

    /// An empty cache sized by `cache_capacity`.
    pub fn model_cache(&self) -> ModelCache {
        ModelCache::new(self.cache_capacity)
    }
}

fn read_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("ignoring {key}={raw:?}: {err}");
            None
        }
    }
}
