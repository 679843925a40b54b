use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::fjall::DEFAULT_CHUNK_SIZE;
use crate::backend::Durability;
use crate::cache::DEFAULT_FRAGMENT_SIZE;
use crate::error::BlobstoreError;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Configuration file structure for blobstore.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlobstoreConfig {
    pub cache: CacheConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Bytes per fragment. Fixed for the lifetime of a cache.
    pub fragment_size: u64,
    /// Store bytes fetched from the backend into the cache while reading.
    pub read_through: bool,
    /// Chunk size used when streaming a blob out.
    pub read_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            read_through: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub chunk_size: usize,
    pub durability: Durability,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            durability: Durability::default(),
        }
    }
}

impl BlobstoreConfig {
    /// Load the configuration from a TOML file. Missing keys keep their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, BlobstoreError> {
        let content = fs::read_to_string(path).map_err(|e| {
            BlobstoreError::Config(format!("Failed to read blobstore config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, BlobstoreError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BlobstoreError::Config(format!("Failed to parse blobstore config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BlobstoreError> {
        if self.cache.fragment_size == 0 {
            return Err(BlobstoreError::Config(
                "cache.fragment_size must be positive".to_string(),
            ));
        }
        if self.cache.read_buffer_size == 0 {
            return Err(BlobstoreError::Config(
                "cache.read_buffer_size must be positive".to_string(),
            ));
        }
        if self.storage.chunk_size == 0 {
            return Err(BlobstoreError::Config(
                "storage.chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
