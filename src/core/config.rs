// src/core/config.rs

use crate::core::common::MTreeError;
use serde::{Deserialize, Serialize};
use std::fs; // For reading file
use std::path::Path;

/// Smallest node capacity: two entries plus the transient overflow slot.
pub const MIN_CAPACITY: usize = 3;

/// Smallest page that can hold a frame length prefix and a node header.
pub const MIN_PAGE_SIZE: usize = 64;

/// Configuration for an M-Tree index.
///
/// A node of capacity `c` holds at most `c - 1` entries; the last slot is
/// only used while an overflowing node waits to be split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MTreeConfig {
    /// Size in bytes of one page of a persistent page file.
    pub page_size: usize,
    /// Capacity of directory nodes.
    pub dir_capacity: usize,
    /// Capacity of leaf nodes.
    pub leaf_capacity: usize,
    /// Run the consistency checker after every insert (debug builds only).
    pub verify_after_mutation: bool,
}

/// Builder for `MTreeConfig`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    page_size: Option<usize>,
    dir_capacity: Option<usize>,
    leaf_capacity: Option<usize>,
    verify_after_mutation: Option<bool>,
}

impl ConfigBuilder {
    /// Creates a new ConfigBuilder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size
    #[must_use]
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the directory node capacity
    #[must_use]
    pub fn dir_capacity(mut self, capacity: usize) -> Self {
        self.dir_capacity = Some(capacity);
        self
    }

    /// Sets the leaf node capacity
    #[must_use]
    pub fn leaf_capacity(mut self, capacity: usize) -> Self {
        self.leaf_capacity = Some(capacity);
        self
    }

    /// Sets both node capacities
    #[must_use]
    pub fn capacity(self, capacity: usize) -> Self {
        self.dir_capacity(capacity).leaf_capacity(capacity)
    }

    /// Enables or disables verification after each mutation
    #[must_use]
    pub fn verify_after_mutation(mut self, enabled: bool) -> Self {
        self.verify_after_mutation = Some(enabled);
        self
    }

    /// Builds the config with validation
    pub fn build(self) -> Result<MTreeConfig, MTreeError> {
        let defaults = MTreeConfig::default();
        let config = MTreeConfig {
            page_size: self.page_size.unwrap_or(defaults.page_size),
            dir_capacity: self.dir_capacity.unwrap_or(defaults.dir_capacity),
            leaf_capacity: self.leaf_capacity.unwrap_or(defaults.leaf_capacity),
            verify_after_mutation: self.verify_after_mutation.unwrap_or(defaults.verify_after_mutation),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for MTreeConfig {
    fn default() -> Self {
        Self { page_size: 4096, dir_capacity: 32, leaf_capacity: 32, verify_after_mutation: false }
    }
}

impl MTreeConfig {
    /// Creates a new ConfigBuilder for fluent configuration
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), MTreeError> {
        if self.dir_capacity < MIN_CAPACITY {
            return Err(MTreeError::Configuration(format!(
                "dir_capacity {} is too small. Minimum capacity is {}.",
                self.dir_capacity, MIN_CAPACITY
            )));
        }
        if self.leaf_capacity < MIN_CAPACITY {
            return Err(MTreeError::Configuration(format!(
                "leaf_capacity {} is too small. Minimum capacity is {}.",
                self.leaf_capacity, MIN_CAPACITY
            )));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(MTreeError::Configuration(format!(
                "page_size {} is too small. Minimum page size is {}.",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if i32::try_from(self.dir_capacity.max(self.leaf_capacity)).is_err() {
            return Err(MTreeError::Configuration(
                "node capacity must fit a 32-bit entry counter".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `MTreeError::Configuration` if the file cannot be parsed or fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self, MTreeError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents).map_err(|e| {
                    MTreeError::Configuration(format!(
                        "Failed to parse config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(MTreeError::Io(e)),
        }
    }

    /// Loads configuration from an optional TOML file path.
    pub fn load_or_default(optional_path: Option<&Path>) -> Result<Self, MTreeError> {
        match optional_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Creates a configuration for testing: tiny nodes and verification on.
    pub fn for_testing() -> Result<Self, MTreeError> {
        Self::builder().page_size(1024).capacity(4).verify_after_mutation(true).build()
    }
}
