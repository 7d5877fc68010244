use serde::{Deserialize, Serialize};

/// Default embedding width
const DEFAULT_DIMENSIONS: usize = 128;
/// Default number of inserts between background index saves
const DEFAULT_SAVE_INTERVAL: u64 = 10;
/// Default bound on the tokenizer result cache
const DEFAULT_TOKEN_CACHE_SIZE: usize = 1000;
/// Default persistence file name
const DEFAULT_INDEX_FILENAME: &str = "problem_vector_index.bin";

/// Configuration for the retrieval engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Embedding vector width
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Persist the index after every N-th insert
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,

    /// Maximum number of cached tokenizations (0 disables the cache)
    #[serde(default = "default_token_cache_size")]
    pub token_cache_size: usize,

    /// File name of the persisted index, relative to the engine's base directory
    #[serde(default = "default_index_filename")]
    pub index_filename: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            save_interval: DEFAULT_SAVE_INTERVAL,
            token_cache_size: DEFAULT_TOKEN_CACHE_SIZE,
            index_filename: DEFAULT_INDEX_FILENAME.to_string(),
        }
    }
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_save_interval() -> u64 {
    DEFAULT_SAVE_INTERVAL
}

fn default_token_cache_size() -> usize {
    DEFAULT_TOKEN_CACHE_SIZE
}

fn default_index_filename() -> String {
    DEFAULT_INDEX_FILENAME.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dimensions must be between 1 and 65535, got {0}")]
    Dimensions(usize),

    #[error("save_interval must be at least 1")]
    SaveInterval,

    #[error("index_filename must not be empty")]
    IndexFilename,
}

impl RetrievalConfig {
    /// Validate the configuration before it is used to open an engine.
    ///
    /// The dimension upper bound comes from the persistence format, which
    /// stores the width as a u16.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 || self.dimensions > u16::MAX as usize {
            return Err(ConfigError::Dimensions(self.dimensions));
        }
        if self.save_interval == 0 {
            return Err(ConfigError::SaveInterval);
        }
        if self.index_filename.is_empty() {
            return Err(ConfigError::IndexFilename);
        }
        Ok(())
    }
}
