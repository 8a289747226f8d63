//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::GenTableConfig;
use crate::error::ApiError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, the global file, an optional explicit file, and the
    /// environment, then validate the result.
    pub fn load(explicit: Option<&Path>) -> Result<GenTableConfig, ApiError> {
        let config = MergeService::load(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific file over defaults, with the environment on top.
    pub fn load_from_file(path: &Path) -> Result<GenTableConfig, ApiError> {
        let config = MergeService::load_layers(None, Some(path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default() -> GenTableConfig {
        GenTableConfig::default()
    }
}
