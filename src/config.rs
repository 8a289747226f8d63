//! Configuration Management
//!
//! Layered configuration for the generation engine: built-in defaults, the
//! global `config.toml`, an explicit file, and `GENTABLE__*` environment
//! overrides, merged with the `config` crate.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::provider::ProviderConfig;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenTableConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// HTTP backend; required only for live generation
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

impl GenTableConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        self.session.validate().map_err(ApiError::ConfigError)?;
        if let Some(provider) = &self.provider {
            provider.validate().map_err(ApiError::ConfigError)?;
        }
        Ok(())
    }

    pub fn provider(&self) -> Result<&ProviderConfig, ApiError> {
        self.provider.as_ref().ok_or_else(|| {
            ApiError::ProviderNotConfigured(
                "Add a [provider] section with an endpoint to the configuration".to_string(),
            )
        })
    }
}
