//! Merge policy: the lowest-precedence layer holds the built-in defaults.

use crate::config::GenTableConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with the serialized default configuration.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&GenTableConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
