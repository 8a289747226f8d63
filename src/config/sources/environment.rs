//! Environment variable source: GENTABLE__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
/// `GENTABLE__SESSION__IDLE_TIMEOUT_MS=5000` sets `session.idle_timeout_ms`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("GENTABLE")
            .separator("__")
            .try_parsing(true),
    ))
}
