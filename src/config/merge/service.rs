//! MergeService: orchestrates sources, applies merge policy, deserializes to GenTableConfig.

use super::policy;
use crate::config::paths::xdg_root;
use crate::config::sources::{environment, global_file};
use crate::config::GenTableConfig;
use config::{ConfigError, File};
use std::path::Path;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<GenTableConfig, ConfigError> {
        let global = xdg_root::global_config_path().ok();
        Self::load_layers(global.as_deref(), explicit)
    }

    /// Same ordering with the global file location supplied by the caller.
    pub fn load_layers(
        global: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<GenTableConfig, ConfigError> {
        let mut builder = policy::builder_with_defaults()?;
        if let Some(global) = global {
            builder = global_file::add_to_builder(builder, global)?;
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }
        let builder = environment::add_to_builder(builder)?;

        builder.build()?.try_deserialize()
    }
}
