//! Configuration loading, validation, and env substitution.
//!
//! Config files: `relais.toml`, `relais.yaml`, or `relais.json`,
//! searched in `./` then `~/.config/relais/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::{
        ApiRoute, CacheConfig, EvictionConfig, GroupConfig, MediaConfig, PollerConfig,
        PromptTemplates, RelaisConfig, RouteConfig, StabilizeConfig, SurfaceConfig,
        SurfaceRoute, SurfaceSelectors,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
