use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::RelaisConfig};

/// Serialization formats a config file may use, keyed by extension.
#[derive(Debug, Clone, Copy)]
enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Extension table, in discovery priority order.
    const EXTENSIONS: &'static [(&'static str, ConfigFormat)] = &[
        ("toml", ConfigFormat::Toml),
        ("yaml", ConfigFormat::Yaml),
        ("yml", ConfigFormat::Yaml),
        ("json", ConfigFormat::Json),
    ];

    fn from_path(path: &Path) -> Option<ConfigFormat> {
        let ext = path.extension()?.to_str()?;
        Self::EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|&(_, format)| format)
    }

    fn parse(self, raw: &str) -> anyhow::Result<RelaisConfig> {
        let config = match self {
            ConfigFormat::Toml => toml::from_str(raw)?,
            ConfigFormat::Yaml => serde_yaml::from_str(raw)?,
            ConfigFormat::Json => serde_json::from_str(raw)?,
        };
        Ok(config)
    }
}

/// Load config from `path`, inferring the format from its extension.
///
/// `${ENV_VAR}` placeholders in the raw text are expanded before parsing.
pub fn load_config(path: &Path) -> anyhow::Result<RelaisConfig> {
    let format = ConfigFormat::from_path(path)
        .with_context(|| format!("unsupported config format: {}", path.display()))?;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    format
        .parse(&substitute_env(&raw))
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relais.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relais/relais.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `RelaisConfig::default()` when nothing is found or the
/// discovered file fails to load.
pub fn discover_and_load() -> RelaisConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return RelaisConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    load_config(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
        RelaisConfig::default()
    })
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    candidate_paths().find(|p| p.exists())
}

/// Every path discovery will consider, project-local first.
fn candidate_paths() -> impl Iterator<Item = PathBuf> {
    let names = ConfigFormat::EXTENSIONS
        .iter()
        .map(|(ext, _)| format!("relais.{ext}"));
    let local = names.clone().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(move |dir| names.clone().map(move |name| dir.join(name)));
    local.chain(global)
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "relais")
}

/// Returns the user-global config directory (`~/.config/relais/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory (`~/.local/share/relais/`).
///
/// Default location for the dedup cache file.
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}
