//! Config schema: polling loop, surface/lock/stabilizer knobs, dedup cache,
//! image pipeline, and the per-group routing table.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
};

/// Top-level configuration, loaded once at startup and read-only after.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaisConfig {
    pub poller: PollerConfig,
    pub surface: SurfaceConfig,
    pub cache: CacheConfig,
    pub media: MediaConfig,
    /// Group name → routing configuration. Immutable during a run.
    pub groups: BTreeMap<String, GroupConfig>,
}

/// Main-loop timing and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    /// Base sleep between poll cycles, in seconds.
    pub interval_secs: u64,
    /// Scale the sleep up with the number of in-flight tasks.
    pub adaptive: bool,
    /// Upper bound for the adaptive sleep, in seconds.
    pub max_interval_secs: u64,
    /// Run temp-image cleanup every this many loop iterations.
    pub cleanup_every: u64,
    /// How long to wait for in-flight tasks on shutdown before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            adaptive: false,
            max_interval_secs: 30,
            cleanup_every: 120,
            shutdown_grace_secs: 15,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs.max(self.interval_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Shared UI surface: sidecar endpoint, lock discipline, stabilizer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    /// Base URL of the browser-automation sidecar.
    pub sidecar_url: String,
    /// Name of the chat surface (where inbound messages arrive).
    pub chat_surface: String,
    /// How long a caller waits for the surface lock before skipping a cycle.
    pub lock_timeout_secs: u64,
    /// A lock held longer than this is force-released by the watchdog.
    pub lock_ceiling_secs: u64,
    pub stabilize: StabilizeConfig,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "http://127.0.0.1:8975".into(),
            chat_surface: "whatsapp".into(),
            lock_timeout_secs: 10,
            lock_ceiling_secs: 60,
            stabilize: StabilizeConfig::default(),
        }
    }
}

impl SurfaceConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_ceiling(&self) -> Duration {
        Duration::from_secs(self.lock_ceiling_secs)
    }
}

/// Response-stabilization knobs (UI path only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StabilizeConfig {
    /// Overall deadline for a reply to appear and stop changing, in seconds.
    pub max_response_wait_secs: u64,
    /// Interval between reply polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// The reply text must be identical across this many consecutive polls.
    pub stable_checks: u32,
    /// Case-insensitive substrings marking a reply as still rendering.
    pub generating_markers: Vec<String>,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            max_response_wait_secs: 90,
            poll_interval_ms: 500,
            stable_checks: 3,
            generating_markers: vec!["typing…".into(), "thinking…".into(), "generating".into()],
        }
    }
}

impl StabilizeConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_response_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Dedup cache backing file and eviction policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Backing file. Defaults to `<data dir>/cache.json`.
    pub path: Option<PathBuf>,
    pub eviction: EvictionConfig,
}

/// Eviction is off by default: the cache file doubles as an audit trail
/// of every processed fingerprint. Set either bound to make it finite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvictionConfig {
    pub max_entries: Option<usize>,
    pub max_age_secs: Option<u64>,
}

/// Temp image store and compression budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    /// Managed temp directory. Defaults to `<system tmp>/relais_images`.
    pub dir: Option<PathBuf>,
    /// Size budget for images submitted to backends, in kilobytes.
    pub max_image_kb: u64,
    /// Temp files older than this are deleted by the periodic cleanup.
    pub max_age_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_image_kb: 500,
            max_age_secs: 3600,
        }
    }
}

impl MediaConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Per-group configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub route: RouteConfig,
}

/// How replies are generated for a group: a direct backend API call
/// (parallelizable, no surface lock) or driving an AI surface through
/// the shared UI (globally serialized).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", deny_unknown_fields)]
pub enum RouteConfig {
    Api(ApiRoute),
    Surface(SurfaceRoute),
}

impl RouteConfig {
    pub fn templates(&self) -> &PromptTemplates {
        match self {
            Self::Api(r) => &r.templates,
            Self::Surface(r) => &r.templates,
        }
    }
}

/// API-backed route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiRoute {
    /// Backend id: `openai`, `claude`, `gemini`, `grok`, or `perplexity`.
    pub backend: String,
    #[serde(default, serialize_with = "serialize_secret")]
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Override the backend's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub templates: PromptTemplates,
}

impl ApiRoute {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use secrecy::ExposeSecret;
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn default_max_tokens() -> u32 {
    700
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    60
}

/// UI-automation route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceRoute {
    /// Surface (tab) name the sidecar switches to for this group.
    pub surface: String,
    pub selectors: SurfaceSelectors,
    #[serde(default)]
    pub templates: PromptTemplates,
}

/// CSS selectors, opaque to the core — passed through to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceSelectors {
    pub input: String,
    pub response: String,
    #[serde(default)]
    pub file_upload: Option<String>,
}

/// Prompt templates with a `{message}` placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptTemplates {
    pub text: String,
    pub image: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            text: "Respond in 350 characters or fewer, suitable for a chat message: {message}"
                .into(),
            image: "Describe this image in 60 characters or fewer, short but detailed.".into(),
        }
    }
}

impl PromptTemplates {
    /// Render the text template, substituting `{message}`.
    pub fn render_text(&self, message: &str) -> String {
        self.text.replace("{message}", message)
    }

    /// The image template is sent as-is alongside the attached image.
    pub fn render_image(&self) -> String {
        self.image.clone()
    }
}
