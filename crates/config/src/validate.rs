//! Configuration validation engine.
//!
//! Deserialization already rejects unknown fields; this layer adds the
//! semantic checks that serde cannot express — missing credentials, empty
//! selectors, zero intervals, misspelled backend names.

use std::path::Path;

use secrecy::ExposeSecret;

use crate::schema::{RelaisConfig, RouteConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "type-error", "credentials", "route", "timing",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "groups.Sales.route.backend"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Backend ids the factory knows how to construct.
const KNOWN_BACKENDS: &[&str] = &["openai", "claude", "gemini", "grok", "perplexity"];

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb {
                0
            } else {
                1
            };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = if let Some(p) = path {
        Some(p.to_path_buf())
    } else {
        crate::loader::find_config_file()
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match crate::loader::load_config(actual_path) {
        Ok(config) => {
            let mut result = validate_config(&config);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to load config: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Run semantic checks on a parsed config (no file-system side effects;
/// useful for tests and for startup validation of an already-loaded config).
#[must_use]
pub fn validate_config(config: &RelaisConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    check_timing(config, &mut diagnostics);
    check_groups(config, &mut diagnostics);

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_timing(config: &RelaisConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.poller.interval_secs == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timing",
            path: "poller.interval_secs".into(),
            message: "poll interval must be at least 1 second".into(),
        });
    }

    if config.surface.stabilize.stable_checks == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timing",
            path: "surface.stabilize.stable_checks".into(),
            message: "stable_checks must be at least 1".into(),
        });
    }

    if config.surface.stabilize.poll_interval_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timing",
            path: "surface.stabilize.poll_interval_ms".into(),
            message: "stabilizer poll interval must be at least 1ms".into(),
        });
    }

    if config.surface.lock_ceiling_secs <= config.surface.lock_timeout_secs {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "timing",
            path: "surface.lock_ceiling_secs".into(),
            message: format!(
                "lock ceiling ({}s) should exceed the lock acquire timeout ({}s)",
                config.surface.lock_ceiling_secs, config.surface.lock_timeout_secs
            ),
        });
    }

    if config.media.max_image_kb == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timing",
            path: "media.max_image_kb".into(),
            message: "image size budget must be non-zero".into(),
        });
    }

    if config.cache.eviction.max_entries == Some(0) {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timing",
            path: "cache.eviction.max_entries".into(),
            message: "max_entries of 0 would evict everything; omit it to disable eviction".into(),
        });
    }
}

fn check_groups(config: &RelaisConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.groups.is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "route",
            path: "groups".into(),
            message: "no groups configured; every inbound message will be ignored".into(),
        });
    }

    for (name, group) in &config.groups {
        let base = format!("groups.{name}.route");
        match &group.route {
            RouteConfig::Api(route) => {
                if !KNOWN_BACKENDS.contains(&route.backend.as_str()) {
                    let msg = match suggest(&route.backend, KNOWN_BACKENDS, 3) {
                        Some(s) => format!("unknown backend (did you mean \"{s}\"?)"),
                        None => format!(
                            "unknown backend; expected one of: {}",
                            KNOWN_BACKENDS.join(", ")
                        ),
                    };
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "route",
                        path: format!("{base}.backend"),
                        message: msg,
                    });
                }

                match route.api_key.as_ref().map(|k| k.expose_secret().as_str()) {
                    None | Some("") => {
                        diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            category: "credentials",
                            path: format!("{base}.api_key"),
                            message: "api_key is missing or empty".into(),
                        });
                    },
                    // An unresolved `${VAR}` means the env var was absent at load time.
                    Some(key) if key.contains("${") => {
                        diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            category: "credentials",
                            path: format!("{base}.api_key"),
                            message: format!("api_key contains an unresolved placeholder: {key}"),
                        });
                    },
                    Some(_) => {},
                }

                if route.model.is_empty() {
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "route",
                        path: format!("{base}.model"),
                        message: "model must not be empty".into(),
                    });
                }
            },
            RouteConfig::Surface(route) => {
                if route.surface.is_empty() {
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "route",
                        path: format!("{base}.surface"),
                        message: "surface name must not be empty".into(),
                    });
                }
                if route.selectors.input.is_empty() {
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "route",
                        path: format!("{base}.selectors.input"),
                        message: "input selector must not be empty".into(),
                    });
                }
                if route.selectors.response.is_empty() {
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "route",
                        path: format!("{base}.selectors.response"),
                        message: "response selector must not be empty".into(),
                    });
                }
            },
        }

        let templates = group.route.templates();
        if !templates.text.contains("{message}") {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "route",
                path: format!("{base}.templates.text"),
                message: "text template has no {message} placeholder; \
                          the inbound message will not reach the backend"
                    .into(),
            });
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> RelaisConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn levenshtein_identical() {
        assert_eq!(levenshtein("openai", "openai"), 0);
    }

    #[test]
    fn levenshtein_single_edit() {
        assert_eq!(levenshtein("claude", "clade"), 1);
        assert_eq!(levenshtein("grok", "gork"), 2);
    }

    #[test]
    fn suggest_finds_close_match() {
        assert_eq!(suggest("openia", KNOWN_BACKENDS, 3), Some("openai"));
        assert_eq!(suggest("perplexty", KNOWN_BACKENDS, 3), Some("perplexity"));
    }

    #[test]
    fn suggest_returns_none_for_distant() {
        assert_eq!(suggest("xxxxxxxxx", KNOWN_BACKENDS, 3), None);
    }

    #[test]
    fn default_config_warns_about_missing_groups() {
        let result = validate_config(&RelaisConfig::default());
        assert!(!result.has_errors());
        let warning = result
            .diagnostics
            .iter()
            .find(|d| d.category == "route" && d.path == "groups");
        assert!(warning.is_some(), "expected warning for empty group table");
    }

    #[test]
    fn valid_api_group_has_no_errors() {
        let cfg = parse(
            r#"
            [groups."Sales".route]
            mode = "api"
            backend = "openai"
            api_key = "sk-test"
            model = "gpt-4o-mini"
        "#,
        );
        let result = validate_config(&cfg);
        assert!(!result.has_errors(), "got: {:?}", result.diagnostics);
    }

    #[test]
    fn misspelled_backend_is_error_with_suggestion() {
        let cfg = parse(
            r#"
            [groups."Sales".route]
            mode = "api"
            backend = "openia"
            api_key = "sk-test"
            model = "gpt-4o-mini"
        "#,
        );
        let result = validate_config(&cfg);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "groups.Sales.route.backend")
            .unwrap();
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("openai"), "message: {}", d.message);
    }

    #[test]
    fn missing_api_key_is_error() {
        let cfg = parse(
            r#"
            [groups."Sales".route]
            mode = "api"
            backend = "claude"
            model = "claude-sonnet-4-20250514"
        "#,
        );
        let result = validate_config(&cfg);
        assert!(result.has_errors());
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "credentials")
            .unwrap();
        assert_eq!(d.path, "groups.Sales.route.api_key");
    }

    #[test]
    fn unresolved_placeholder_api_key_is_error() {
        let cfg = parse(
            r#"
            [groups."Sales".route]
            mode = "api"
            backend = "grok"
            api_key = "${GROK_API_KEY}"
            model = "grok-3"
        "#,
        );
        let result = validate_config(&cfg);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "credentials")
            .unwrap();
        assert!(d.message.contains("unresolved"), "message: {}", d.message);
    }

    #[test]
    fn empty_surface_selectors_are_errors() {
        let cfg = parse(
            r#"
            [groups."Support".route]
            mode = "surface"
            surface = "Gemini"
            [groups."Support".route.selectors]
            input = ""
            response = ""
        "#,
        );
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn template_without_placeholder_is_warned() {
        let cfg = parse(
            r#"
            [groups."Sales".route]
            mode = "api"
            backend = "openai"
            api_key = "sk-test"
            model = "gpt-4o-mini"
            [groups."Sales".route.templates]
            text = "always say hello"
            image = "describe"
        "#,
        );
        let result = validate_config(&cfg);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "groups.Sales.route.templates.text");
        assert!(d.is_some_and(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn zero_intervals_are_errors() {
        let mut cfg = RelaisConfig::default();
        cfg.poller.interval_secs = 0;
        cfg.surface.stabilize.stable_checks = 0;
        cfg.surface.stabilize.poll_interval_ms = 0;
        let result = validate_config(&cfg);
        assert!(result.count(Severity::Error) >= 3);
    }

    #[test]
    fn lock_ceiling_below_timeout_is_warned() {
        let mut cfg = RelaisConfig::default();
        cfg.surface.lock_timeout_secs = 60;
        cfg.surface.lock_ceiling_secs = 30;
        let result = validate_config(&cfg);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "surface.lock_ceiling_secs");
        assert!(d.is_some_and(|d| d.severity == Severity::Warning));
    }
}
