use std::{path::Path, sync::Arc};

use {async_trait::async_trait, secrecy::ExposeSecret};

use {
    crate::{
        anthropic::AnthropicClient,
        error::{Error, Result},
        openai_compat::OpenAiCompatClient,
    },
    relais_config::ApiRoute,
};

/// A completed backend response.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub text: String,
}

/// One provider's chat API.
#[async_trait]
pub trait BackendClient: Send + Sync + std::fmt::Debug {
    /// Backend id, e.g. `openai`.
    fn name(&self) -> &str;

    /// Send a text prompt and return the reply.
    async fn send_text(&self, prompt: &str) -> Result<BackendReply>;

    /// Send a prompt alongside a local image file.
    async fn send_image(&self, prompt: &str, image: &Path) -> Result<BackendReply>;
}

/// Default endpoints per backend id.
fn default_base_url(backend: &str) -> Option<&'static str> {
    match backend {
        "openai" => Some("https://api.openai.com/v1"),
        "grok" => Some("https://api.x.ai/v1"),
        "perplexity" => Some("https://api.perplexity.ai"),
        "gemini" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "claude" => Some("https://api.anthropic.com/v1"),
        _ => None,
    }
}

/// Construct the client for an API route.
///
/// `openai`, `grok`, `perplexity`, and `gemini` all speak the OpenAI
/// chat-completions dialect and differ only in endpoint (Gemini via Google's
/// OpenAI-compatibility layer); Perplexity replies additionally get their
/// inline `[n]` citations stripped. `claude` speaks the Anthropic Messages
/// API.
pub fn build_client(route: &ApiRoute) -> Result<Arc<dyn BackendClient>> {
    let base_url = match route.base_url.as_deref() {
        Some(url) => url.to_string(),
        None => default_base_url(&route.backend)
            .ok_or_else(|| Error::UnknownBackend {
                name: route.backend.clone(),
            })?
            .to_string(),
    };
    let api_key = route
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().clone())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::MissingApiKey {
            name: route.backend.clone(),
        })?;

    match route.backend.as_str() {
        "openai" | "grok" | "gemini" => Ok(Arc::new(OpenAiCompatClient::new(
            route, base_url, api_key, false,
        )?)),
        "perplexity" => Ok(Arc::new(OpenAiCompatClient::new(
            route, base_url, api_key, true,
        )?)),
        "claude" => Ok(Arc::new(AnthropicClient::new(route, base_url, api_key)?)),
        other => Err(Error::UnknownBackend {
            name: other.to_string(),
        }),
    }
}

/// Media type for an image attachment, from the file extension.
pub(crate) fn image_media_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Read an image file and encode it as a base64 data URL.
pub(crate) async fn encode_image(path: &Path) -> Result<(String, &'static str)> {
    use base64::Engine;

    let bytes = tokio::fs::read(path).await?;
    let media_type = image_media_type(path);
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok((encoded, media_type))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn api_route(backend: &str, key: Option<&str>) -> ApiRoute {
        let key_line = key
            .map(|k| format!("api_key = \"{k}\"\n"))
            .unwrap_or_default();
        toml::from_str(&format!(
            "backend = \"{backend}\"\n{key_line}model = \"m\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn factory_builds_known_backends() {
        for backend in ["openai", "grok", "perplexity", "gemini", "claude"] {
            let client = build_client(&api_route(backend, Some("sk-test"))).unwrap();
            assert_eq!(client.name(), backend);
        }
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        let err = build_client(&api_route("bard", Some("sk-test"))).unwrap_err();
        assert!(matches!(err, Error::UnknownBackend { name } if name == "bard"));
    }

    #[test]
    fn factory_rejects_missing_api_key() {
        let err = build_client(&api_route("openai", None)).unwrap_err();
        assert!(matches!(err, Error::MissingApiKey { .. }));
    }

    #[test]
    fn media_type_from_extension() {
        assert_eq!(image_media_type(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(image_media_type(Path::new("a.png")), "image/png");
        assert_eq!(image_media_type(Path::new("a")), "image/png");
    }
}
