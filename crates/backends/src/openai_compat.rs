//! Client for OpenAI-compatible chat-completions APIs.
//!
//! Covers `openai`, `grok` (x.ai), `perplexity`, and `gemini` (through
//! Google's OpenAI-compatibility endpoint), which share the wire
//! format and differ only in endpoint and reply hygiene.

use std::{path::Path, sync::LazyLock};

use {
    async_trait::async_trait,
    regex::Regex,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    crate::{
        client::{BackendClient, BackendReply, encode_image},
        error::{Error, Result},
    },
    relais_config::ApiRoute,
};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\[\d+\]").unwrap()
});

#[derive(Debug)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    /// Perplexity embeds `[n]` citation markers in reply text.
    strip_citations: bool,
}

impl OpenAiCompatClient {
    pub fn new(
        route: &ApiRoute,
        base_url: String,
        api_key: String,
        strip_citations: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(route.request_timeout())
            .build()?;
        Ok(Self {
            client,
            name: route.backend.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: route.model.clone(),
            max_tokens: route.max_tokens,
            temperature: route.temperature,
            strip_citations,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str, strip_citations: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: "openai".into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: "sk-test".into(),
            model: "test-model".into(),
            max_tokens: 700,
            temperature: 0.7,
            strip_citations,
        }
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<BackendReply> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(Error::EmptyReply)?;

        let text = if self.strip_citations {
            CITATION.replace_all(&text, "").trim().to_string()
        } else {
            text
        };
        debug!(backend = %self.name, chars = text.len(), "backend reply");
        Ok(BackendReply { text })
    }
}

#[async_trait]
impl BackendClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_text(&self, prompt: &str) -> Result<BackendReply> {
        self.complete(vec![Message {
            role: "user",
            content: MessageContent::Text(prompt.to_string()),
        }])
        .await
    }

    async fn send_image(&self, prompt: &str, image: &Path) -> Result<BackendReply> {
        let (encoded, media_type) = encode_image(image).await?;
        self.complete(vec![Message {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{media_type};base64,{encoded}"),
                    },
                },
            ]),
        }])
        .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn chat_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn send_text_returns_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(chat_body("Hello there"))
            .create_async()
            .await;

        let client = OpenAiCompatClient::for_tests(&server.url(), false);
        let reply = client.send_text("hi").await.unwrap();
        assert_eq!(reply.text, "Hello there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn perplexity_citations_are_stripped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body("Rust is fast[1] and safe[2]."))
            .create_async()
            .await;

        let client = OpenAiCompatClient::for_tests(&server.url(), true);
        let reply = client.send_text("hi").await.unwrap();
        assert_eq!(reply.text, "Rust is fast and safe.");
    }

    #[tokio::test]
    async fn rate_limit_is_transient_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = OpenAiCompatClient::for_tests(&server.url(), false);
        let err = client.send_text("hi").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 429, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bad_request_is_not_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad model")
            .create_async()
            .await;

        let client = OpenAiCompatClient::for_tests(&server.url(), false);
        let err = client.send_text("hi").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn empty_content_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body("   "))
            .create_async()
            .await;

        let client = OpenAiCompatClient::for_tests(&server.url(), false);
        let err = client.send_text("hi").await.unwrap_err();
        assert!(matches!(err, Error::EmptyReply));
    }

    #[tokio::test]
    async fn send_image_attaches_data_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"messages":[{"role":"user","content":[{"type":"text","text":"describe"}]}]}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(chat_body("a tiny png"))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pic.png");
        std::fs::write(&image, [0x89, 0x50, 0x4e, 0x47]).unwrap();

        let client = OpenAiCompatClient::for_tests(&server.url(), false);
        let reply = client.send_image("describe", &image).await.unwrap();
        assert_eq!(reply.text, "a tiny png");
        mock.assert_async().await;
    }
}
