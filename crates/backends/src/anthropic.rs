//! Client for the Anthropic Messages API.

use std::path::Path;

use {
    async_trait::async_trait,
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

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(route: &ApiRoute, base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(route.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: route.model.clone(),
            max_tokens: route.max_tokens,
            temperature: route.temperature,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: "sk-ant-test".into(),
            model: "test-model".into(),
            max_tokens: 700,
            temperature: 0.7,
        }
    }

    async fn complete(&self, content: Vec<ContentBlock>) -> Result<BackendReply> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let body: MessagesResponse = response.json().await?;
        let text = body
            .content
            .into_iter()
            .find_map(|b| b.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(Error::EmptyReply)?;
        debug!(backend = "claude", chars = text.len(), "backend reply");
        Ok(BackendReply { text })
    }
}

#[async_trait]
impl BackendClient for AnthropicClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn send_text(&self, prompt: &str) -> Result<BackendReply> {
        self.complete(vec![ContentBlock::Text {
            text: prompt.to_string(),
        }])
        .await
    }

    async fn send_image(&self, prompt: &str, image: &Path) -> Result<BackendReply> {
        let (encoded, media_type) = encode_image(image).await?;
        self.complete(vec![
            ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type,
                    data: encoded,
                },
            },
            ContentBlock::Text {
                text: prompt.to_string(),
            },
        ])
        .await
    }
}
