//! Driver seam over the browser-automation sidecar.
//!
//! The core never speaks WebDriver. It talks to a small HTTP sidecar that
//! owns the actual browser session; [`SurfaceDriver`] is the trait seam so
//! tests can script a surface without a sidecar running.

use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    crate::error::{Error, Result},
    relais_common::{InboundMessage, ReplyPayload},
};

/// Operations the orchestrator needs from the shared UI.
///
/// Selector strings are opaque here; they come from per-group config and are
/// passed through to the sidecar unchanged.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// Bring the named surface (tab) to the foreground.
    async fn switch_to(&self, surface: &str) -> Result<()>;

    /// New, not-yet-seen messages in a chat group, oldest first.
    async fn poll_inbound(&self, group: &str) -> Result<Vec<InboundMessage>>;

    /// Texts of all reply elements matching `selector`, oldest first.
    async fn reply_texts(&self, selector: &str) -> Result<Vec<String>>;

    /// Type a prompt into the element at `selector` and submit it.
    async fn submit_prompt(&self, selector: &str, prompt: &str) -> Result<()>;

    /// Attach a local image file via the upload element at `selector`.
    async fn attach_image(&self, selector: &str, path: &Path) -> Result<()>;

    /// Deliver a finished reply back to a chat group.
    async fn deliver(&self, group: &str, payload: &ReplyPayload) -> Result<()>;
}

/// HTTP client for the automation sidecar.
#[derive(Clone)]
pub struct SidecarDriver {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SwitchRequest<'a> {
    surface: &'a str,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    selector: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct AttachRequest<'a> {
    selector: &'a str,
    path: &'a Path,
}

#[derive(Deserialize)]
struct InboundResponse {
    messages: Vec<InboundMessage>,
}

#[derive(Deserialize)]
struct RepliesResponse {
    texts: Vec<String>,
}

impl SidecarDriver {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map sidecar status codes onto the error taxonomy.
    ///
    /// 404 means an element was not found (UI mid-render) and 409 means the
    /// sidecar is busy with another command; both clear up on the next cycle.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::transient(body))
            },
            status if status.is_success() => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::message(format!("sidecar returned {status}: {body}")))
            },
        }
    }
}

#[async_trait]
impl SurfaceDriver for SidecarDriver {
    async fn switch_to(&self, surface: &str) -> Result<()> {
        debug!(surface, "switching surface");
        let response = self
            .client
            .post(self.url("/switch"))
            .json(&SwitchRequest { surface })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn poll_inbound(&self, group: &str) -> Result<Vec<InboundMessage>> {
        let response = self
            .client
            .get(self.url("/inbound"))
            .query(&[("group", group)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: InboundResponse = response.json().await?;
        Ok(body.messages)
    }

    async fn reply_texts(&self, selector: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/replies"))
            .query(&[("selector", selector)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: RepliesResponse = response.json().await?;
        Ok(body.texts)
    }

    async fn submit_prompt(&self, selector: &str, prompt: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&PromptRequest {
                selector,
                text: prompt,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn attach_image(&self, selector: &str, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "attaching image");
        let response = self
            .client
            .post(self.url("/attach"))
            .json(&AttachRequest { selector, path })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn deliver(&self, group: &str, payload: &ReplyPayload) -> Result<()> {
        debug!(group, "delivering reply");
        let response = self
            .client
            .post(self.url("/deliver"))
            .json(&serde_json::json!({
                "group": group,
                "text": payload.text,
                "image_path": payload.image_path,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
