use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of a configured conversation thread on the chat surface.
pub type GroupId = String;

/// What kind of content a detected message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// One unit of new content detected on the chat surface.
///
/// For `Text` the content is the message body. For `Image` it is an
/// opaque source reference (a data URL or an already-saved local path);
/// the reference, not the downloaded bytes, is what gets fingerprinted
/// for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub group: GroupId,
    pub kind: MessageKind,
    pub content: String,
}

/// The outcome of routing a message: what to deliver back to the chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: Option<String>,
    pub image_path: Option<PathBuf>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_path: None,
        }
    }

    /// A successful reply must carry at least one of text or image.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty()) || self.image_path.is_some()
    }
}
