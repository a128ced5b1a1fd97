//! Direct API backends.
//!
//! Each configured backend id maps to an HTTP client speaking that
//! provider's chat API. The API path is fully parallel: no client here
//! touches the shared UI surface or its lock.

mod anthropic;
mod client;
mod error;
mod openai_compat;

pub use {
    anthropic::AnthropicClient,
    client::{BackendClient, BackendReply, build_client},
    error::{Error, Result},
    openai_compat::OpenAiCompatClient,
};
