//! Shared types and error infrastructure used across all relais crates.

pub mod error;
pub mod types;

pub use {
    error::FromMessage,
    types::{GroupId, InboundMessage, MessageKind, ReplyPayload},
};
