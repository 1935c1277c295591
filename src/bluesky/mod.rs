pub mod client;
pub mod types;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::backoff::Retriable;

pub use client::BlueskyClient;
pub use types::{Notification, Post, Reason, ReplyRef};

/// Errors from the social network transport.
#[derive(Debug)]
pub enum TransportError {
    /// Network failure, 5xx, rate limiting. Worth retrying.
    Transient(String),
    /// Credentials rejected or session unrecoverable.
    Auth(String),
    /// Malformed request or response. Retrying will not help.
    Config(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Transient(msg) => write!(f, "transient transport error: {msg}"),
            TransportError::Auth(msg) => write!(f, "authentication error: {msg}"),
            TransportError::Config(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Failures that did not come from the transport are retried.
impl Retriable for anyhow::Error {
    fn is_retriable(&self) -> bool {
        self.downcast_ref::<TransportError>()
            .map_or(true, TransportError::is_retriable)
    }
}

/// How a session changed after an authentication-affecting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChangeKind {
    Created,
    Refreshed,
    Expired,
}

/// Emitted by the transport on its session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub kind: SessionChangeKind,
    /// Opaque serialized session
    pub session: String,
}

/// The social network capabilities the dispatch engine relies on.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Authenticates (reusing a persisted session when possible) and
    /// returns the bot's own handle.
    async fn login(&self) -> Result<String>;

    async fn list_notifications(&self, timeout: Duration) -> Result<Vec<Notification>>;

    async fn update_seen(&self, seen_at: &str, timeout: Duration) -> Result<()>;

    /// Current time in the format `update_seen` expects.
    fn current_time_iso(&self) -> String;

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Post>>;

    async fn send_post(&self, text: &str, reply_to: &ReplyRef) -> Result<()>;

    async fn send_images(&self, text: &str, images: &[Vec<u8>], reply_to: &ReplyRef)
        -> Result<()>;

    /// Cheap authenticated call used as a health check.
    async fn get_profile(&self, handle: &str) -> Result<()>;
}
