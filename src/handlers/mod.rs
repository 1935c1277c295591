//! Per-notification handlers.
//!
//! The dispatch loop is handler-agnostic: for each eligible notification
//! it asks the [`HandlerRegistry`] for the first handler whose
//! `matches()` accepts it, and publishes whatever that handler returns.

pub mod code_execution;
pub mod registry;

use async_trait::async_trait;

use crate::bluesky::{Notification, SocialClient};
use crate::sandbox::{ExecutionResult, SandboxManager};

pub use code_execution::CodeExecutionHandler;
pub use registry::HandlerRegistry;

/// Resources shared by every item of one batch.
pub struct BatchContext<'a> {
    pub social: &'a dyn SocialClient,
    pub sandbox: &'a SandboxManager,
    /// The bot's own handle, without the leading `@`.
    pub bot_handle: &'a str,
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn matches(&self, note: &Notification) -> bool;

    /// Produces the reply for `note`. Errors that escape are turned into
    /// a generic error reply by the dispatcher.
    async fn handle(
        &self,
        note: &Notification,
        cx: &BatchContext<'_>,
    ) -> anyhow::Result<ExecutionResult>;
}
