use async_trait::async_trait;
use tracing::info;

use super::{BatchContext, NotificationHandler};
use crate::bluesky::Notification;
use crate::bot::{context, filter, shebang};
use crate::sandbox::ExecutionResult;

/// Runs `#! @<bot> <language>` requests in the sandbox.
///
/// The shebang, including the addressee check, is validated before any
/// context is fetched or code is run.
pub struct CodeExecutionHandler;

#[async_trait]
impl NotificationHandler for CodeExecutionHandler {
    fn name(&self) -> &str {
        "code_execution"
    }

    fn matches(&self, note: &Notification) -> bool {
        filter::starts_with_shebang(note)
    }

    async fn handle(
        &self,
        note: &Notification,
        cx: &BatchContext<'_>,
    ) -> anyhow::Result<ExecutionResult> {
        let command = match shebang::parse_for(&note.text, cx.bot_handle) {
            Ok(command) => command,
            Err(e) => {
                info!("Rejected request from {}: {e:?}", note.author.handle);
                return Ok(ExecutionResult::text(e.to_string()));
            }
        };

        let reply_context = if context::injects_context(&command.language) {
            context::fetch_reply_context(cx.social, note).await
        } else {
            None
        };
        let program = context::compose(
            &command.language,
            &command.body,
            reply_context.as_ref(),
            cx.bot_handle,
        );

        info!("Executing {} code for {}", command.language, note.author.handle);
        Ok(cx.sandbox.execute(&program, &command.language).await)
    }
}
