use tracing::{error, info};

use crate::bluesky::{Notification, ReplyRef, SocialClient};
use crate::sandbox::ExecutionResult;

/// Thread linkage for a reply to `note`. A post that is not itself a
/// reply becomes the root of the new thread.
pub fn reply_ref(note: &Notification) -> ReplyRef {
    let parent = note.strong_ref();
    let root = match note.reply {
        Some(ref reply) => reply.root.clone(),
        None => parent.clone(),
    };
    ReplyRef { root, parent }
}

/// Sends `result` as a reply to `note`. Returns whether it was accepted.
///
/// Failures are logged and never retried: a retry after a timeout could
/// double-post, which is worse than a missing reply.
pub async fn publish(social: &dyn SocialClient, note: &Notification, result: &ExecutionResult) -> bool {
    let reply_to = reply_ref(note);
    let sent = if result.images.is_empty() {
        social.send_post(&result.text, &reply_to).await
    } else {
        social
            .send_images(&result.text, &result.images, &reply_to)
            .await
    };

    match sent {
        Ok(()) => {
            info!(
                "Replied to {} ({} chars, {} images)",
                note.author.handle,
                result.text.chars().count(),
                result.images.len()
            );
            true
        }
        Err(e) => {
            error!("Error sending response to {}: {e}", note.uri);
            false
        }
    }
}
