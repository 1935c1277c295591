//! Injects thread context into executed programs.
//!
//! For languages that support it, the user's code is prefixed with a
//! small preamble that defines a `bsky` variable holding the parent and
//! root posts of the thread (or `None`), and a `say_hello()` routine.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bluesky::{Notification, SocialClient};

/// Author and text of one post in the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPost {
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub parent: ContextPost,
    pub root: ContextPost,
}

/// Languages that receive a context preamble.
pub fn injects_context(language: &str) -> bool {
    language == "python"
}

/// Fetches the parent and root posts a reply points at. Any failure
/// yields `None` so execution can still go ahead.
pub async fn fetch_reply_context(
    social: &dyn SocialClient,
    note: &Notification,
) -> Option<ReplyContext> {
    let reply = note.reply.as_ref()?;
    let uris = vec![reply.parent.uri.clone(), reply.root.uri.clone()];

    let posts = match social.get_posts(&uris).await {
        Ok(posts) => posts,
        Err(e) => {
            warn!("Error getting reply context: {e}");
            return None;
        }
    };

    let find = |uri: &str| {
        posts.iter().find(|p| p.uri == uri).map(|p| ContextPost {
            author: p.author.clone(),
            text: p.text.clone(),
        })
    };
    match (find(&reply.parent.uri), find(&reply.root.uri)) {
        (Some(parent), Some(root)) => Some(ReplyContext { parent, root }),
        _ => {
            warn!("Reply context incomplete for {}, running without it", note.uri);
            None
        }
    }
}

pub fn greeting(bot_handle: &str) -> String {
    format!(
        "HELLO WORLD!\n\n\
         I AM A BOT THAT WILL EXECUTE YOUR CODE.\n\
         PUT THIS ON THE FIRST LINE OF YOUR POST:\n\
         #! @{bot_handle} python\n\
         AND THEN WRITE YOUR CODE.\n\n\
         BE KIND AND ENJOY!"
    )
}

/// Python source defining `bsky` and `say_hello()`.
pub fn python_preamble(context: Option<&ReplyContext>, bot_handle: &str) -> String {
    let json = serde_json::to_string(&context).unwrap_or_else(|_| "null".to_string());
    let payload = base64::engine::general_purpose::STANDARD.encode(json);
    format!(
        "import json, base64\n\
         bsky = json.loads(base64.b64decode('{payload}').decode())\n\
         def say_hello():\n  \
         print('''{}''')",
        greeting(bot_handle)
    )
}

/// The program actually sent to the sandbox.
pub fn compose(language: &str, body: &str, context: Option<&ReplyContext>, bot_handle: &str) -> String {
    if injects_context(language) {
        format!("{}\n{body}", python_preamble(context, bot_handle))
    } else {
        body.to_string()
    }
}
