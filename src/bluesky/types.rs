//! Domain types for the notification stream, plus the AT Protocol wire
//! shapes they are decoded from.

use serde::{Deserialize, Serialize};

/// A URI + CID pair identifying one exact version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Thread linkage of a reply post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// Relationship flags between the bot account and a notification author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub blocked_by: bool,
    pub blocking: bool,
    pub blocking_by_list: bool,
    pub muted: bool,
    pub muted_by_list: bool,
}

impl Viewer {
    pub fn any(&self) -> bool {
        self.blocked_by || self.blocking || self.blocking_by_list || self.muted || self.muted_by_list
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub handle: String,
    pub viewer: Viewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Mention,
    Reply,
    Other(String),
}

impl From<&str> for Reason {
    fn from(s: &str) -> Self {
        match s {
            "mention" => Reason::Mention,
            "reply" => Reason::Reply,
            other => Reason::Other(other.to_string()),
        }
    }
}

/// One inbound notification. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub reason: Reason,
    pub text: String,
    pub is_read: bool,
    pub reply: Option<ReplyRef>,
}

impl Notification {
    pub fn strong_ref(&self) -> StrongRef {
        StrongRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// A post fetched for reply context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub uri: String,
    pub author: String,
    pub text: String,
}

// ── Wire format ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct ListNotificationsResponse {
    pub notifications: Vec<WireNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireNotification {
    pub uri: String,
    pub cid: String,
    pub author: WireProfile,
    pub reason: String,
    #[serde(default)]
    pub record: WireRecord,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireProfile {
    pub handle: String,
    #[serde(default)]
    pub viewer: WireViewer,
}

/// `blocking` and `blockingByList` are references that are only present
/// when the relationship exists; `mutedByList` is a list view.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireViewer {
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub muted_by_list: Option<serde_json::Value>,
    #[serde(default)]
    pub blocked_by: bool,
    #[serde(default)]
    pub blocking: Option<serde_json::Value>,
    #[serde(default)]
    pub blocking_by_list: Option<serde_json::Value>,
}

/// Only the post fields the bot reads; other record types decode to
/// an empty text.
#[derive(Debug, Default, Deserialize)]
pub(super) struct WireRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GetPostsResponse {
    pub posts: Vec<WirePost>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WirePost {
    pub uri: String,
    pub author: WireProfile,
    #[serde(default)]
    pub record: WireRecord,
}

fn present(value: &Option<serde_json::Value>) -> bool {
    !matches!(value, None | Some(serde_json::Value::Null))
}

impl From<WireNotification> for Notification {
    fn from(n: WireNotification) -> Self {
        let viewer = &n.author.viewer;
        let viewer = Viewer {
            blocked_by: viewer.blocked_by,
            blocking: present(&viewer.blocking),
            blocking_by_list: present(&viewer.blocking_by_list),
            muted: viewer.muted,
            muted_by_list: present(&viewer.muted_by_list),
        };
        Notification {
            uri: n.uri,
            cid: n.cid,
            author: Author {
                handle: n.author.handle,
                viewer,
            },
            reason: Reason::from(n.reason.as_str()),
            text: n.record.text,
            is_read: n.is_read,
            reply: n.record.reply,
        }
    }
}

impl From<WirePost> for Post {
    fn from(p: WirePost) -> Self {
        Post {
            uri: p.uri,
            author: p.author.handle,
            text: p.record.text,
        }
    }
}
