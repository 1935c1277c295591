//! Stages that reduce a raw notification batch to the eligible subset.
//!
//! Each stage is a pure predicate so it can be tested on its own. The
//! order only matters for speed.

use crate::bluesky::{Notification, Reason};

/// Marker that opens every execution request.
pub const SHEBANG_MARKER: &str = "#!";

pub fn is_unread(note: &Notification) -> bool {
    !note.is_read
}

pub fn is_mention_or_reply(note: &Notification) -> bool {
    matches!(note.reason, Reason::Mention | Reason::Reply)
}

/// No block or mute in either direction, directly or via a list.
pub fn author_is_reachable(note: &Notification) -> bool {
    !note.author.viewer.any()
}

pub fn starts_with_shebang(note: &Notification) -> bool {
    note.text.trim().starts_with(SHEBANG_MARKER)
}

pub fn is_eligible(note: &Notification) -> bool {
    is_unread(note)
        && is_mention_or_reply(note)
        && author_is_reachable(note)
        && starts_with_shebang(note)
}

/// Keeps eligible notifications in stream order.
pub fn filter_notifications(batch: Vec<Notification>) -> Vec<Notification> {
    batch.into_iter().filter(is_eligible).collect()
}
