use std::collections::HashSet;

use tracing::info;

use crate::bluesky::Notification;

pub const TOO_MANY_MENTIONS: &str =
    "Error: Too many mentions. Please wait for a response before mentioning again.";

/// Outcome of rate limiting one cycle's batch.
#[derive(Debug, Default)]
pub struct RateLimited {
    /// First request of each author, in stream order.
    pub forwarded: Vec<Notification>,
    /// Every later request from an author already seen this cycle.
    pub overflow: Vec<Notification>,
}

/// One request per author per cycle. Holds no memory between cycles.
#[derive(Debug, Default)]
pub struct RateLimiter {
    seen_authors: HashSet<String>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `note` may be executed this cycle.
    pub fn admit(&mut self, note: &Notification) -> bool {
        self.seen_authors.insert(note.author.handle.clone())
    }

    pub fn partition(&mut self, batch: Vec<Notification>) -> RateLimited {
        let mut out = RateLimited::default();
        for note in batch {
            if self.admit(&note) {
                out.forwarded.push(note);
            } else {
                info!("Rate limiting notification from {}", note.author.handle);
                out.overflow.push(note);
            }
        }
        out
    }
}
