use crate::bluesky::Notification;

use super::NotificationHandler;

/// Ordered table of handlers; the first match wins.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn find(&self, note: &Notification) -> Option<&dyn NotificationHandler> {
        self.handlers
            .iter()
            .find(|h| h.matches(note))
            .map(|h| h.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
