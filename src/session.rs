/// Persistence of the opaque authentication session across restarts.
///
/// The store is the only writer of the session file. It is fed by the
/// transport's session-change channel through [`persist_changes`].
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bluesky::{SessionChange, SessionChangeKind};

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Returns the persisted session, or `None` if there is no usable one.
    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) if !content.trim().is_empty() => {
                info!("Loaded persisted session from {}", self.path.display());
                Some(content.trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                debug!("No persisted session at {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, session: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write then rename so a crash never leaves a truncated session
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, session)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Saves the session, logging instead of failing.
    pub fn save_or_log(&self, session: &str) {
        match self.save(session) {
            Ok(()) => debug!("Session saved to {}", self.path.display()),
            Err(e) => warn!("Could not save session to {}: {e}", self.path.display()),
        }
    }

    /// Applies one change event from the transport.
    pub fn apply(&self, change: &SessionChange) {
        match change.kind {
            SessionChangeKind::Created | SessionChangeKind::Refreshed => {
                info!("Session {:?}, saving", change.kind);
                self.save_or_log(&change.session);
            }
            SessionChangeKind::Expired => {
                warn!("Session expired, a fresh login will be required");
            }
        }
    }
}

/// Drains session changes until the transport is dropped.
pub async fn persist_changes(store: SessionStore, mut changes: mpsc::UnboundedReceiver<SessionChange>) {
    while let Some(change) = changes.recv().await {
        store.apply(&change);
    }
    debug!("Session channel closed");
}
