use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::{output, ExecutionResult, SandboxHandle, SandboxProvider};

/// Where the manager is in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxState {
    Idle,
    /// One sandbox shared by every item of the batch.
    BatchOpen(SandboxHandle),
    /// The batch sandbox could not be opened; each item gets its own.
    PerItemFallback,
    BatchClosed,
}

/// Owns the sandbox scope for one batch.
///
/// At most one sandbox is live at a time: either the batch sandbox, or
/// a per-item sandbox that is closed right after its single run.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    open_timeout: Duration,
    run_timeout: Duration,
    state: SandboxState,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, open_timeout: Duration, run_timeout: Duration) -> Self {
        Self {
            provider,
            open_timeout,
            run_timeout,
            state: SandboxState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SandboxState {
        &self.state
    }

    /// Opens the shared sandbox. Failure only switches to per-item mode.
    pub async fn open_batch(&mut self) {
        match self.provider.open(self.open_timeout).await {
            Ok(handle) => {
                info!("Created sandbox {} for batch processing", handle.id);
                self.state = SandboxState::BatchOpen(handle);
            }
            Err(e) => {
                error!("Failed to create batch sandbox: {e}");
                self.state = SandboxState::PerItemFallback;
            }
        }
    }

    /// Runs `code` and shapes the output. Never fails: every error
    /// becomes an `"Error: ..."` result.
    pub async fn execute(&self, code: &str, language: &str) -> ExecutionResult {
        match &self.state {
            SandboxState::BatchOpen(handle) => self.run_on(handle, code, language).await,
            _ => self.run_once(code, language).await,
        }
    }

    async fn run_once(&self, code: &str, language: &str) -> ExecutionResult {
        let handle = match self.provider.open(self.open_timeout).await {
            Ok(handle) => {
                info!("Created sandbox {} for single execution", handle.id);
                handle
            }
            Err(e) => {
                error!("Failed to create sandbox: {e}");
                return ExecutionResult::text(format!("Error creating sandbox: {e}"));
            }
        };

        let result = self.run_on(&handle, code, language).await;
        if let Err(e) = self.provider.close(&handle).await {
            warn!("Error closing sandbox {}: {e}", handle.id);
        }
        result
    }

    async fn run_on(&self, handle: &SandboxHandle, code: &str, language: &str) -> ExecutionResult {
        match self
            .provider
            .run(handle, code, language, self.run_timeout)
            .await
        {
            Ok(raw) => output::shape(&raw),
            Err(e) => {
                error!("Code execution error: {e}");
                ExecutionResult::text(format!("Error: {e}"))
            }
        }
    }

    /// Tears down the batch sandbox if one is open. Safe to call twice.
    pub async fn close_batch(&mut self) {
        let previous = std::mem::replace(&mut self.state, SandboxState::BatchClosed);
        if let SandboxState::BatchOpen(handle) = previous {
            match self.provider.close(&handle).await {
                Ok(()) => info!("Cleaned up sandbox {} after batch processing", handle.id),
                Err(e) => error!("Error cleaning up sandbox {}: {e}", handle.id),
            }
        }
    }
}
