use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::backoff::{retry, RetryPolicy};
use crate::bluesky::{Notification, SocialClient, TransportError};
use crate::config::Config;
use crate::handlers::{BatchContext, HandlerRegistry};
use crate::sandbox::{ExecutionResult, SandboxManager, SandboxProvider};

use super::filter::filter_notifications;
use super::publisher::publish;
use super::rate_limit::{RateLimiter, TOO_MANY_MENTIONS};

/// Timing knobs of the dispatch loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Bound on a whole retried list or mark-seen call.
    pub cycle_timeout: Duration,
    pub sandbox_open_timeout: Duration,
    pub sandbox_run_timeout: Duration,
    pub list_policy: RetryPolicy,
    pub seen_policy: RetryPolicy,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.bot.poll_interval(),
            request_timeout: config.bot.request_timeout(),
            cycle_timeout: config.bot.cycle_timeout(),
            sandbox_open_timeout: config.sandbox.open_timeout(),
            sandbox_run_timeout: config.sandbox.run_timeout(),
            list_policy: RetryPolicy::list_notifications(),
            seen_policy: RetryPolicy::mark_seen(),
        }
    }
}

/// Everything the dispatcher talks to, built once in `main`.
pub struct BotContext {
    pub social: Arc<dyn SocialClient>,
    pub sandbox: Arc<dyn SandboxProvider>,
    pub audit: AuditLog,
    pub settings: LoopSettings,
}

/// What one cycle did.
#[derive(Debug, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub eligible: usize,
    pub rate_limited: usize,
    pub processed: usize,
    pub published: usize,
    /// Timestamp passed to mark-seen, if it was called.
    pub marked_seen: Option<String>,
    /// Shutdown was requested before the batch finished.
    pub interrupted: bool,
}

/// The notification dispatch loop.
///
/// Each cycle: capture the time, list notifications, filter and rate
/// limit, run every eligible request inside one batch sandbox, reply,
/// record, then mark everything up to the captured time as seen.
///
/// Setting the shutdown flag stops the loop at the next safe point: while
/// waiting on the network, or between two items of a batch. The batch
/// sandbox is still closed, and an unfinished batch is not marked seen.
pub struct Dispatcher {
    cx: BotContext,
    handlers: HandlerRegistry,
    /// Own handle, known after a successful login.
    handle: Option<String>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(cx: BotContext, handlers: HandlerRegistry, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            cx,
            handlers,
            handle: None,
            shutdown,
        }
    }

    /// Runs until shutdown is requested.
    pub async fn run(&mut self) {
        info!("Starting bot loop");
        while !self.stopping() {
            let pause = self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.shutdown_requested() => {}
            }
        }
        info!("Bot loop stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the sender
    /// is gone without asking.
    async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// One loop iteration without the trailing sleep. Returns how long to
    /// pause before the next one.
    pub async fn tick(&mut self) -> Duration {
        let poll = self.cx.settings.poll_interval;

        if let Err(e) = self.ensure_client().await {
            match e.downcast_ref::<TransportError>() {
                Some(t) if !t.is_retriable() => {
                    error!("Login rejected, check the account settings: {e}")
                }
                _ => error!("Critical client error: {e}"),
            }
            return poll * 2;
        }

        match self.run_cycle().await {
            Ok(report) if report.interrupted => info!("Cycle interrupted: {report:?}"),
            Ok(report) if report.fetched > 0 => debug!("Cycle done: {report:?}"),
            Ok(_) => {}
            Err(e) => {
                error!("API error in main loop: {e}");
                if let Err(e) = self.login().await {
                    error!("Failed to recreate client: {e}");
                }
            }
        }
        poll
    }

    /// Checks the session still works, logging in again if it does not.
    async fn ensure_client(&mut self) -> Result<()> {
        if let Some(ref handle) = self.handle {
            match self.cx.social.get_profile(handle).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Client error detected: {e}");
                    info!("Creating a fresh client session");
                }
            }
        }
        self.login().await
    }

    async fn login(&mut self) -> Result<()> {
        let handle = self.cx.social.login().await?;
        info!("Logged in as {handle}");
        self.handle = Some(handle);
        Ok(())
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let handle = self
            .handle
            .as_deref()
            .ok_or_else(|| anyhow!("not logged in"))?;
        let social = self.cx.social.as_ref();
        let settings = &self.cx.settings;
        let mut report = CycleReport::default();

        // Captured before listing so anything arriving meanwhile stays unseen
        let seen_at = social.current_time_iso();

        let request_timeout = settings.request_timeout;
        let listing = tokio::time::timeout(
            settings.cycle_timeout,
            retry(&settings.list_policy, "List notifications", move || {
                social.list_notifications(request_timeout)
            }),
        );
        let notifications = tokio::select! {
            biased;
            _ = self.shutdown_requested() => {
                report.interrupted = true;
                return Ok(report);
            }
            listed = listing => listed.map_err(|_| {
                anyhow!(
                    "listing notifications did not succeed within {}s",
                    settings.cycle_timeout.as_secs()
                )
            })??,
        };

        report.fetched = notifications.len();
        let eligible = filter_notifications(notifications);
        report.eligible = eligible.len();

        let limited = RateLimiter::new().partition(eligible);
        report.rate_limited = limited.overflow.len();
        for note in &limited.overflow {
            publish(social, note, &ExecutionResult::text(TOO_MANY_MENTIONS)).await;
        }

        if limited.forwarded.is_empty() {
            return Ok(report);
        }

        info!(
            "Found {} new notifications to process",
            limited.forwarded.len()
        );
        let batch = self.process_batch(&limited.forwarded, handle).await;
        report.processed = batch.processed;
        report.published = batch.published;
        if batch.interrupted {
            // Left unseen so the skipped items are picked up after a restart
            report.interrupted = true;
            return Ok(report);
        }

        let seen_at_ref = seen_at.as_str();
        let marking = tokio::time::timeout(
            settings.cycle_timeout,
            retry(&settings.seen_policy, "Update seen", move || {
                social.update_seen(seen_at_ref, request_timeout)
            }),
        );
        tokio::select! {
            biased;
            marked = marking => marked.map_err(|_| {
                anyhow!(
                    "marking notifications seen did not succeed within {}s",
                    settings.cycle_timeout.as_secs()
                )
            })??,
            _ = self.shutdown_requested() => {
                report.interrupted = true;
                return Ok(report);
            }
        }
        report.marked_seen = Some(seen_at);

        Ok(report)
    }

    /// Runs every item inside one batch sandbox, which is closed
    /// afterwards no matter how the items went. Stops taking new items
    /// once shutdown is requested.
    async fn process_batch(&self, batch: &[Notification], handle: &str) -> BatchOutcome {
        let settings = &self.cx.settings;
        let mut sandbox = SandboxManager::new(
            self.cx.sandbox.clone(),
            settings.sandbox_open_timeout,
            settings.sandbox_run_timeout,
        );
        sandbox.open_batch().await;

        let mut outcome = BatchOutcome::default();
        for (i, note) in batch.iter().enumerate() {
            if self.stopping() {
                info!("Shutdown requested, skipping {} remaining notifications", batch.len() - i);
                outcome.interrupted = true;
                break;
            }
            let bcx = BatchContext {
                social: self.cx.social.as_ref(),
                sandbox: &sandbox,
                bot_handle: handle,
            };
            if let Some(sent) = self.process_one(note, &bcx).await {
                outcome.processed += 1;
                if sent {
                    outcome.published += 1;
                }
            }
        }

        sandbox.close_batch().await;
        outcome
    }

    /// Handles, replies to, and records one notification. Returns `None`
    /// when no handler wants it, otherwise whether the reply went out.
    async fn process_one(&self, note: &Notification, bcx: &BatchContext<'_>) -> Option<bool> {
        let Some(handler) = self.handlers.find(note) else {
            debug!("No handler for {}, skipping", note.uri);
            return None;
        };

        let outcome = AssertUnwindSafe(handler.handle(note, bcx))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Error processing notification {}: {e}", note.uri);
                ExecutionResult::text(format!("Error processing your request: {e}"))
            }
            Err(_) => {
                error!("Handler {} panicked on {}", handler.name(), note.uri);
                ExecutionResult::text("Error processing your request: internal error")
            }
        };

        let sent = publish(bcx.social, note, &result).await;

        if let Err(e) = self
            .cx
            .audit
            .execution(&note.text, &result.text, &note.author.handle, &note.uri)
        {
            error!("Could not write execution record: {e}");
        }

        Some(sent)
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    processed: usize,
    published: usize,
    interrupted: bool,
}
