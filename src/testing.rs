//! In-memory fakes of the social network and sandbox capabilities.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::bluesky::types::{Author, StrongRef, Viewer};
use crate::bluesky::{Notification, Post, Reason, ReplyRef, SocialClient, TransportError};
use crate::sandbox::{RawExecution, SandboxHandle, SandboxProvider};

pub const BOT_HANDLE: &str = "bot.example";

/// A fresh, unread mention from `author`.
pub fn mention(id: &str, author: &str, text: &str) -> Notification {
    Notification {
        uri: format!("at://did:plc:{author}/app.bsky.feed.post/{id}"),
        cid: format!("cid-{id}"),
        author: Author {
            handle: author.to_string(),
            viewer: Viewer::default(),
        },
        reason: Reason::Mention,
        text: text.to_string(),
        is_read: false,
        reply: None,
    }
}

pub fn strong(uri: &str) -> StrongRef {
    StrongRef {
        uri: uri.to_string(),
        cid: format!("cid-of-{uri}"),
    }
}

// ── Social network ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SentReply {
    pub text: String,
    pub images: Vec<Vec<u8>>,
    pub reply_to: ReplyRef,
}

#[derive(Default)]
pub struct FakeSocial {
    batches: Mutex<VecDeque<Vec<Notification>>>,
    list_failures: Mutex<u32>,
    list_auth_failures: Mutex<u32>,
    seen_failures: Mutex<u32>,
    login_failures: Mutex<u32>,
    profile_failures: Mutex<u32>,
    posts: Mutex<HashMap<String, Post>>,
    get_posts_fails: Mutex<bool>,
    send_fails_containing: Mutex<Option<String>>,
    clock: Mutex<u32>,
    /// Ordered trace of calls, e.g. `time:t1`, `list`, `seen:t1`.
    events: Mutex<Vec<String>>,
    sent: Mutex<Vec<SentReply>>,
}

impl FakeSocial {
    pub fn push_batch(&self, batch: Vec<Notification>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn fail_lists(&self, n: u32) {
        *self.list_failures.lock().unwrap() = n;
    }

    /// Makes the next `n` listings fail as if the session were gone.
    pub fn reject_lists_unauthenticated(&self, n: u32) {
        *self.list_auth_failures.lock().unwrap() = n;
    }

    pub fn fail_seen(&self, n: u32) {
        *self.seen_failures.lock().unwrap() = n;
    }

    pub fn fail_logins(&self, n: u32) {
        *self.login_failures.lock().unwrap() = n;
    }

    pub fn fail_profiles(&self, n: u32) {
        *self.profile_failures.lock().unwrap() = n;
    }

    pub fn add_post(&self, uri: &str, author: &str, text: &str) {
        self.posts.lock().unwrap().insert(
            uri.to_string(),
            Post {
                uri: uri.to_string(),
                author: author.to_string(),
                text: text.to_string(),
            },
        );
    }

    pub fn fail_get_posts(&self) {
        *self.get_posts_fails.lock().unwrap() = true;
    }

    pub fn fail_sends_containing(&self, needle: &str) {
        *self.send_fails_containing.lock().unwrap() = Some(needle.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.sent.lock().unwrap().clone()
    }

    pub fn seen_calls(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("seen:").map(str::to_string))
            .collect()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut n = counter.lock().unwrap();
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    }

    fn send(&self, text: &str, images: &[Vec<u8>], reply_to: &ReplyRef) -> Result<()> {
        if let Some(ref needle) = *self.send_fails_containing.lock().unwrap() {
            if text.contains(needle.as_str()) {
                self.log(format!("send-failed:{text}"));
                return Err(anyhow!("post rejected"));
            }
        }
        self.log(format!("send:{text}"));
        self.sent.lock().unwrap().push(SentReply {
            text: text.to_string(),
            images: images.to_vec(),
            reply_to: reply_to.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl SocialClient for FakeSocial {
    async fn login(&self) -> Result<String> {
        self.log("login".to_string());
        if Self::take_failure(&self.login_failures) {
            return Err(anyhow!("invalid identifier or password"));
        }
        Ok(BOT_HANDLE.to_string())
    }

    async fn list_notifications(&self, _timeout: Duration) -> Result<Vec<Notification>> {
        self.log("list".to_string());
        if Self::take_failure(&self.list_auth_failures) {
            return Err(TransportError::Auth("not logged in".into()).into());
        }
        if Self::take_failure(&self.list_failures) {
            return Err(anyhow!("502 bad gateway"));
        }
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn update_seen(&self, seen_at: &str, _timeout: Duration) -> Result<()> {
        if Self::take_failure(&self.seen_failures) {
            self.log(format!("seen-failed:{seen_at}"));
            return Err(anyhow!("503 unavailable"));
        }
        self.log(format!("seen:{seen_at}"));
        Ok(())
    }

    fn current_time_iso(&self) -> String {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        let now = format!("t{}", *clock);
        self.log(format!("time:{now}"));
        now
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Post>> {
        self.log(format!("get_posts:{}", uris.join(",")));
        if *self.get_posts_fails.lock().unwrap() {
            return Err(anyhow!("getPosts timed out"));
        }
        let posts = self.posts.lock().unwrap();
        // Deduplicated, like the real endpoint
        let mut seen = Vec::new();
        Ok(uris
            .iter()
            .filter(|u| {
                if seen.contains(u) {
                    false
                } else {
                    seen.push(*u);
                    true
                }
            })
            .filter_map(|u| posts.get(u).cloned())
            .collect())
    }

    async fn send_post(&self, text: &str, reply_to: &ReplyRef) -> Result<()> {
        self.send(text, &[], reply_to)
    }

    async fn send_images(
        &self,
        text: &str,
        images: &[Vec<u8>],
        reply_to: &ReplyRef,
    ) -> Result<()> {
        self.send(text, images, reply_to)
    }

    async fn get_profile(&self, handle: &str) -> Result<()> {
        self.log(format!("profile:{handle}"));
        if Self::take_failure(&self.profile_failures) {
            return Err(anyhow!("ExpiredToken"));
        }
        Ok(())
    }
}

// ── Sandbox ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub sandbox_id: String,
    pub code: String,
    pub language: String,
    pub timeout: Duration,
}

/// Echoes `ran: <last line of code>` on stdout.
#[derive(Default)]
pub struct FakeSandbox {
    open_failures: Mutex<u32>,
    fail_runs_containing: Mutex<Option<String>>,
    raw_for_runs: Mutex<Option<RawExecution>>,
    next_id: Mutex<u32>,
    open_timeouts: Mutex<Vec<Duration>>,
    live: Mutex<Vec<String>>,
    opened: Mutex<u32>,
    closed: Mutex<u32>,
    runs: Mutex<Vec<RecordedRun>>,
}

impl FakeSandbox {
    pub fn fail_next_opens(&self, n: u32) {
        *self.open_failures.lock().unwrap() = n;
    }

    pub fn fail_runs_containing(&self, needle: &str) {
        *self.fail_runs_containing.lock().unwrap() = Some(needle.to_string());
    }

    /// Makes every run report `raw` instead of echoing.
    pub fn respond_with(&self, raw: RawExecution) {
        *self.raw_for_runs.lock().unwrap() = Some(raw);
    }

    pub fn opened(&self) -> u32 {
        *self.opened.lock().unwrap()
    }

    pub fn closed(&self) -> u32 {
        *self.closed.lock().unwrap()
    }

    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn open_timeouts(&self) -> Vec<Duration> {
        self.open_timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    async fn open(&self, timeout: Duration) -> Result<SandboxHandle> {
        self.open_timeouts.lock().unwrap().push(timeout);
        if FakeSocial::take_failure(&self.open_failures) {
            return Err(anyhow!("sandbox quota exceeded"));
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = format!("sbx-{}", *next);

        let mut live = self.live.lock().unwrap();
        assert!(live.is_empty(), "more than one live sandbox: {live:?}");
        live.push(id.clone());
        *self.opened.lock().unwrap() += 1;

        Ok(SandboxHandle {
            exec_url: format!("https://49999-{id}.test"),
            id,
            access_token: None,
        })
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        code: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<RawExecution> {
        assert!(
            self.live.lock().unwrap().contains(&handle.id),
            "run on closed sandbox {}",
            handle.id
        );
        self.runs.lock().unwrap().push(RecordedRun {
            sandbox_id: handle.id.clone(),
            code: code.to_string(),
            language: language.to_string(),
            timeout,
        });

        if let Some(ref needle) = *self.fail_runs_containing.lock().unwrap() {
            if code.contains(needle.as_str()) {
                return Err(anyhow!("sandbox exploded"));
            }
        }
        if let Some(ref raw) = *self.raw_for_runs.lock().unwrap() {
            return Ok(raw.clone());
        }
        Ok(RawExecution {
            stdout: vec![format!("ran: {}", code.lines().last().unwrap_or(""))],
            ..Default::default()
        })
    }

    async fn close(&self, handle: &SandboxHandle) -> Result<()> {
        let mut live = self.live.lock().unwrap();
        let before = live.len();
        live.retain(|id| id != &handle.id);
        if live.len() == before {
            return Err(anyhow!("sandbox {} already closed", handle.id));
        }
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}
