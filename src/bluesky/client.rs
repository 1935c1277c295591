/// AT Protocol XRPC client for a Bluesky account.
///
/// Holds one authenticated session. Every session change (fresh login,
/// token refresh, unrecoverable expiry) is published on an unbounded
/// channel returned from [`BlueskyClient::new`] so persistence can happen
/// outside the transport.
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::types::{GetPostsResponse, ListNotificationsResponse};
use super::{
    Notification, Post, ReplyRef, SessionChange, SessionChangeKind, SocialClient, TransportError,
};
use crate::config::BlueskyConfig;

/// Serialized form of a session, also what gets persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct BlueskyClient {
    client: Client,
    config: BlueskyConfig,
    request_timeout: Duration,
    session: RwLock<Option<AuthSession>>,
    /// Persisted session to try before a password login; consumed once.
    resume_from: Mutex<Option<String>>,
    session_tx: mpsc::UnboundedSender<SessionChange>,
}

impl BlueskyClient {
    pub fn new(
        config: BlueskyConfig,
        request_timeout: Duration,
        persisted_session: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionChange>) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let this = Self {
            client,
            config,
            request_timeout,
            session: RwLock::new(None),
            resume_from: Mutex::new(persisted_session),
            session_tx,
        };
        (this, session_rx)
    }

    fn url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{nsid}", self.config.service.trim_end_matches('/'))
    }

    fn emit(&self, kind: SessionChangeKind, session: &AuthSession) {
        match serde_json::to_string(session) {
            Ok(serialized) => {
                // Receiver gone means nobody persists sessions; not an error here
                let _ = self.session_tx.send(SessionChange {
                    kind,
                    session: serialized,
                });
            }
            Err(e) => warn!("Could not serialize session: {e}"),
        }
    }

    async fn create_session(&self) -> Result<AuthSession, TransportError> {
        debug!("Creating session for {}", self.config.handle);
        let response = self
            .client
            .post(self.url("com.atproto.server.createSession"))
            .timeout(self.request_timeout)
            .json(&json!({
                "identifier": self.config.handle,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(transport_failure)?;
        parse_json(check(response).await?).await
    }

    async fn refresh_session(&self, refresh_jwt: &str) -> Result<AuthSession, TransportError> {
        debug!("Refreshing session");
        let response = self
            .client
            .post(self.url("com.atproto.server.refreshSession"))
            .timeout(self.request_timeout)
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(transport_failure)?;
        parse_json(check(response).await?).await
    }

    async fn current(&self) -> Result<AuthSession, TransportError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::Auth("not logged in".into()))
    }

    /// Sends an authenticated request, refreshing the access token once if
    /// the server reports it expired.
    async fn send_authed<F>(&self, build: F) -> Result<Response, TransportError>
    where
        F: Fn() -> RequestBuilder,
    {
        let session = self.current().await?;
        let response = build()
            .bearer_auth(&session.access_jwt)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = error_detail(response).await;
        if !detail.starts_with("ExpiredToken") {
            return Err(classify(status, &detail));
        }

        info!("Access token expired, refreshing session");
        let refreshed = match self.refresh_session(&session.refresh_jwt).await {
            Ok(s) => s,
            Err(e) => {
                self.emit(SessionChangeKind::Expired, &session);
                *self.session.write().await = None;
                return Err(TransportError::Auth(format!("session refresh failed: {e}")));
            }
        };
        *self.session.write().await = Some(refreshed.clone());
        self.emit(SessionChangeKind::Refreshed, &refreshed);

        let response = build()
            .bearer_auth(&refreshed.access_jwt)
            .send()
            .await
            .map_err(transport_failure)?;
        check(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let url = self.url(nsid);
        let response = self
            .send_authed(|| self.client.get(&url).query(query).timeout(timeout))
            .await?;
        parse_json(response).await
    }

    async fn upload_blob(&self, bytes: &[u8]) -> Result<Value, TransportError> {
        let url = self.url("com.atproto.repo.uploadBlob");
        let response = self
            .send_authed(|| {
                self.client
                    .post(&url)
                    .timeout(self.request_timeout)
                    .header("content-type", "image/png")
                    .body(bytes.to_vec())
            })
            .await?;
        let body: Value = parse_json(response).await?;
        body.get("blob")
            .cloned()
            .ok_or_else(|| TransportError::Config("uploadBlob response without blob".into()))
    }

    async fn create_post(
        &self,
        text: &str,
        reply_to: &ReplyRef,
        embed: Option<Value>,
    ) -> Result<(), TransportError> {
        let session = self.current().await?;
        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": self.current_time_iso(),
            "reply": reply_to,
        });
        if let Some(embed) = embed {
            record["embed"] = embed;
        }
        let body = json!({
            "repo": session.did,
            "collection": "app.bsky.feed.post",
            "record": record,
        });

        let url = self.url("com.atproto.repo.createRecord");
        self.send_authed(|| {
            self.client
                .post(&url)
                .timeout(self.request_timeout)
                .json(&body)
        })
        .await?;
        Ok(())
    }
}

fn transport_failure(e: reqwest::Error) -> TransportError {
    TransportError::Transient(e.to_string())
}

/// Reads an XRPC error body as `"<error> <message>"`, falling back to the raw body.
async fn error_detail(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<XrpcError>(&body)
        .map(|e| format!("{} {}", e.error, e.message.unwrap_or_default()))
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Maps non-success responses to a classified error.
async fn check(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = error_detail(response).await;
    Err(classify(status, &detail))
}

fn classify(status: StatusCode, detail: &str) -> TransportError {
    let msg = format!("XRPC {status}: {detail}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::Transient(msg)
    } else if status == StatusCode::UNAUTHORIZED
        || detail.starts_with("ExpiredToken")
        || detail.starts_with("AuthenticationRequired")
        || detail.starts_with("InvalidToken")
    {
        TransportError::Auth(msg)
    } else {
        TransportError::Config(msg)
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Config(format!("invalid XRPC response: {e}")))
}

#[async_trait]
impl SocialClient for BlueskyClient {
    async fn login(&self) -> Result<String> {
        if let Some(saved) = self.resume_from.lock().await.take() {
            match serde_json::from_str::<AuthSession>(&saved) {
                Ok(saved) => match self.refresh_session(&saved.refresh_jwt).await {
                    Ok(session) => {
                        info!("Resumed persisted session for {}", session.handle);
                        let handle = session.handle.clone();
                        *self.session.write().await = Some(session.clone());
                        self.emit(SessionChangeKind::Refreshed, &session);
                        return Ok(handle);
                    }
                    Err(e) => warn!("Persisted session rejected ({e}), logging in again"),
                },
                Err(e) => warn!("Persisted session unreadable ({e}), logging in again"),
            }
        }

        info!("Creating new session with fresh credentials");
        let session = self.create_session().await?;
        info!("Session created successfully for {}", session.handle);
        let handle = session.handle.clone();
        *self.session.write().await = Some(session.clone());
        self.emit(SessionChangeKind::Created, &session);
        Ok(handle)
    }

    async fn list_notifications(&self, timeout: Duration) -> Result<Vec<Notification>> {
        let response: ListNotificationsResponse = self
            .get("app.bsky.notification.listNotifications", &[], timeout)
            .await?;
        Ok(response
            .notifications
            .into_iter()
            .map(Notification::from)
            .collect())
    }

    async fn update_seen(&self, seen_at: &str, timeout: Duration) -> Result<()> {
        let url = self.url("app.bsky.notification.updateSeen");
        let body = json!({ "seenAt": seen_at });
        self.send_authed(|| self.client.post(&url).timeout(timeout).json(&body))
            .await?;
        Ok(())
    }

    fn current_time_iso(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Post>> {
        let query: Vec<(&str, String)> = uris.iter().map(|u| ("uris", u.clone())).collect();
        let response: GetPostsResponse = self
            .get("app.bsky.feed.getPosts", &query, self.request_timeout)
            .await?;
        Ok(response.posts.into_iter().map(Post::from).collect())
    }

    async fn send_post(&self, text: &str, reply_to: &ReplyRef) -> Result<()> {
        self.create_post(text, reply_to, None).await?;
        Ok(())
    }

    async fn send_images(
        &self,
        text: &str,
        images: &[Vec<u8>],
        reply_to: &ReplyRef,
    ) -> Result<()> {
        let mut embedded = Vec::with_capacity(images.len());
        for image in images {
            let blob = self.upload_blob(image).await?;
            embedded.push(json!({ "alt": "", "image": blob }));
        }
        let embed = json!({
            "$type": "app.bsky.embed.images",
            "images": embedded,
        });
        self.create_post(text, reply_to, Some(embed)).await?;
        Ok(())
    }

    async fn get_profile(&self, handle: &str) -> Result<()> {
        let _: Value = self
            .get(
                "app.bsky.actor.getProfile",
                &[("actor", handle.to_string())],
                self.request_timeout,
            )
            .await?;
        Ok(())
    }
}
