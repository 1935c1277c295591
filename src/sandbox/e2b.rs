use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Artifact, ExecutionFault, RawExecution, SandboxHandle, SandboxProvider};
use crate::config::SandboxConfig;

/// Port the code interpreter listens on inside every sandbox.
const INTERPRETER_PORT: u16 = 49999;
const DEFAULT_DOMAIN: &str = "e2b.app";

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(rename = "envdAccessToken", default)]
    envd_access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    language: &'a str,
}

/// One line of the interpreter's newline-delimited JSON output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecutionEvent {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Result {
        #[serde(default)]
        png: Option<String>,
    },
    Error {
        name: String,
        value: String,
    },
    EndOfExecution,
    #[serde(other)]
    Other,
}

/// Accumulates interpreter events into a [`RawExecution`].
#[derive(Debug, Default)]
struct ExecutionCollector {
    raw: RawExecution,
    finished: bool,
}

impl ExecutionCollector {
    fn feed_line(&mut self, line: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(line)
            .context("invalid UTF-8 in execution output")?
            .trim();
        if line.is_empty() {
            return Ok(());
        }
        let event: ExecutionEvent = serde_json::from_str(line)
            .with_context(|| format!("unexpected execution output line: {line}"))?;
        match event {
            ExecutionEvent::Stdout { text } => self.raw.stdout.push(text),
            ExecutionEvent::Stderr { text } => self.raw.stderr.push(text),
            ExecutionEvent::Result { png } => self.raw.artifacts.push(Artifact { png }),
            ExecutionEvent::Error { name, value } => {
                self.raw.error = Some(ExecutionFault { name, value });
            }
            ExecutionEvent::EndOfExecution => self.finished = true,
            ExecutionEvent::Other => {}
        }
        Ok(())
    }

    fn finish(self) -> RawExecution {
        if !self.finished {
            debug!("Execution stream ended without an end marker");
        }
        self.raw
    }
}

/// [`SandboxProvider`] backed by the E2B code interpreter API.
pub struct E2bSandbox {
    client: Client,
    config: SandboxConfig,
}

impl E2bSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }
}

fn exec_url(sandbox_id: &str, domain: Option<&str>) -> String {
    format!(
        "https://{INTERPRETER_PORT}-{sandbox_id}.{}",
        domain.unwrap_or(DEFAULT_DOMAIN)
    )
}

#[async_trait]
impl SandboxProvider for E2bSandbox {
    async fn open(&self, timeout: Duration) -> Result<SandboxHandle> {
        let request = CreateSandboxRequest {
            template_id: &self.config.template,
            timeout: timeout.as_secs(),
        };

        let response = self
            .client
            .post(self.api_url("/sandboxes"))
            .header("X-API-Key", &self.config.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("sandbox API error ({status}): {}", body.trim());
        }

        let created: CreateSandboxResponse = response.json().await?;
        debug!("Sandbox {} created", created.sandbox_id);
        Ok(SandboxHandle {
            exec_url: exec_url(&created.sandbox_id, created.domain.as_deref()),
            id: created.sandbox_id,
            access_token: created.envd_access_token,
        })
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        code: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<RawExecution> {
        let mut request = self
            .client
            .post(format!("{}/execute", handle.exec_url))
            .timeout(timeout)
            .json(&ExecuteRequest { code, language });
        if let Some(ref token) = handle.access_token {
            request = request.header("X-Access-Token", token);
        }

        let stream_output = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("interpreter error ({status}): {}", body.trim());
            }

            let mut stream = response.bytes_stream();
            let mut collector = ExecutionCollector::default();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk?);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    collector.feed_line(&line)?;
                }
            }
            collector.feed_line(&buffer)?;
            Ok::<_, anyhow::Error>(collector.finish())
        };

        tokio::time::timeout(timeout, stream_output)
            .await
            .map_err(|_| anyhow!("execution timed out after {}s", timeout.as_secs()))?
    }

    async fn close(&self, handle: &SandboxHandle) -> Result<()> {
        let response = self
            .client
            .delete(self.api_url(&format!("/sandboxes/{}", handle.id)))
            .header("X-API-Key", &self.config.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!("Sandbox {} was already gone", handle.id);
            return Ok(());
        }
        if !status.is_success() {
            bail!("sandbox API error ({status}) killing {}", handle.id);
        }
        info!("Sandbox {} killed", handle.id);
        Ok(())
    }
}
