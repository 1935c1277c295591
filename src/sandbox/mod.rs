//! Remote code execution sandbox.
//!
//! The bot never runs user code itself. It asks an external sandbox
//! service for an isolated environment, runs code there, and shapes the
//! reported output into a reply.
//!
//! - [`SandboxProvider`] is the capability the bot consumes (open, run, close).
//! - [`lifecycle::SandboxManager`] decides sandbox scope (batch or per item).
//! - [`output`] turns a raw execution into reply text and images.
//! - [`e2b::E2bSandbox`] is the HTTP adapter for E2B code interpreters.

pub mod e2b;
pub mod lifecycle;
pub mod output;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use e2b::E2bSandbox;
pub use lifecycle::SandboxManager;

/// Handle to one live sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    /// Base URL of the execution endpoint inside the sandbox
    pub exec_url: String,
    /// Sent with execution requests when the sandbox is access-controlled
    pub access_token: Option<String>,
}

/// Language-level error raised by the executed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFault {
    pub name: String,
    pub value: String,
}

/// A rich result emitted by the program (plots, images).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    /// Base64-encoded PNG, when the artifact has one
    pub png: Option<String>,
}

/// Everything the sandbox reports about one run, before shaping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExecution {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: Option<ExecutionFault>,
    pub artifacts: Vec<Artifact>,
}

/// Reply content for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub text: String,
    /// Decoded PNG payloads, at most [`output::MAX_IMAGES`]
    pub images: Vec<Vec<u8>>,
}

impl ExecutionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Creates a sandbox that lives at most `timeout`.
    async fn open(&self, timeout: Duration) -> Result<SandboxHandle>;

    async fn run(
        &self,
        handle: &SandboxHandle,
        code: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<RawExecution>;

    async fn close(&self, handle: &SandboxHandle) -> Result<()>;
}
