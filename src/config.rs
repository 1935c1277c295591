use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlueskyConfig {
    /// PDS / entryway base URL, e.g. "https://bsky.social"
    #[serde(default = "default_service")]
    pub service: String,
    /// Account handle or email used to log in
    pub handle: String,
    /// Supports ${ENV_VAR} substitution
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_api_url")]
    pub api_url: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    #[serde(default = "default_sandbox_template")]
    pub template: String,
    /// Lifetime budget requested when a sandbox is created
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,
    /// Hard limit for a single code execution
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Per-request timeout for social network calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on a retried list/mark-seen call before the cycle is abandoned
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_service() -> String {
    "https://bsky.social".to_string()
}

fn default_sandbox_api_url() -> String {
    "https://api.e2b.app".to_string()
}

fn default_sandbox_template() -> String {
    "code-interpreter-v1".to_string()
}

fn default_open_timeout() -> u64 {
    20
}

fn default_run_timeout() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

fn default_cycle_timeout() -> u64 {
    900
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.txt")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("./data/audit.jsonl")
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            cycle_timeout_secs: default_cycle_timeout(),
            session_path: default_session_path(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

impl BotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

impl SandboxConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${BSKY_PASSWORD}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
