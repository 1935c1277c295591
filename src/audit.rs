use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// One line of the audit log.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    /// An attempted code execution, successful or not.
    Execution {
        input: String,
        output: String,
        author: String,
        uri: String,
        ts: DateTime<Utc>,
    },
    /// Startup, shutdown, crash.
    Lifecycle { msg: String, ts: DateTime<Utc> },
}

/// Append-only JSONL audit log. Records are never rewritten.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        info!("Audit log opened at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn execution(&self, input: &str, output: &str, author: &str, uri: &str) -> Result<()> {
        self.append(&AuditRecord::Execution {
            input: input.to_string(),
            output: output.to_string(),
            author: author.to_string(),
            uri: uri.to_string(),
            ts: Utc::now(),
        })
    }

    pub fn lifecycle(&self, msg: &str) -> Result<()> {
        self.append(&AuditRecord::Lifecycle {
            msg: msg.to_string(),
            ts: Utc::now(),
        })
    }

    /// Reads back every record, oldest first.
    #[cfg(test)]
    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Ok(serde_json::from_str(l)?))
            .collect()
    }
}
