//! Shaping raw sandbox output into something that fits in a post.

use base64::Engine;
use tracing::warn;

use super::{ExecutionResult, RawExecution};

/// Longest reply text, in characters.
pub const MAX_TEXT_CHARS: usize = 300;

/// Truncated text keeps at most this many characters before the ellipsis.
const TRUNCATE_AT: usize = 297;

pub const MAX_IMAGES: usize = 4;

/// Joins stdout and stderr lines, then appends the program's error if any.
pub fn combine(raw: &RawExecution) -> String {
    let mut output = raw
        .stdout
        .iter()
        .chain(raw.stderr.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    if let Some(ref fault) = raw.error {
        output.push_str(&format!("\n{}: {}", fault.name, fault.value));
    }
    output
}

/// Cuts `text` to fit [`MAX_TEXT_CHARS`], preferring the last newline or
/// space within the first 297 characters. Counts chars, not bytes.
pub fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text.to_string();
    }

    let window: String = text.chars().take(TRUNCATE_AT).collect();
    let cutoff = window
        .char_indices()
        .filter(|(_, c)| *c == '\n' || *c == ' ')
        .map(|(i, _)| i)
        .last()
        .unwrap_or(window.len());

    format!("{}...", &window[..cutoff])
}

/// Decodes up to [`MAX_IMAGES`] PNG artifacts, keeping their order.
pub fn collect_images(raw: &RawExecution) -> Vec<Vec<u8>> {
    let engine = base64::engine::general_purpose::STANDARD;
    raw.artifacts
        .iter()
        .take(MAX_IMAGES)
        .filter_map(|artifact| artifact.png.as_deref())
        .filter_map(|png| match engine.decode(png.trim()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Skipping undecodable image artifact: {e}");
                None
            }
        })
        .collect()
}

pub fn shape(raw: &RawExecution) -> ExecutionResult {
    ExecutionResult {
        text: truncate(&combine(raw)).trim().to_string(),
        images: collect_images(raw),
    }
}
