use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Media tool invocation a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum EncodeStage {
    Normalize { clip_index: usize },
    Concat,
    Overlay,
}

impl fmt::Display for EncodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeStage::Normalize { clip_index } => write!(f, "normalization of clip {}", clip_index),
            EncodeStage::Concat => write!(f, "concatenation"),
            EncodeStage::Overlay => write!(f, "audio overlay"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StitchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to download {url}: {cause}")]
    Download { url: String, cause: String },

    #[error("{stage} failed: {detail}")]
    Encode { stage: EncodeStage, detail: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Media tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StitchError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Short machine-readable tag surfaced to API callers
    pub fn kind(&self) -> &'static str {
        match self {
            StitchError::Validation(_) => "validation_error",
            StitchError::Download { .. } => "download_failure",
            StitchError::Encode { .. } => "encode_failure",
            StitchError::Upload(_) => "upload_failure",
            StitchError::ToolUnavailable(_) => "tool_unavailable",
            StitchError::Unavailable(_) => "unavailable",
            StitchError::Timeout(_) => "timeout",
            StitchError::Config(_) => "config_error",
            StitchError::Io(_) | StitchError::Json(_) | StitchError::Toml(_) | StitchError::Http(_) => {
                "internal"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StitchError>;

/// Keep the last `max_chars` characters of `text`.
///
/// ffmpeg prints its banner first and the actual failure last, so the tail is
/// the useful part of a captured stderr.
pub fn excerpt_tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let skip = total - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("...{}", tail)
}

/// Keep the first `max_chars` characters of `text`.
pub fn excerpt_head(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
