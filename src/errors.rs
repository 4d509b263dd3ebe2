// Error types shared by every step of a run. Each failure the pipeline can
// report is its own variant so the front end can print it in isolation.

use crate::api::Platform;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Image generation failed on every model: {detail}")]
    Generation { detail: String },

    #[error("Failed to get upload URL (HTTP {status}): {body}")]
    UploadSetup { status: u16, body: String },

    #[error("Upload transfer failed (HTTP {status}): {body}")]
    Transfer { status: u16, body: String },

    #[error("Media status check failed (HTTP {status}): {body}")]
    StatusCheck { status: u16, body: String },

    #[error("Media {media_id} failed processing")]
    Processing { media_id: String },

    #[error("Media {media_id} not ready after {attempts} status checks")]
    Timeout { media_id: String, attempts: u32 },

    #[error("{platform} publishing failed (HTTP {status}): {body}")]
    Publish {
        platform: Platform,
        status: u16,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Shorten a response body for diagnostics, cutting on a char boundary.
pub fn truncate_body(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_bodies_alone() {
        assert_eq!(truncate_body("oops", 200), "oops");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let body = "é".repeat(10);
        assert_eq!(truncate_body(&body, 3), "ééé...");
    }

    #[test]
    fn publish_error_names_platform_and_status() {
        let err = AppError::Publish {
            platform: Platform::LinkedIn,
            status: 422,
            body: "bad text".into(),
        };
        assert_eq!(
            err.to_string(),
            "linkedin publishing failed (HTTP 422): bad text"
        );
    }
}
