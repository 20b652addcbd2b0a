//! Crate-level error type.
//!
//! Every fallible operation in the library returns [`Result`]. Variants are
//! grouped by [`ErrorKind`] so callers can route failures the same way the
//! interactive client does: connectivity problems get a retry affordance,
//! authorization problems gate protected views, and validation problems are
//! reported before any network traffic happens.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArenaError>;

/// Coarse classification used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Authorization,
    Validation,
    Generation,
    Internal,
}

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("no models selected")]
    NoModelsSelected,

    #[error("select between {min} and {max} models (got {got})")]
    SelectionOutOfBounds { min: usize, max: usize, got: usize },

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("no active session")]
    NoActiveSession,

    #[error("401 unauthorized from {url}")]
    Unauthorized { url: String },

    #[error("authentication token unavailable after {attempts} attempts")]
    AuthNotReady { attempts: u32 },

    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("WebSocket not connected. Cannot submit prompt.")]
    NotConnected,

    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        message: Option<String>,
    },

    #[error("could not decode response from {url}: {detail}")]
    Decode { url: String, detail: String },

    #[error("model {model} failed: {message}")]
    Generation { model: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ArenaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::NoModelsSelected
            | ArenaError::SelectionOutOfBounds { .. }
            | ArenaError::EmptyPrompt
            | ArenaError::NoActiveSession => ErrorKind::Validation,
            ArenaError::Unauthorized { .. } | ArenaError::AuthNotReady { .. } => {
                ErrorKind::Authorization
            }
            ArenaError::Http { status: 401, .. } => ErrorKind::Authorization,
            ArenaError::Connect { .. }
            | ArenaError::Timeout { .. }
            | ArenaError::NotConnected
            | ArenaError::Http { .. } => ErrorKind::Connectivity,
            ArenaError::Generation { .. } => ErrorKind::Generation,
            ArenaError::Decode { .. }
            | ArenaError::Config(_)
            | ArenaError::Io(_)
            | ArenaError::Json(_) => ErrorKind::Internal,
        }
    }

    /// Text shown in notifications.
    ///
    /// A backend-supplied `message` wins over the canned status texts.
    pub fn user_message(&self) -> String {
        match self {
            ArenaError::Http {
                message: Some(m), ..
            } => m.clone(),
            ArenaError::Http { status: 429, .. } => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            ArenaError::Http { status: 500, .. } => {
                "Server error. Please check if the backend is running.".to_string()
            }
            ArenaError::Timeout { .. } => {
                "Request timeout. AI models are taking longer than expected.".to_string()
            }
            ArenaError::Connect { .. } => {
                "Unable to connect to the backend. Please ensure the API server is running."
                    .to_string()
            }
            ArenaError::Unauthorized { .. } | ArenaError::AuthNotReady { .. } => {
                "Sign in required".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> ArenaError {
        ArenaError::Http {
            status,
            url: "http://localhost:3000/sessions".to_string(),
            message: None,
        }
    }

    #[rstest]
    #[case(ArenaError::NoModelsSelected, ErrorKind::Validation)]
    #[case(ArenaError::EmptyPrompt, ErrorKind::Validation)]
    #[case(ArenaError::NotConnected, ErrorKind::Connectivity)]
    #[case(ArenaError::AuthNotReady { attempts: 10 }, ErrorKind::Authorization)]
    #[case(http(401), ErrorKind::Authorization)]
    #[case(http(503), ErrorKind::Connectivity)]
    #[case(ArenaError::Config("bad".into()), ErrorKind::Internal)]
    fn kind_classifies_variants(#[case] err: ArenaError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn user_message_prefers_backend_message() {
        let err = ArenaError::Http {
            status: 429,
            url: "u".into(),
            message: Some("slow down".into()),
        };
        assert_eq!(err.user_message(), "slow down");
    }

    #[test]
    fn user_message_rate_limit_text() {
        assert!(http(429).user_message().starts_with("Rate limit exceeded"));
    }

    #[test]
    fn user_message_server_error_text() {
        assert!(http(500).user_message().starts_with("Server error"));
    }

    #[test]
    fn user_message_falls_back_to_display() {
        assert_eq!(http(418).user_message(), "HTTP 418 from http://localhost:3000/sessions");
    }

    #[test]
    fn not_connected_display_is_loud() {
        assert_eq!(
            ArenaError::NotConnected.to_string(),
            "WebSocket not connected. Cannot submit prompt."
        );
    }
}
