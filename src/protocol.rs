//! Wire contract shared by the REST surface and the streaming channel.
//!
//! Streaming frames are JSON text frames of the form
//! `{"event": "<name>", "data": { ... }}`. Payload fields are camelCase;
//! token usage keeps the backend's snake_case names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session and comparison records
// ---------------------------------------------------------------------------

/// Server-tracked comparison run bound to a fixed set of model IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub selected_models: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub selected_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPromptRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One model's slot in a finished comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default)]
    pub time_taken_ms: u64,
    #[serde(default)]
    pub cost_estimate_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub session_id: String,
    pub prompt: String,
    pub results: BTreeMap<String, ModelResult>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SubmitPrompt {
        #[serde(rename = "sessionId")]
        session_id: String,
        prompt: String,
    },
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReceived {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub submitted_by: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTyping {
    pub model: String,
    pub is_typing: bool,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProgress {
    pub current: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStream {
    pub model: String,
    pub chunk: String,
    #[serde(default)]
    pub progress: StreamProgress,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelComplete {
    pub model: String,
    pub final_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default)]
    pub time_taken_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate_usd: Option<f64>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonComplete {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub results: BTreeMap<String, ModelResult>,
    pub created_at: String,
    #[serde(default)]
    pub all_models_complete: bool,
    #[serde(default)]
    pub streaming_complete: bool,
}

impl ComparisonComplete {
    pub fn to_result(&self) -> ComparisonResult {
        ComparisonResult {
            session_id: self.session_id.clone(),
            prompt: self.prompt.clone(),
            results: self.results.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    PromptReceived(PromptReceived),
    ModelTyping(ModelTyping),
    ModelStream(ModelStream),
    ModelComplete(ModelComplete),
    ComparisonComplete(ComparisonComplete),
    PromptError(PromptError),
}

/// Discriminant used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    PromptReceived,
    ModelTyping,
    ModelStream,
    ModelComplete,
    ComparisonComplete,
    PromptError,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::PromptReceived,
        EventKind::ModelTyping,
        EventKind::ModelStream,
        EventKind::ModelComplete,
        EventKind::ComparisonComplete,
        EventKind::PromptError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PromptReceived => "prompt_received",
            EventKind::ModelTyping => "model_typing",
            EventKind::ModelStream => "model_stream",
            EventKind::ModelComplete => "model_complete",
            EventKind::ComparisonComplete => "comparison_complete",
            EventKind::PromptError => "prompt_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::PromptReceived(_) => EventKind::PromptReceived,
            ServerEvent::ModelTyping(_) => EventKind::ModelTyping,
            ServerEvent::ModelStream(_) => EventKind::ModelStream,
            ServerEvent::ModelComplete(_) => EventKind::ModelComplete,
            ServerEvent::ComparisonComplete(_) => EventKind::ComparisonComplete,
            ServerEvent::PromptError(_) => EventKind::PromptError,
        }
    }

    /// Model the event is addressed to, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            ServerEvent::ModelTyping(e) => Some(&e.model),
            ServerEvent::ModelStream(e) => Some(&e.model),
            ServerEvent::ModelComplete(e) => Some(&e.model),
            ServerEvent::PromptError(e) => e.model.as_deref(),
            ServerEvent::PromptReceived(_) | ServerEvent::ComparisonComplete(_) => None,
        }
    }
}
