//! Per-model streaming state machine.
//!
//! Each model moves `Idle -> Typing -> Streaming -> Complete`, or to
//! `Error` from any non-terminal state. Nothing leaves a terminal state
//! within one round.
//!
//! Completions and errors are counted asymmetrically: only completions land
//! in `completed_models`, so `is_streaming` stays true while any model has
//! errored. The end of a round is therefore an explicit [`StreamingState::close_round`].

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::protocol::{ModelComplete, TokenUsage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Idle,
    Typing,
    Streaming,
    Complete,
    Error,
}

impl ModelStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelStatus::Complete | ModelStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Idle => "idle",
            ModelStatus::Typing => "typing",
            ModelStatus::Streaming => "streaming",
            ModelStatus::Complete => "complete",
            ModelStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Throughput in characters per second, rounded to one decimal.
pub fn chars_per_sec(chars: usize, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    let raw = chars as f64 / (duration_ms as f64 / 1000.0);
    (raw * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub char_count: usize,
    pub duration_ms: u64,
    pub chars_per_sec: f64,
    pub token_usage: Option<TokenUsage>,
    pub cost_usd: Option<f64>,
}

impl PerformanceMetrics {
    pub fn compute(
        final_response: &str,
        duration_ms: u64,
        token_usage: Option<TokenUsage>,
        cost_usd: Option<f64>,
    ) -> Self {
        let char_count = final_response.chars().count();
        Self {
            char_count,
            duration_ms,
            chars_per_sec: chars_per_sec(char_count, duration_ms),
            token_usage,
            cost_usd,
        }
    }

    pub fn from_completion(ev: &ModelComplete) -> Self {
        Self::compute(&ev.final_response, ev.time_taken_ms, ev.tokens, ev.cost_estimate_usd)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingState {
    models: Vec<String>,
    model_status: BTreeMap<String, ModelStatus>,
    model_responses: BTreeMap<String, String>,
    completed_models: Vec<String>,
    performance_metrics: BTreeMap<String, PerformanceMetrics>,
    total_models: usize,
    is_streaming: bool,
    round_open: bool,
}

impl StreamingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh round for `models`, discarding any previous run.
    /// Duplicate IDs are collapsed.
    pub fn initialize(&mut self, models: &[String]) {
        let mut ordered: Vec<String> = Vec::with_capacity(models.len());
        for m in models {
            if !ordered.contains(m) {
                ordered.push(m.clone());
            }
        }
        *self = Self {
            model_status: ordered
                .iter()
                .map(|m| (m.clone(), ModelStatus::Idle))
                .collect(),
            total_models: ordered.len(),
            is_streaming: !ordered.is_empty(),
            round_open: true,
            models: ordered,
            ..Self::default()
        };
    }

    /// Status of a live, non-terminal model; `None` means the event is ignored.
    fn live_status(&self, model: &str) -> Option<ModelStatus> {
        match self.model_status.get(model) {
            None => {
                debug!(model, "event for model outside this round ignored");
                None
            }
            Some(s) if s.is_terminal() => {
                debug!(model, status = %s, "event for finished model ignored");
                None
            }
            Some(s) => Some(*s),
        }
    }

    /// Overwrite a model's non-terminal status. Terminal targets go
    /// through [`complete`](Self::complete) and [`fail`](Self::fail).
    pub fn set_status(&mut self, model: &str, status: ModelStatus) -> bool {
        if status.is_terminal() {
            debug!(model, status = %status, "terminal status must come from complete/fail");
            return false;
        }
        if self.live_status(model).is_none() {
            return false;
        }
        self.model_status.insert(model.to_string(), status);
        true
    }

    /// Concatenate a chunk; promotes `Idle`/`Typing` to `Streaming`.
    pub fn append_chunk(&mut self, model: &str, chunk: &str) -> bool {
        let Some(status) = self.live_status(model) else {
            return false;
        };
        if status != ModelStatus::Streaming {
            self.model_status
                .insert(model.to_string(), ModelStatus::Streaming);
        }
        self.model_responses
            .entry(model.to_string())
            .or_default()
            .push_str(chunk);
        true
    }

    /// Record the authoritative final text. A repeated completion is a no-op.
    pub fn complete(
        &mut self,
        model: &str,
        final_response: &str,
        metrics: PerformanceMetrics,
    ) -> bool {
        if self.live_status(model).is_none() {
            return false;
        }
        self.model_responses
            .insert(model.to_string(), final_response.to_string());
        self.model_status
            .insert(model.to_string(), ModelStatus::Complete);
        if !self.completed_models.iter().any(|m| m == model) {
            self.completed_models.push(model.to_string());
        }
        self.performance_metrics.insert(model.to_string(), metrics);
        self.is_streaming = self.completed_models.len() != self.total_models;
        true
    }

    /// Mark a model errored. Leaves `completed_models` and `is_streaming` alone.
    pub fn fail(&mut self, model: &str, message: &str) -> bool {
        if self.live_status(model).is_none() {
            return false;
        }
        self.model_status.insert(model.to_string(), ModelStatus::Error);
        self.model_responses
            .insert(model.to_string(), format!("Error: {message}"));
        true
    }

    /// End the round; returns whether it was open.
    pub fn close_round(&mut self) -> bool {
        std::mem::replace(&mut self.round_open, false)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ---- reads -----------------------------------------------------------

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn status(&self, model: &str) -> Option<ModelStatus> {
        self.model_status.get(model).copied()
    }

    pub fn response(&self, model: &str) -> Option<&str> {
        self.model_responses.get(model).map(String::as_str)
    }

    pub fn metrics(&self, model: &str) -> Option<&PerformanceMetrics> {
        self.performance_metrics.get(model)
    }

    pub fn completed_models(&self) -> &[String] {
        &self.completed_models
    }

    pub fn errored_models(&self) -> Vec<&str> {
        self.models
            .iter()
            .filter(|m| self.status(m) == Some(ModelStatus::Error))
            .map(String::as_str)
            .collect()
    }

    pub fn total_models(&self) -> usize {
        self.total_models
    }

    /// True until every model has completed. Errors never count.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// True between `initialize` and `close_round`.
    pub fn is_in_progress(&self) -> bool {
        self.round_open
    }

    pub fn all_terminal(&self) -> bool {
        self.total_models > 0 && self.model_status.values().all(ModelStatus::is_terminal)
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.total_models == 0 {
            return 0.0;
        }
        self.completed_models.len() as f64 / self.total_models as f64
    }

    /// Mean throughput over models with a positive rate.
    pub fn average_chars_per_sec(&self) -> f64 {
        let rates: Vec<f64> = self
            .performance_metrics
            .values()
            .map(|m| m.chars_per_sec)
            .filter(|r| *r > 0.0)
            .collect();
        if rates.is_empty() {
            return 0.0;
        }
        rates.iter().sum::<f64>() / rates.len() as f64
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.performance_metrics
            .values()
            .filter_map(|m| m.cost_usd)
            .sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.performance_metrics
            .values()
            .filter_map(|m| m.token_usage)
            .map(|t| t.total_tokens)
            .sum()
    }
}
