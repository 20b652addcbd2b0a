//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use model_arena::api::Backend;
use model_arena::error::{ArenaError, Result};
use model_arena::models::{AiModel, GroupedModels, ModelCapabilities, ModelStats};
use model_arena::protocol::{ComparisonResult, ModelResult, Session, TokenUsage};

pub fn session(id: &str, models: &[&str]) -> Session {
    Session {
        session_id: id.into(),
        selected_models: models.iter().map(|m| m.to_string()).collect(),
        is_active: true,
        created_at: "2026-01-01T00:00:00Z".into(),
    }
}

pub fn comparison(session_id: &str, created_at: &str, prompt: &str, models: &[&str]) -> ComparisonResult {
    let results: BTreeMap<String, ModelResult> = models
        .iter()
        .map(|m| {
            (
                m.to_string(),
                ModelResult {
                    response: Some(format!("{m} says hi")),
                    error: None,
                    tokens: Some(TokenUsage {
                        prompt_tokens: 4,
                        completion_tokens: 6,
                        total_tokens: 10,
                    }),
                    time_taken_ms: 1200,
                    cost_estimate_usd: 0.0025,
                },
            )
        })
        .collect();
    ComparisonResult {
        session_id: session_id.into(),
        prompt: prompt.into(),
        results,
        created_at: created_at.into(),
    }
}

fn offline(what: &str) -> ArenaError {
    ArenaError::Connect {
        url: format!("http://fake/{what}"),
        detail: "connection refused".into(),
    }
}

/// Scriptable in-memory backend that records every call.
#[derive(Default)]
pub struct FakeBackend {
    pub calls: Mutex<Vec<String>>,
    /// Returned by `get_session`; `None` means 404.
    pub remote_session: Mutex<Option<Session>>,
    pub history: Mutex<Vec<ComparisonResult>>,
    pub http_result: Mutex<Option<ComparisonResult>>,
    pub fail_create: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_end: AtomicBool,
    pub fail_history: AtomicBool,
}

impl FakeBackend {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_models(&self) -> Result<Vec<AiModel>> {
        self.record("list_models");
        Ok(vec![])
    }

    async fn grouped_models(&self) -> Result<GroupedModels> {
        self.record("grouped_models");
        Ok(Default::default())
    }

    async fn providers(&self) -> Result<Vec<String>> {
        self.record("providers");
        Ok(vec![])
    }

    async fn capabilities(&self) -> Result<ModelCapabilities> {
        self.record("capabilities");
        Ok(Default::default())
    }

    async fn model_stats(&self) -> Result<ModelStats> {
        self.record("model_stats");
        Ok(Default::default())
    }

    async fn create_session(&self, models: &[String]) -> Result<Session> {
        self.record(format!("create_session:{}", models.join(",")));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ArenaError::Http {
                status: 500,
                url: "http://fake/sessions".into(),
                message: None,
            });
        }
        let ids: Vec<&str> = models.iter().map(String::as_str).collect();
        Ok(session("fresh", &ids))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.record(format!("get_session:{session_id}"));
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(offline("sessions"));
        }
        Ok(self.remote_session.lock().unwrap().clone())
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        self.record(format!("end_session:{session_id}"));
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(offline("sessions"));
        }
        Ok(())
    }

    async fn submit_prompt_http(&self, session_id: &str, _prompt: &str) -> Result<ComparisonResult> {
        self.record(format!("submit_prompt_http:{session_id}"));
        self.http_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| offline("prompts"))
    }

    async fn history(&self) -> Result<Vec<ComparisonResult>> {
        self.record("history");
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(offline("prompts/history"));
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<ComparisonResult>> {
        self.record(format!("session_history:{session_id}"));
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(offline("prompts/sessions"));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}
