//! Comparison history: a local optimistic list reconciled against the backend.
//!
//! A finished comparison is appended locally at once, then a delayed silent
//! refresh replaces the list with the backend's copy. The local append is a
//! latency optimisation; the backend stays the system of record.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::auth::{AuthStatus, Identity};
use crate::config::HistoryConfig;
use crate::error::Result;
use crate::protocol::ComparisonResult;
use crate::ui::{NotificationKind, Ui};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    #[serde(flatten)]
    pub result: ComparisonResult,
}

impl HistoryItem {
    /// Item appended from a live comparison.
    pub fn local(result: ComparisonResult) -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self {
            id: format!("{}-{}", result.session_id, ms),
            result,
        }
    }

    /// Item from the backend list; `index` keeps IDs unique within one fetch.
    pub fn fetched(result: ComparisonResult, index: usize) -> Self {
        Self {
            id: format!("{}-{}-{}", result.session_id, result.created_at, index),
            result,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.result.created_at)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    fn same_comparison(&self, other: &ComparisonResult) -> bool {
        self.result.session_id == other.session_id && self.result.created_at == other.created_at
    }
}

/// Provider inferred from a model ID: the prefix before the first `-`.
pub fn provider_of(model_id: &str) -> &str {
    model_id.split('-').next().unwrap_or(model_id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Case-insensitive match against the prompt and every response.
    pub query: Option<String>,
    /// Substring of any participating model ID.
    pub provider: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn matches(&self, item: &HistoryItem) -> bool {
        if let Some(q) = self.query.as_deref().filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            let in_prompt = item.result.prompt.to_lowercase().contains(&q);
            let in_response = item.result.results.values().any(|r| {
                r.response
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&q))
            });
            if !in_prompt && !in_response {
                return false;
            }
        }
        if let Some(p) = self.provider.as_deref().filter(|p| !p.is_empty()) {
            let p = p.to_lowercase();
            if !item.result.results.keys().any(|m| m.to_lowercase().contains(&p)) {
                return false;
            }
        }
        if self.from.is_some() || self.to.is_some() {
            let Some(at) = item.created_at() else {
                return false;
            };
            if self.from.is_some_and(|from| at < from) || self.to.is_some_and(|to| at > to) {
                return false;
            }
        }
        true
    }
}

/// Matching items, newest first. Undated items sort last.
pub fn filter_items(items: &[HistoryItem], filter: &HistoryFilter) -> Vec<HistoryItem> {
    let mut out: Vec<HistoryItem> = items.iter().filter(|i| filter.matches(i)).cloned().collect();
    out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_comparisons: usize,
    pub total_tokens_used: u64,
    pub total_cost: f64,
    /// Mean model latency in ms across every model result.
    pub average_response_time: f64,
    pub model_usage_count: BTreeMap<String, usize>,
    pub provider_usage_count: BTreeMap<String, usize>,
}

pub fn compute_stats(items: &[HistoryItem]) -> HistoryStats {
    let mut stats = HistoryStats {
        total_comparisons: items.len(),
        ..HistoryStats::default()
    };
    let mut total_ms: u64 = 0;
    let mut results: u64 = 0;
    for item in items {
        for (model, r) in &item.result.results {
            stats.total_tokens_used += r.tokens.map_or(0, |t| t.total_tokens);
            stats.total_cost += r.cost_estimate_usd;
            total_ms += r.time_taken_ms;
            results += 1;
            *stats.model_usage_count.entry(model.clone()).or_default() += 1;
            *stats
                .provider_usage_count
                .entry(provider_of(model).to_string())
                .or_default() += 1;
        }
    }
    if results > 0 {
        stats.average_response_time = total_ms as f64 / results as f64;
    }
    stats
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub export_date: String,
    pub total_items: usize,
    pub stats: HistoryStats,
    pub items: Vec<HistoryItem>,
}

impl HistoryExport {
    pub fn new(items: &[HistoryItem]) -> Self {
        Self {
            export_date: Utc::now().to_rfc3339(),
            total_items: items.len(),
            stats: compute_stats(items),
            items: items.to_vec(),
        }
    }
}

/// Write `items` as pretty JSON.
pub fn export_to(path: &Path, items: &[HistoryItem]) -> Result<HistoryExport> {
    let export = HistoryExport::new(items);
    let json = serde_json::to_string_pretty(&export)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), items = items.len(), "history exported");
    Ok(export)
}

pub fn import_from(path: &Path) -> Result<HistoryExport> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct HistoryState {
    items: Vec<HistoryItem>,
    loading: bool,
    last_error: Option<String>,
    has_fetched: bool,
}

pub struct HistoryReconciler {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn Identity>,
    ui: Ui,
    cfg: HistoryConfig,
    state: Mutex<HistoryState>,
}

impl HistoryReconciler {
    pub fn new(backend: Arc<dyn Backend>, identity: Arc<dyn Identity>, ui: Ui, cfg: HistoryConfig) -> Self {
        Self {
            backend,
            identity,
            ui,
            cfg,
            state: Mutex::new(HistoryState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HistoryState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut g| f(&mut g))
    }

    pub fn items(&self) -> Vec<HistoryItem> {
        self.with_state(|s| s.items.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.with_state(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.with_state(|s| s.loading).unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<String> {
        self.with_state(|s| s.last_error.clone()).flatten()
    }

    pub fn has_fetched(&self) -> bool {
        self.with_state(|s| s.has_fetched).unwrap_or(false)
    }

    /// Prepend a finished comparison. A repeat of the same comparison
    /// replaces the earlier entry.
    pub fn append(&self, result: ComparisonResult) -> HistoryItem {
        let item = HistoryItem::local(result);
        let stored = item.clone();
        self.with_state(move |s| {
            s.items.retain(|i| !i.same_comparison(&stored.result));
            s.items.insert(0, stored);
        });
        debug!(id = %item.id, "history item appended locally");
        item
    }

    fn signed_in(&self) -> bool {
        self.identity.status() == AuthStatus::SignedIn
    }

    async fn fetch(&self) -> Result<bool> {
        if !self.signed_in() {
            debug!("history fetch skipped, not signed in");
            return Ok(false);
        }
        self.with_state(|s| {
            s.loading = true;
            s.last_error = None;
        });
        let outcome = self.backend.history().await;
        self.with_state(|s| {
            s.loading = false;
            s.has_fetched = true;
            match &outcome {
                Ok(list) => {
                    s.items = list
                        .iter()
                        .cloned()
                        .enumerate()
                        .map(|(i, r)| HistoryItem::fetched(r, i))
                        .collect();
                }
                Err(e) => s.last_error = Some(e.user_message()),
            }
        });
        outcome.map(|_| true)
    }

    /// User-initiated reload; failure is surfaced.
    pub async fn refresh(&self) -> Result<()> {
        match self.fetch().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.ui.notify(
                    NotificationKind::Error,
                    "Failed to Load History",
                    Some(e.user_message()),
                    Some(8_000),
                );
                Err(e)
            }
        }
    }

    /// Background reconciliation; failure is only logged.
    pub async fn silent_refresh(&self) {
        match self.fetch().await {
            Ok(true) => debug!(items = self.len(), "history reconciled"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "background history refresh failed"),
        }
    }

    pub async fn session_history(&self, session_id: &str) -> Vec<HistoryItem> {
        if !self.signed_in() {
            debug!(session_id, "session history skipped, not signed in");
            return Vec::new();
        }
        match self.backend.session_history(session_id).await {
            Ok(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, r)| HistoryItem::fetched(r, i))
                .collect(),
            Err(e) => {
                self.ui.notify(
                    NotificationKind::Error,
                    "Failed to Load Session History",
                    Some(e.user_message()),
                    Some(8_000),
                );
                Vec::new()
            }
        }
    }

    /// Queue a silent refresh after `refresh_delay_ms`.
    pub fn schedule_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let this = Arc::clone(self);
        let delay = Duration::from_millis(self.cfg.refresh_delay_ms);
        Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            this.silent_refresh().await;
        }))
    }

    pub fn on_auth_change(&self, status: AuthStatus) {
        if status == AuthStatus::SignedOut {
            self.with_state(|s| *s = HistoryState::default());
            debug!("history cleared on sign-out");
        }
    }

    /// Follow identity changes: clear on sign-out, fetch shortly after sign-in.
    pub fn watch_auth(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.identity.watch();
        let delay = Duration::from_millis(self.cfg.initial_fetch_delay_ms);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                this.on_auth_change(status);
                if status == AuthStatus::SignedIn && !this.has_fetched() {
                    tokio::time::sleep(delay).await;
                    this.silent_refresh().await;
                }
            }
        })
    }

    pub fn filter(&self, filter: &HistoryFilter) -> Vec<HistoryItem> {
        filter_items(&self.items(), filter)
    }

    pub fn stats(&self) -> HistoryStats {
        compute_stats(&self.items())
    }

    pub fn export_to(&self, path: &Path) -> Result<HistoryExport> {
        export_to(path, &self.items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ModelResult, TokenUsage};
    use rstest::rstest;

    fn result(session: &str, created_at: &str, prompt: &str, models: &[(&str, &str)]) -> ComparisonResult {
        ComparisonResult {
            session_id: session.into(),
            prompt: prompt.into(),
            results: models
                .iter()
                .map(|(m, text)| {
                    (
                        m.to_string(),
                        ModelResult {
                            response: Some(text.to_string()),
                            tokens: Some(TokenUsage {
                                prompt_tokens: 1,
                                completion_tokens: 2,
                                total_tokens: 3,
                            }),
                            time_taken_ms: 1000,
                            cost_estimate_usd: 0.5,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            created_at: created_at.into(),
        }
    }

    #[rstest]
    #[case("gpt-4o", "gpt")]
    #[case("claude-3-opus", "claude")]
    #[case("mistral", "mistral")]
    fn provider_is_prefix(#[case] id: &str, #[case] provider: &str) {
        assert_eq!(provider_of(id), provider);
    }

    #[test]
    fn fetched_ids_carry_index() {
        let item = HistoryItem::fetched(result("s", "2026-01-01T00:00:00Z", "p", &[]), 2);
        assert_eq!(item.id, "s-2026-01-01T00:00:00Z-2");
        assert!(HistoryItem::local(result("s", "x", "p", &[])).id.starts_with("s-"));
    }

    #[test]
    fn filter_matches_prompt_or_response_and_sorts_newest_first() {
        let items = vec![
            HistoryItem::fetched(result("a", "2026-01-01T00:00:00Z", "Rust traits", &[("gpt-4o", "x")]), 0),
            HistoryItem::fetched(result("b", "2026-03-01T00:00:00Z", "other", &[("claude-3", "about RUST")]), 1),
            HistoryItem::fetched(result("c", "2026-02-01T00:00:00Z", "python", &[("gpt-4o", "no")]), 2),
        ];
        let f = HistoryFilter {
            query: Some("rust".into()),
            ..Default::default()
        };
        let hits: Vec<String> = filter_items(&items, &f).into_iter().map(|i| i.result.session_id).collect();
        assert_eq!(hits, vec!["b", "a"]);

        let f = HistoryFilter {
            provider: Some("gpt".into()),
            from: DateTime::parse_from_rfc3339("2026-01-15T00:00:00Z").ok().map(|d| d.with_timezone(&Utc)),
            ..Default::default()
        };
        let hits: Vec<String> = filter_items(&items, &f).into_iter().map(|i| i.result.session_id).collect();
        assert_eq!(hits, vec!["c"]);
    }

    #[test]
    fn stats_aggregate_usage() {
        let items = vec![
            HistoryItem::fetched(result("a", "t", "p", &[("gpt-4o", "x"), ("gpt-4", "y")]), 0),
            HistoryItem::fetched(result("b", "t", "p", &[("claude-3", "z")]), 1),
        ];
        let s = compute_stats(&items);
        assert_eq!(s.total_comparisons, 2);
        assert_eq!(s.total_tokens_used, 9);
        assert!((s.total_cost - 1.5).abs() < 1e-9);
        assert_eq!(s.average_response_time, 1000.0);
        assert_eq!(s.provider_usage_count["gpt"], 2);
        assert_eq!(s.model_usage_count["claude-3"], 1);
    }

    #[test]
    fn empty_stats_are_zero() {
        assert_eq!(compute_stats(&[]), HistoryStats::default());
    }

    #[test]
    fn export_shape_is_camel_case() {
        let export = HistoryExport::new(&[HistoryItem::fetched(result("a", "t", "p", &[]), 0)]);
        let v = serde_json::to_value(&export).unwrap();
        assert_eq!(v["totalItems"], 1);
        assert_eq!(v["items"][0]["sessionId"], "a");
        assert!(v["stats"]["totalComparisons"].is_number());
    }
}
