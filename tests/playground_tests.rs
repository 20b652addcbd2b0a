//! Tests for the HTTP fallback path of the playground.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{comparison, FakeBackend};
use model_arena::auth::StaticIdentity;
use model_arena::config::{HistoryConfig, ReconnectPolicy, StreamingConfig};
use model_arena::error::ArenaError;
use model_arena::history::HistoryReconciler;
use model_arena::playground::Playground;
use model_arena::store::SessionStore;
use model_arena::streaming::ModelStatus;
use model_arena::transport::WsTransport;
use model_arena::ui::Ui;

struct Fixture {
    backend: Arc<FakeBackend>,
    store: SessionStore,
    history: Arc<HistoryReconciler>,
    ui: Ui,
    pg: Arc<Playground>,
}

fn fixture() -> Fixture {
    let backend = Arc::new(FakeBackend::default());
    let ui = Ui::default();
    let identity = Arc::new(StaticIdentity::new(Some("tok".into())));
    let history = Arc::new(HistoryReconciler::new(
        backend.clone(),
        identity,
        ui.clone(),
        HistoryConfig::default(),
    ));
    let store = SessionStore::new();
    store.set_session(Some(common::session("s1", &["gpt-4o", "claude-3"])));
    // Never connected; the HTTP path does not touch the socket.
    let transport = Arc::new(WsTransport::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default()));
    let pg = Playground::new(
        transport,
        backend.clone(),
        store.clone(),
        Arc::clone(&history),
        ui.clone(),
        StreamingConfig::default(),
    );
    Fixture {
        backend,
        store,
        history,
        ui,
        pg,
    }
}

#[tokio::test(start_paused = true)]
async fn test_http_round_folds_results_and_records_history() {
    let f = fixture();
    let mut result = comparison("s1", "2026-01-01T00:00:00Z", "hi", &["gpt-4o", "claude-3"]);
    let failed = result.results.get_mut("claude-3").unwrap();
    failed.response = None;
    failed.error = Some("quota exceeded".into());
    *f.backend.http_result.lock().unwrap() = Some(result.clone());

    let returned = f.pg.submit_prompt_http("hi").await.unwrap();
    assert_eq!(returned, result);
    assert_eq!(f.backend.count("submit_prompt_http:s1"), 1);

    let s = f.store.streaming();
    assert!(!s.is_in_progress());
    assert_eq!(s.status("gpt-4o"), Some(ModelStatus::Complete));
    assert_eq!(s.response("gpt-4o"), Some("gpt-4o says hi"));
    assert_eq!(s.status("claude-3"), Some(ModelStatus::Error));
    assert_eq!(s.response("claude-3"), Some("Error: quota exceeded"));
    assert_eq!(s.completed_models(), ["gpt-4o".to_string()]);

    let m = s.metrics("gpt-4o").unwrap();
    assert_eq!(m.char_count, 14);
    assert_eq!(m.duration_ms, 1200);
    assert_eq!(m.chars_per_sec, 11.7);
    assert_eq!(m.token_usage.unwrap().total_tokens, 10);
    assert_eq!(m.cost_usd, Some(0.0025));

    assert_eq!(f.history.len(), 1);
    assert_eq!(f.history.items()[0].result.prompt, "hi");

    // the follow-up reconciliation runs after the refresh delay
    assert_eq!(f.backend.count("history"), 0);
    tokio::time::sleep(Duration::from_millis(1_001)).await;
    assert_eq!(f.backend.count("history"), 1);
}

#[tokio::test]
async fn test_http_failure_closes_round_and_notifies() {
    let f = fixture();
    let err = f.pg.submit_prompt_http("hi").await.unwrap_err();
    assert!(matches!(err, ArenaError::Connect { .. }));
    assert!(!f.store.streaming().is_in_progress());
    assert_eq!(f.ui.titles(), vec!["Submission Failed"]);
    assert!(f.history.is_empty());
}

#[tokio::test]
async fn test_http_without_session_is_rejected() {
    let f = fixture();
    f.store.set_session(None);
    let err = f.pg.submit_prompt_http("hi").await.unwrap_err();
    assert!(matches!(err, ArenaError::NoActiveSession));
    assert_eq!(f.ui.titles(), vec!["No Active Session"]);
    assert!(f.backend.calls().is_empty());
}
