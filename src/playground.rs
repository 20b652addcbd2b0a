//! Comparison driver: wires the transport into the store, history and UI.
//!
//! Inbound events are forwarded by listeners into an mpsc channel and
//! drained by one pump task, so the store sees them in arrival order.
//! Rounds are tagged with a generation; a timer only acts on the round it
//! was armed for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::config::StreamingConfig;
use crate::error::{ArenaError, Result};
use crate::history::HistoryReconciler;
use crate::protocol::{ComparisonResult, EventKind, ServerEvent};
use crate::store::SessionStore;
use crate::streaming::PerformanceMetrics;
use crate::transport::{ConnectionStatus, Transport};
use crate::ui::{NotificationKind, Ui};

pub struct Playground {
    transport: Arc<dyn Transport>,
    backend: Arc<dyn Backend>,
    store: SessionStore,
    history: Arc<HistoryReconciler>,
    ui: Ui,
    cfg: StreamingConfig,
    round: AtomicU64,
    /// Round generation whose settle timer is already armed.
    settle_armed: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Playground {
    pub fn new(
        transport: Arc<dyn Transport>,
        backend: Arc<dyn Backend>,
        store: SessionStore,
        history: Arc<HistoryReconciler>,
        ui: Ui,
        cfg: StreamingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            backend,
            store,
            history,
            ui,
            cfg,
            round: AtomicU64::new(0),
            settle_armed: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn history(&self) -> &Arc<HistoryReconciler> {
        &self.history
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.tasks.lock().map(|t| !t.is_empty()).unwrap_or(false)
    }

    /// Bind the transport to the current session and connect.
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let session_id = self.store.session_id().ok_or(ArenaError::NoActiveSession)?;
        if self.is_attached() {
            self.detach();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            self.transport.on(
                kind,
                Arc::new(move |ev: &ServerEvent| {
                    let _ = tx.send(ev.clone());
                }),
            );
        }

        let weak = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let Some(this) = weak.upgrade() else { break };
                this.handle_event(&ev);
            }
        });

        let weak = Arc::downgrade(self);
        let mut status_rx = self.transport.status();
        let watcher = tokio::spawn(async move {
            loop {
                let status = *status_rx.borrow_and_update();
                let Some(this) = weak.upgrade() else { break };
                match status {
                    ConnectionStatus::Connected => this.transport.join_session(&session_id),
                    ConnectionStatus::Failed { attempts } => {
                        this.ui.notify(
                            NotificationKind::Error,
                            "Connection Error",
                            Some(format!(
                                "Unable to connect to streaming server after {attempts} attempts"
                            )),
                            None,
                        );
                    }
                    _ => {}
                }
                // Published after the join is queued, so a caller that waits
                // for `Connected` never submits ahead of it.
                this.store.set_connection(status);
                drop(this);
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(pump);
            tasks.push(watcher);
        }
        self.transport.connect();
        Ok(())
    }

    /// Drop every listener and the connection together, then stop the
    /// spawned tasks. Pending timers become stale.
    pub fn detach(&self) {
        self.transport.remove_all_listeners();
        self.transport.disconnect();
        if let Ok(mut tasks) = self.tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
        self.round.fetch_add(1, Ordering::SeqCst);
        self.store.set_connection(ConnectionStatus::Disconnected);
    }

    fn check_prompt(&self, prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            self.ui.notify(
                NotificationKind::Warning,
                "Prompt Required",
                Some("Enter a prompt to compare models".to_string()),
                None,
            );
            return Err(ArenaError::EmptyPrompt);
        }
        Ok(())
    }

    /// Open a new round locally and return its generation.
    fn open_round(&self) -> u64 {
        let models = self.store.session_models();
        self.store.initialize_streaming(&models);
        self.round.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn submit_prompt(self: &Arc<Self>, prompt: &str) -> Result<()> {
        self.check_prompt(prompt)?;
        let session_id = match self.store.session_id() {
            Some(id) if self.transport.is_connected() => id,
            _ => {
                self.ui.notify(
                    NotificationKind::Error,
                    "Connection Required",
                    Some("Please ensure you have an active session and are connected".to_string()),
                    None,
                );
                return Err(ArenaError::NotConnected);
            }
        };

        let gen = self.open_round();
        if let Err(e) = self.transport.submit_prompt(&session_id, prompt) {
            self.store.close_round();
            self.ui.notify(
                NotificationKind::Error,
                "Submission Failed",
                Some(e.user_message()),
                None,
            );
            return Err(e);
        }
        info!(session_id = %session_id, round = gen, "prompt submitted");
        self.arm_timeout(gen, Duration::from_millis(self.cfg.round_timeout_ms));
        Ok(())
    }

    /// Reduce one event into the store, then run its side effects.
    pub fn handle_event(self: &Arc<Self>, event: &ServerEvent) {
        let was_open = self.store.read(|s| s.streaming.is_in_progress());
        let changed = self.store.apply(event);
        debug!(event = %event.kind(), changed, "event applied");

        match event {
            ServerEvent::PromptReceived(p) if changed && !was_open => {
                // Round started on the server side: give it its own generation
                // so timers armed for an earlier round cannot close it.
                let gen = self.round.fetch_add(1, Ordering::SeqCst) + 1;
                info!(session_id = %p.session_id, round = gen, "round opened by server");
                self.arm_timeout(gen, Duration::from_millis(self.cfg.round_timeout_ms));
            }
            ServerEvent::PromptError(e) => {
                let message = match &e.model {
                    Some(model) => format!("{model}: {}", e.error),
                    None => e.error.clone(),
                };
                self.ui
                    .notify(NotificationKind::Error, "Streaming Error", Some(message), None);
            }
            ServerEvent::ComparisonComplete(c)
                if self.store.session_id().as_deref() == Some(c.session_id.as_str()) =>
            {
                info!(session_id = %c.session_id, "comparison complete");
                self.history.append(c.to_result());
                self.history.schedule_refresh();
            }
            _ => {}
        }

        let settle = self
            .store
            .read(|s| s.streaming.all_terminal() && s.streaming.is_in_progress());
        let gen = self.round();
        if settle && self.settle_armed.swap(gen, Ordering::SeqCst) != gen {
            debug!(round = gen, "all models terminal, waiting for comparison_complete");
            self.arm_timeout(gen, Duration::from_millis(self.cfg.settle_timeout_ms));
        }
    }

    fn arm_timeout(self: &Arc<Self>, gen: u64, after: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(this) = weak.upgrade() {
                this.on_timeout(gen);
            }
        });
    }

    /// Returns whether the timer closed the round.
    pub fn on_timeout(&self, gen: u64) -> bool {
        if self.round() != gen {
            debug!(round = gen, "stale timer ignored");
            return false;
        }
        if !self.store.close_round() {
            return false;
        }
        warn!(round = gen, "comparison timed out, showing partial results");
        self.ui.notify(
            NotificationKind::Warning,
            "Comparison Timed Out",
            Some("Some models did not finish. Showing partial results.".to_string()),
            None,
        );
        true
    }

    /// Non-streaming fallback: one HTTP round trip folded into the store.
    pub async fn submit_prompt_http(self: &Arc<Self>, prompt: &str) -> Result<ComparisonResult> {
        self.check_prompt(prompt)?;
        let Some(session_id) = self.store.session_id() else {
            self.ui.notify(
                NotificationKind::Error,
                "No Active Session",
                Some("Create a session before submitting a prompt".to_string()),
                None,
            );
            return Err(ArenaError::NoActiveSession);
        };

        self.open_round();
        let result = match self.backend.submit_prompt_http(&session_id, prompt).await {
            Ok(r) => r,
            Err(e) => {
                self.store.close_round();
                self.ui.notify(
                    NotificationKind::Error,
                    "Submission Failed",
                    Some(e.user_message()),
                    None,
                );
                return Err(e);
            }
        };

        for (model, r) in &result.results {
            match (&r.error, &r.response) {
                (Some(err), _) => {
                    let failure = ArenaError::Generation {
                        model: model.clone(),
                        message: err.clone(),
                    };
                    warn!(error = %failure, kind = ?failure.kind(), "model returned an error");
                    self.store.fail_model(model, err);
                }
                (None, response) => {
                    let text = response.as_deref().unwrap_or_default();
                    let metrics = PerformanceMetrics::compute(
                        text,
                        r.time_taken_ms,
                        r.tokens,
                        Some(r.cost_estimate_usd),
                    );
                    self.store.complete_model(model, text, metrics);
                }
            }
        }
        self.store.close_round();
        self.history.append(result.clone());
        self.history.schedule_refresh();
        Ok(result)
    }

    /// Discard local round state. Server-side work is not cancelled.
    pub fn new_comparison(&self) {
        self.round.fetch_add(1, Ordering::SeqCst);
        self.store.reset_streaming();
    }

    /// Wait until the transport reports `Connected`, failing on `Failed`
    /// or after `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut rx = self.store.subscribe();
        let settled = tokio::time::timeout(
            limit,
            rx.wait_for(|s| {
                matches!(
                    s.connection,
                    ConnectionStatus::Connected | ConnectionStatus::Failed { .. }
                )
            }),
        )
        .await;
        match settled {
            Ok(Ok(snap)) if snap.connection == ConnectionStatus::Connected => Ok(()),
            _ => Err(ArenaError::NotConnected),
        }
    }

    /// Resolve once the current round is closed.
    pub async fn wait_round_closed(&self) {
        let mut rx = self.store.subscribe();
        let _ = rx.wait_for(|s| !s.streaming.is_in_progress()).await;
    }
}

impl Drop for Playground {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for t in tasks.drain(..) {
                t.abort();
            }
        }
    }
}
