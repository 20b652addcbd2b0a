//! Session store: the single mutable resource shared by every consumer.
//!
//! All mutation goes through the named methods on [`SessionStore`]; readers
//! take snapshots or subscribe to a `watch` receiver. Inbound stream events
//! are folded in by the synchronous [`SessionSnapshot::apply`] reducer.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::protocol::{Session, ServerEvent};
use crate::streaming::{ModelStatus, PerformanceMetrics, StreamingState};
use crate::transport::ConnectionStatus;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub streaming: StreamingState,
    pub connection: ConnectionStatus,
    pub creating_session: bool,
    pub session_error: Option<String>,
}

impl SessionSnapshot {
    pub fn has_active_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_active)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn session_models(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.selected_models.as_slice())
            .unwrap_or_default()
    }

    /// Fold one inbound event into the snapshot. Returns whether anything changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::PromptReceived(e) => {
                if self.session_id() != Some(e.session_id.as_str()) {
                    debug!(session_id = %e.session_id, "prompt_received for another session ignored");
                    return false;
                }
                // A round opened locally at submission is already initialized.
                if self.streaming.is_in_progress() {
                    return false;
                }
                let models = self.session_models().to_vec();
                self.streaming.initialize(&models);
                true
            }
            ServerEvent::ModelTyping(e) => {
                // Typing never downgrades a model that is already streaming.
                match (self.streaming.status(&e.model), e.is_typing) {
                    (Some(ModelStatus::Idle), true) => {
                        self.streaming.set_status(&e.model, ModelStatus::Typing)
                    }
                    (Some(ModelStatus::Typing), false) => {
                        self.streaming.set_status(&e.model, ModelStatus::Idle)
                    }
                    _ => false,
                }
            }
            ServerEvent::ModelStream(e) => self.streaming.append_chunk(&e.model, &e.chunk),
            ServerEvent::ModelComplete(e) => self.streaming.complete(
                &e.model,
                &e.final_response,
                PerformanceMetrics::from_completion(e),
            ),
            ServerEvent::PromptError(e) => match e.model.as_deref() {
                Some(model) => self.streaming.fail(model, &e.error),
                None => self.streaming.close_round(),
            },
            ServerEvent::ComparisonComplete(e) => {
                if self.session_id() != Some(e.session_id.as_str()) {
                    debug!(session_id = %e.session_id, "comparison_complete for another session ignored");
                    return false;
                }
                self.streaming.close_round()
            }
        }
    }
}

/// Cloneable handle over the shared snapshot.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Read without cloning the whole snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&SessionSnapshot) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    fn modify(&self, f: impl FnOnce(&mut SessionSnapshot) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    // ---- session ---------------------------------------------------------

    pub fn set_session(&self, session: Option<Session>) {
        self.modify(|s| {
            s.session = session;
            true
        });
    }

    pub fn set_creating(&self, creating: bool) {
        self.modify(|s| std::mem::replace(&mut s.creating_session, creating) != creating);
    }

    pub fn set_session_error(&self, error: Option<String>) {
        self.modify(|s| {
            s.session_error = error;
            true
        });
    }

    pub fn set_connection(&self, status: ConnectionStatus) {
        self.modify(|s| std::mem::replace(&mut s.connection, status) != status);
    }

    // ---- streaming -------------------------------------------------------

    pub fn initialize_streaming(&self, models: &[String]) {
        self.modify(|s| {
            s.streaming.initialize(models);
            true
        });
    }

    pub fn set_model_status(&self, model: &str, status: ModelStatus) -> bool {
        self.modify(|s| s.streaming.set_status(model, status))
    }

    pub fn append_chunk(&self, model: &str, chunk: &str) -> bool {
        self.modify(|s| s.streaming.append_chunk(model, chunk))
    }

    pub fn complete_model(&self, model: &str, final_response: &str, metrics: PerformanceMetrics) -> bool {
        self.modify(|s| s.streaming.complete(model, final_response, metrics))
    }

    pub fn fail_model(&self, model: &str, message: &str) -> bool {
        self.modify(|s| s.streaming.fail(model, message))
    }

    pub fn close_round(&self) -> bool {
        self.modify(|s| s.streaming.close_round())
    }

    pub fn reset_streaming(&self) {
        self.modify(|s| {
            s.streaming.reset();
            true
        });
    }

    /// Session teardown. The connection status is owned by the transport
    /// watcher and is left as is.
    pub fn reset(&self) {
        self.modify(|s| {
            s.session = None;
            s.streaming.reset();
            s.creating_session = false;
            s.session_error = None;
            true
        });
    }

    pub fn apply(&self, event: &ServerEvent) -> bool {
        self.modify(|s| s.apply(event))
    }

    // ---- derived ---------------------------------------------------------

    pub fn has_active_session(&self) -> bool {
        self.read(SessionSnapshot::has_active_session)
    }

    pub fn session(&self) -> Option<Session> {
        self.read(|s| s.session.clone())
    }

    pub fn session_id(&self) -> Option<String> {
        self.read(|s| s.session_id().map(str::to_string))
    }

    pub fn session_models(&self) -> Vec<String> {
        self.read(|s| s.session_models().to_vec())
    }

    pub fn streaming(&self) -> StreamingState {
        self.read(|s| s.streaming.clone())
    }
}
