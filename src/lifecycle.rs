//! Session lifecycle: create, end, validate and resume server sessions.
//!
//! Validation failures are rejected before any network call. A session the
//! backend reports as gone is authoritative and clears local state; a probe
//! that fails in transit is inconclusive and leaves everything as it was.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::auth::{acquire_token, AuthStatus, Identity};
use crate::config::{ArenaConfig, SelectionBounds, TokenRetryPolicy};
use crate::error::{ArenaError, Result};
use crate::models::ModelSelection;
use crate::protocol::Session;
use crate::store::SessionStore;
use crate::ui::{NotificationKind, Route, Ui};

/// Outcome of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    /// Backend says the session is gone; local state was cleared.
    Invalid,
    /// The probe itself failed; local state untouched.
    Inconclusive,
    /// No session, or nobody signed in.
    Skipped,
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn Identity>,
    store: SessionStore,
    ui: Ui,
    bounds: SelectionBounds,
    token_retry: TokenRetryPolicy,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn Identity>,
        store: SessionStore,
        ui: Ui,
    ) -> Self {
        Self {
            backend,
            identity,
            store,
            ui,
            bounds: SelectionBounds::default(),
            token_retry: TokenRetryPolicy::default(),
        }
    }

    pub fn from_config(
        cfg: &ArenaConfig,
        backend: Arc<dyn Backend>,
        identity: Arc<dyn Identity>,
        store: SessionStore,
        ui: Ui,
    ) -> Self {
        Self::new(backend, identity, store, ui)
            .with_bounds(cfg.selection)
            .with_token_retry(cfg.auth.token_retry)
    }

    pub fn with_bounds(mut self, bounds: SelectionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_token_retry(mut self, policy: TokenRetryPolicy) -> Self {
        self.token_retry = policy;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn check_selection(&self, model_ids: &[String]) -> Result<()> {
        if model_ids.is_empty() {
            self.ui.notify(
                NotificationKind::Error,
                "No Models Selected",
                Some("Please select at least one model to compare".to_string()),
                None,
            );
            return Err(ArenaError::NoModelsSelected);
        }
        if !self.bounds.contains(model_ids.len()) {
            let err = ArenaError::SelectionOutOfBounds {
                min: self.bounds.min_models,
                max: self.bounds.max_models,
                got: model_ids.len(),
            };
            self.ui.notify(
                NotificationKind::Warning,
                "Invalid Model Selection",
                Some(err.to_string()),
                None,
            );
            return Err(err);
        }
        Ok(())
    }

    pub async fn create_session(&self, model_ids: &[String]) -> Result<Session> {
        self.check_selection(model_ids)?;

        if acquire_token(self.identity.as_ref(), &self.token_retry)
            .await
            .is_none()
        {
            warn!("session creation deferred past retry budget, no token");
            self.ui.notify(
                NotificationKind::Error,
                "Sign in required",
                Some("Please sign in to create a comparison session".to_string()),
                None,
            );
            return Err(ArenaError::AuthNotReady {
                attempts: self.token_retry.max_attempts,
            });
        }

        self.store.set_creating(true);
        self.store.set_session_error(None);
        let result = self.backend.create_session(model_ids).await;
        self.store.set_creating(false);

        match result {
            Ok(session) => {
                info!(session_id = %session.session_id, models = session.selected_models.len(), "session created");
                self.store.set_session(Some(session.clone()));
                self.ui.notify(
                    NotificationKind::Success,
                    "Session Created",
                    Some(format!(
                        "Comparing {} models",
                        session.selected_models.len()
                    )),
                    None,
                );
                self.ui.navigate(Route::Playground);
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "session creation failed");
                self.store.set_session_error(Some(e.user_message()));
                self.ui.notify(
                    NotificationKind::Error,
                    "Session Creation Failed",
                    Some(e.user_message()),
                    None,
                );
                Err(e)
            }
        }
    }

    /// End the current session. On failure local state is kept so client
    /// and server stay in agreement.
    pub async fn end_session(&self) -> Result<()> {
        let Some(session_id) = self.store.session_id() else {
            debug!("end_session with no session");
            return Ok(());
        };
        match self.backend.end_session(&session_id).await {
            Ok(()) => {
                info!(session_id = %session_id, "session ended");
                self.store.reset();
                self.ui.notify(
                    NotificationKind::Info,
                    "Session Ended",
                    Some("Your comparison session has been ended".to_string()),
                    None,
                );
                self.ui.navigate(Route::Playground);
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to end session");
                self.ui.notify(
                    NotificationKind::Error,
                    "Failed to End Session",
                    Some(e.user_message()),
                    None,
                );
                Err(e)
            }
        }
    }

    fn expire(&self, session_id: &str) {
        info!(session_id, "session no longer active, clearing");
        self.store.reset();
        self.ui.notify(
            NotificationKind::Warning,
            "Session Expired",
            Some("Your session is no longer active. Please create a new session.".to_string()),
            None,
        );
        self.ui.navigate(Route::Playground);
    }

    pub async fn validate_session(&self) -> SessionValidity {
        let Some(session_id) = self.store.session_id() else {
            return SessionValidity::Skipped;
        };
        if self.identity.status() != AuthStatus::SignedIn {
            debug!(session_id = %session_id, "validation skipped, not signed in");
            return SessionValidity::Skipped;
        }
        match self.backend.get_session(&session_id).await {
            Ok(Some(s)) if s.is_active => SessionValidity::Valid,
            Ok(_) => {
                self.expire(&session_id);
                SessionValidity::Invalid
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session validation inconclusive");
                SessionValidity::Inconclusive
            }
        }
    }

    /// Adopt an existing server session after checking it is still live.
    pub async fn resume_session(&self, session_id: &str) -> Result<Session> {
        match self.backend.get_session(session_id).await {
            Ok(Some(s)) if s.is_active => {
                info!(session_id, "session resumed");
                self.store.set_session(Some(s.clone()));
                self.ui.navigate(Route::Playground);
                Ok(s)
            }
            Ok(_) => {
                self.expire(session_id);
                Err(ArenaError::NoActiveSession)
            }
            Err(e) => {
                self.ui.notify(
                    NotificationKind::Error,
                    "Failed to Resume Session",
                    Some(e.user_message()),
                    None,
                );
                Err(e)
            }
        }
    }

    /// Drop the current session locally and return to model selection.
    pub fn start_new_session(&self, selection: &mut ModelSelection) {
        self.store.reset();
        selection.clear();
        self.ui.navigate(Route::Models);
    }

    /// Returns whether local state was cleared.
    pub fn on_auth_change(&self, status: AuthStatus) -> bool {
        if status == AuthStatus::SignedOut && self.store.session_id().is_some() {
            info!("signed out, clearing local session");
            self.store.reset();
            return true;
        }
        false
    }

    /// Follow identity changes for as long as the manager lives.
    pub fn watch_auth(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.identity.watch();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                manager.on_auth_change(status);
            }
        })
    }
}
