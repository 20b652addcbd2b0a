//! Identity provider seam.
//!
//! The client never talks to an identity provider directly; it only needs a
//! readiness signal and a way to obtain a bearer token. [`StaticIdentity`] is
//! the provider used by the CLI (token from `ARENA_TOKEN`) and by tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::TokenRetryPolicy;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The provider has not settled yet.
    Loading,
    SignedIn,
    SignedOut,
}

#[async_trait]
pub trait Identity: Send + Sync {
    fn status(&self) -> AuthStatus;

    /// Receiver that observes every status change.
    fn watch(&self) -> watch::Receiver<AuthStatus>;

    /// Current token, or `None` while the session is still being minted.
    async fn token(&self) -> Result<Option<String>>;
}

/// Obtain a token with bounded retry.
///
/// Each attempt that sees `Loading`, a missing token, or a provider error
/// sleeps `policy.delay()` before the next one. Returns `None` once
/// `policy.max_attempts` attempts are spent or the user is signed out.
pub async fn acquire_token(identity: &dyn Identity, policy: &TokenRetryPolicy) -> Option<String> {
    for attempt in 1..=policy.max_attempts {
        match identity.status() {
            AuthStatus::SignedOut => {
                debug!(attempt, "identity signed out, no token to acquire");
                return None;
            }
            AuthStatus::Loading => {
                debug!(attempt, max = policy.max_attempts, "identity still loading");
            }
            AuthStatus::SignedIn => match identity.token().await {
                Ok(Some(token)) => {
                    debug!(attempt, "token acquired");
                    return Some(token);
                }
                Ok(None) => {
                    debug!(attempt, max = policy.max_attempts, "no token yet");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "token provider failed");
                }
            },
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay()).await;
        }
    }
    warn!(attempts = policy.max_attempts, "failed to acquire token after max attempts");
    None
}

/// In-memory identity holding an optional token.
pub struct StaticIdentity {
    token: Mutex<Option<String>>,
    status_tx: watch::Sender<AuthStatus>,
}

impl StaticIdentity {
    /// Signed in when `token` is `Some`, signed out otherwise.
    pub fn new(token: Option<String>) -> Self {
        let status = if token.is_some() {
            AuthStatus::SignedIn
        } else {
            AuthStatus::SignedOut
        };
        let (status_tx, _) = watch::channel(status);
        Self {
            token: Mutex::new(token),
            status_tx,
        }
    }

    /// Provider that has not settled yet.
    pub fn loading() -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::Loading);
        Self {
            token: Mutex::new(None),
            status_tx,
        }
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.into());
        }
        self.status_tx.send_replace(AuthStatus::SignedIn);
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
        self.status_tx.send_replace(AuthStatus::SignedOut);
    }

    /// Mark signed in without a token yet (token still being minted).
    pub fn mark_signed_in(&self) {
        self.status_tx.send_replace(AuthStatus::SignedIn);
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    fn status(&self) -> AuthStatus {
        *self.status_tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    async fn token(&self) -> Result<Option<String>> {
        Ok(self.token.lock().ok().and_then(|g| g.clone()))
    }
}
