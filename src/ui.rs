//! Notifications and navigation.
//!
//! Notifications are ephemeral: each one is removed after its duration by a
//! timer task on the current tokio runtime. Outside a runtime they persist
//! until dismissed.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Capacity of the new-notification broadcast.
pub const NOTIFICATION_CHANNEL_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: Option<String>,
    pub timestamp: SystemTime,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Models,
    Playground,
    History,
    Analytics,
}

struct Inner {
    notifications: Mutex<Vec<Notification>>,
    pushed_tx: broadcast::Sender<Notification>,
    route_tx: watch::Sender<Route>,
    default_duration: Duration,
}

/// Cloneable handle shared by every component that reports to the user.
#[derive(Clone)]
pub struct Ui {
    inner: Arc<Inner>,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}

impl Ui {
    pub fn new(default_duration: Duration) -> Self {
        let (pushed_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAP);
        let (route_tx, _) = watch::channel(Route::Models);
        Self {
            inner: Arc::new(Inner {
                notifications: Mutex::new(Vec::new()),
                pushed_tx,
                route_tx,
                default_duration,
            }),
        }
    }

    /// Push a notification. `duration_ms` of `None` uses the default;
    /// `Some(0)` keeps it until dismissed.
    pub fn notify(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: Option<String>,
        duration_ms: Option<u64>,
    ) -> String {
        let duration = duration_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.default_duration);
        let n = Notification {
            id: format!("notification-{}", uuid::Uuid::new_v4()),
            kind,
            title: title.into(),
            message,
            timestamp: SystemTime::now(),
            duration,
        };
        let id = n.id.clone();
        debug!(kind = %n.kind, title = %n.title, "notification");

        if let Ok(mut guard) = self.inner.notifications.lock() {
            guard.push(n.clone());
        }
        // No subscribers is fine.
        let _ = self.inner.pushed_tx.send(n);

        if !duration.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let ui = self.clone();
                let expiring = id.clone();
                handle.spawn(async move {
                    tokio::time::sleep(duration).await;
                    ui.dismiss(&expiring);
                });
            }
        }
        id
    }

    pub fn dismiss(&self, id: &str) {
        if let Ok(mut guard) = self.inner.notifications.lock() {
            guard.retain(|n| n.id != id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.notifications.lock() {
            guard.clear();
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner
            .notifications
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Stream of notifications as they are pushed.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.pushed_tx.subscribe()
    }

    pub fn navigate(&self, route: Route) {
        self.inner.route_tx.send_replace(route);
    }

    pub fn route(&self) -> Route {
        *self.inner.route_tx.borrow()
    }

    pub fn watch_route(&self) -> watch::Receiver<Route> {
        self.inner.route_tx.subscribe()
    }

    /// Titles of the live notifications, oldest first.
    pub fn titles(&self) -> Vec<String> {
        self.notifications().into_iter().map(|n| n.title).collect()
    }
}
