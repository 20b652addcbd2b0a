//! Streaming channel: one persistent WebSocket per client.
//!
//! ## Design
//! - A single background task owns the socket and multiplexes inbound
//!   frames, outbound commands (unbounded mpsc) and a shutdown signal.
//! - Listeners live in a [`ListenerRegistry`] outside the socket, so a
//!   reconnect never registers anything twice.
//! - Connection state is published on a `watch` channel; failures surface
//!   there and nowhere else.
//!
//! ## Reconnect
//! Failed connects back off per [`ReconnectPolicy`] (1 s doubling, capped at
//! 30 s, 5 attempts by default). The counter resets on every successful
//! connect; once attempts are exhausted the status becomes
//! [`ConnectionStatus::Failed`] and the task exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::{ArenaError, Result};
use crate::protocol::{
    ClientCommand, ComparisonComplete, EventKind, ModelComplete, ModelStream, ModelTyping,
    PromptError, PromptReceived, ServerEvent,
};

pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Failed { attempts: u32 },
}

/// Contract every streaming transport honours.
pub trait Transport: Send + Sync {
    /// Idempotent: a live connection is reused.
    fn connect(&self);
    fn is_connected(&self) -> bool;
    /// Logs and returns when not connected.
    fn join_session(&self, session_id: &str);
    /// Errors synchronously when not connected; a prompt is never dropped silently.
    fn submit_prompt(&self, session_id: &str, prompt: &str) -> Result<()>;
    fn on(&self, kind: EventKind, listener: Listener);
    fn remove_all_listeners(&self);
    fn disconnect(&self);
    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Typed registration helpers over [`Transport::on`].
pub trait TransportExt: Transport {
    fn on_prompt_received<F>(&self, f: F)
    where
        F: Fn(&PromptReceived) + Send + Sync + 'static,
    {
        self.on(
            EventKind::PromptReceived,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::PromptReceived(e) = ev {
                    f(e)
                }
            }),
        );
    }

    fn on_model_typing<F>(&self, f: F)
    where
        F: Fn(&ModelTyping) + Send + Sync + 'static,
    {
        self.on(
            EventKind::ModelTyping,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::ModelTyping(e) = ev {
                    f(e)
                }
            }),
        );
    }

    fn on_model_stream<F>(&self, f: F)
    where
        F: Fn(&ModelStream) + Send + Sync + 'static,
    {
        self.on(
            EventKind::ModelStream,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::ModelStream(e) = ev {
                    f(e)
                }
            }),
        );
    }

    fn on_model_complete<F>(&self, f: F)
    where
        F: Fn(&ModelComplete) + Send + Sync + 'static,
    {
        self.on(
            EventKind::ModelComplete,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::ModelComplete(e) = ev {
                    f(e)
                }
            }),
        );
    }

    fn on_comparison_complete<F>(&self, f: F)
    where
        F: Fn(&ComparisonComplete) + Send + Sync + 'static,
    {
        self.on(
            EventKind::ComparisonComplete,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::ComparisonComplete(e) = ev {
                    f(e)
                }
            }),
        );
    }

    fn on_error<F>(&self, f: F)
    where
        F: Fn(&PromptError) + Send + Sync + 'static,
    {
        self.on(
            EventKind::PromptError,
            Arc::new(move |ev: &ServerEvent| {
                if let ServerEvent::PromptError(e) = ev {
                    f(e)
                }
            }),
        );
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ListenerRegistry {
    by_kind: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn add(&self, kind: EventKind, listener: Listener) {
        if let Ok(mut guard) = self.by_kind.write() {
            guard.entry(kind).or_default().push(listener);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.by_kind.write() {
            guard.clear();
        }
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.by_kind
            .read()
            .map(|g| g.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Invoke every listener for the event's kind; returns how many ran.
    ///
    /// Listeners are cloned out before being called so a listener may
    /// register or clear without deadlocking.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let listeners: Vec<Listener> = self
            .by_kind
            .read()
            .map(|g| g.get(&event.kind()).cloned().unwrap_or_default())
            .unwrap_or_default();
        for l in &listeners {
            l(event);
        }
        listeners.len()
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

struct Shared {
    listeners: ListenerRegistry,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    /// Bumped on every connect/disconnect; a task only publishes while its
    /// generation is current.
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == gen
    }

    fn set_status(&self, gen: u64, status: ConnectionStatus) {
        if self.is_current(gen) {
            self.status_tx.send_replace(status);
        }
    }

    fn set_outbound(&self, gen: u64, tx: Option<mpsc::UnboundedSender<ClientCommand>>) {
        if !self.is_current(gen) {
            return;
        }
        if let Ok(mut guard) = self.outbound.lock() {
            *guard = tx;
        }
    }

    fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                let n = self.listeners.dispatch(&event);
                debug!(event = %event.kind(), listeners = n, "inbound event");
            }
            Err(e) => warn!(error = %e, "unparseable frame skipped"),
        }
    }

    fn send(&self, cmd: ClientCommand) -> Result<()> {
        let guard = self.outbound.lock().map_err(|_| ArenaError::NotConnected)?;
        match guard.as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| ArenaError::NotConnected),
            None => Err(ArenaError::NotConnected),
        }
    }
}

enum PumpEnd {
    Shutdown,
    Dropped(String),
}

pub struct WsTransport {
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            url: url.into(),
            policy,
            shared: Arc::new(Shared {
                listeners: ListenerRegistry::default(),
                outbound: Mutex::new(None),
                status_tx,
                shutdown_tx: Mutex::new(None),
                task: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Consecutive failed connects since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.listeners.count(kind)
    }

    async fn run(
        url: String,
        policy: ReconnectPolicy,
        shared: Arc<Shared>,
        gen: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() || !shared.is_current(gen) {
                break;
            }
            shared.set_status(gen, ConnectionStatus::Connecting { attempt: failures + 1 });

            let attempt = tokio::select! {
                r = tokio_tungstenite::connect_async(url.as_str()) => r,
                _ = shutdown.changed() => break,
            };

            match attempt {
                Ok((ws, _resp)) => {
                    failures = 0;
                    shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    info!(url = %url, "WebSocket connected");

                    let (tx, rx) = mpsc::unbounded_channel();
                    shared.set_outbound(gen, Some(tx));
                    shared.set_status(gen, ConnectionStatus::Connected);

                    let end = Self::pump(ws, rx, &shared, &mut shutdown).await;

                    shared.set_outbound(gen, None);
                    shared.set_status(gen, ConnectionStatus::Disconnected);
                    match end {
                        PumpEnd::Shutdown => break,
                        PumpEnd::Dropped(reason) => {
                            warn!(url = %url, reason = %reason, "WebSocket disconnected, reconnecting");
                        }
                    }
                    let delay = policy.delay_for(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(e) => {
                    failures += 1;
                    shared.reconnect_attempts.store(failures, Ordering::SeqCst);
                    warn!(url = %url, attempt = failures, error = %e, "WebSocket connection error");

                    if failures >= policy.max_attempts {
                        error!(url = %url, attempts = failures, "WebSocket reconnection failed after maximum attempts");
                        shared.set_status(gen, ConnectionStatus::Failed { attempts: failures });
                        return;
                    }
                    let delay = policy.delay_for(failures);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        shared.set_status(gen, ConnectionStatus::Disconnected);
    }

    async fn pump(
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut outbound: mpsc::UnboundedReceiver<ClientCommand>,
        shared: &Shared,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpEnd {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => shared.dispatch_text(&text),
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                            return PumpEnd::Dropped(e.to_string());
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => return PumpEnd::Dropped("server closed".into()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpEnd::Dropped(e.to_string()),
                    None => return PumpEnd::Dropped("stream ended".into()),
                },
                cmd = outbound.recv() => match cmd {
                    Some(cmd) => match serde_json::to_string(&cmd) {
                        Ok(text) => {
                            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                                return PumpEnd::Dropped(e.to_string());
                            }
                        }
                        Err(e) => error!(error = %e, "failed to serialize command"),
                    },
                    // Sender cleared by disconnect().
                    None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return PumpEnd::Shutdown;
                    }
                },
                _ = shutdown.changed() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return PumpEnd::Shutdown;
                }
            }
        }
    }
}

impl Transport for WsTransport {
    fn connect(&self) {
        let mut task = match self.shared.task.lock() {
            Ok(t) => t,
            Err(_) => return,
        };
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(url = %self.url, "connect() reusing live connection");
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                error!(url = %self.url, "connect() called outside a tokio runtime");
                self.shared
                    .status_tx
                    .send_replace(ConnectionStatus::Failed { attempts: 0 });
                return;
            }
        };

        let gen = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Ok(mut guard) = self.shared.shutdown_tx.lock() {
            *guard = Some(shutdown_tx);
        }
        *task = Some(handle.spawn(Self::run(
            self.url.clone(),
            self.policy,
            Arc::clone(&self.shared),
            gen,
            shutdown_rx,
        )));
    }

    fn is_connected(&self) -> bool {
        let has_sender = self
            .shared
            .outbound
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false);
        has_sender && *self.shared.status_tx.borrow() == ConnectionStatus::Connected
    }

    fn join_session(&self, session_id: &str) {
        let cmd = ClientCommand::JoinSession {
            session_id: session_id.to_string(),
        };
        match self.shared.send(cmd) {
            Ok(()) => info!(session_id, "joining session"),
            Err(_) => warn!(session_id, "WebSocket not connected. Cannot join session."),
        }
    }

    fn submit_prompt(&self, session_id: &str, prompt: &str) -> Result<()> {
        self.shared.send(ClientCommand::SubmitPrompt {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
        })?;
        info!(session_id, "prompt submitted over WebSocket");
        Ok(())
    }

    fn on(&self, kind: EventKind, listener: Listener) {
        self.shared.listeners.add(kind, listener);
    }

    fn remove_all_listeners(&self) {
        self.shared.listeners.clear();
    }

    fn disconnect(&self) {
        info!(url = %self.url, "disconnecting WebSocket");
        // Retire the running task's generation before signalling it.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.shared.outbound.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.shared.shutdown_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(true);
            }
        }
        if let Ok(mut guard) = self.shared.task.lock() {
            guard.take();
        }
        self.shared
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.shared.shutdown_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModelTyping;
    use std::sync::atomic::AtomicUsize;

    fn typing(model: &str) -> ServerEvent {
        ServerEvent::ModelTyping(ModelTyping {
            model: model.into(),
            is_typing: true,
            timestamp: String::new(),
        })
    }

    #[test]
    fn registry_dispatches_by_kind() {
        let reg = ListenerRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        reg.add(
            EventKind::ModelTyping,
            Arc::new(move |_: &ServerEvent| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(reg.dispatch(&typing("a")), 1);
        let other = ServerEvent::PromptError(PromptError {
            error: "x".into(),
            session_id: None,
            model: None,
            timestamp: String::new(),
        });
        assert_eq!(reg.dispatch(&other), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_clear_drops_all() {
        let reg = ListenerRegistry::default();
        reg.add(EventKind::ModelTyping, Arc::new(|_: &ServerEvent| {}));
        reg.add(EventKind::ModelStream, Arc::new(|_: &ServerEvent| {}));
        reg.clear();
        assert_eq!(reg.count(EventKind::ModelTyping), 0);
        assert_eq!(reg.dispatch(&typing("a")), 0);
    }

    #[test]
    fn listener_may_clear_registry_during_dispatch() {
        let reg = Arc::new(ListenerRegistry::default());
        let r = Arc::clone(&reg);
        reg.add(EventKind::ModelTyping, Arc::new(move |_: &ServerEvent| r.clear()));
        assert_eq!(reg.dispatch(&typing("a")), 1);
        assert_eq!(reg.count(EventKind::ModelTyping), 0);
    }

    #[test]
    fn submit_on_fresh_transport_fails_loudly() {
        let t = WsTransport::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default());
        let err = t.submit_prompt("s1", "hello").unwrap_err();
        assert!(matches!(err, ArenaError::NotConnected));
        assert!(!t.is_connected());
    }

    #[test]
    fn join_on_fresh_transport_is_silent() {
        let t = WsTransport::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default());
        t.join_session("s1");
        assert_eq!(*t.status().borrow(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn connect_outside_runtime_reports_failure() {
        let t = WsTransport::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default());
        t.connect();
        assert_eq!(*t.status().borrow(), ConnectionStatus::Failed { attempts: 0 });
    }

    #[test]
    fn typed_helpers_filter_variants() {
        let t = WsTransport::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        t.on_model_typing(move |e| s.lock().unwrap().push(e.model.clone()));
        assert_eq!(t.listener_count(EventKind::ModelTyping), 1);
        t.shared.dispatch_text(&serde_json::to_string(&typing("gpt")).unwrap());
        t.shared.dispatch_text("not json");
        assert_eq!(*seen.lock().unwrap(), vec!["gpt".to_string()]);
        t.remove_all_listeners();
        assert_eq!(t.listener_count(EventKind::ModelTyping), 0);
    }
}
