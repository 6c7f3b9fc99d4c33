//! Push connection manager.
//!
//! Owns at most one WebSocket session to the push endpoint. A session is a
//! tokio task that connects, pumps frames into the [`SubscriptionRegistry`],
//! and on close or failure schedules the next attempt according to
//! [`ReconnectConfig`]. Once the retry budget is spent the session parks in
//! [`ConnectionState::Failed`] until `connect()` is called again.

use crate::events::{decode_frame, PushEvent};
use crate::metrics::LiveMetrics;
use crate::registry::SubscriptionRegistry;
use futures_util::{SinkExt, StreamExt};
use soil_common::config::ReconnectConfig;
use soil_common::error::DashboardError;
use soil_common::state::{ConnectionState, ConnectionStateMachine};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct SessionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// How a socket session ended.
enum SessionEnd {
    /// `disconnect()` was called.
    Shutdown,
    /// Peer closed or the stream ended.
    Closed,
    /// Read failed.
    Failed(DashboardError),
}

/// Shared pieces a session task needs.
#[derive(Clone)]
struct SessionContext {
    url: String,
    reconnect: ReconnectConfig,
    registry: Arc<SubscriptionRegistry>,
    metrics: Option<Arc<LiveMetrics>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl SessionContext {
    fn transition(&self, machine: &mut ConnectionStateMachine, target: ConnectionState) {
        let from = machine.state();
        if let Err(e) = machine.transition(target) {
            warn!(error = %e, "Connection state transition rejected");
            return;
        }
        debug!(from = %from, to = %target, attempt = machine.attempt(), "Connection state changed");
        self.state_tx.send_replace(target);
        if let Some(ref metrics) = self.metrics {
            metrics.record_state(target);
        }
    }

    fn dispatch(&self, event: &PushEvent) {
        let delivery = self.registry.trigger(event);
        if let Some(ref metrics) = self.metrics {
            metrics.record_dispatch(event.kind().name(), delivery.failed);
        }
    }

    fn handle_text(&self, text: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.frames_received.inc();
        }
        match decode_frame(text) {
            Ok(Some(event)) => self.dispatch(&event),
            Ok(None) => {
                debug!("Dropping frame with unrecognized type");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_dropped("unrecognized");
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed push frame");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_dropped("malformed");
                }
            }
        }
    }
}

/// Reconnecting client for the push endpoint.
pub struct ConnectionManager {
    ctx: SessionContext,
    state_rx: watch::Receiver<ConnectionState>,
    session: Mutex<Option<SessionHandle>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.ctx.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create an idle manager for `url`.
    pub fn new(
        url: impl Into<String>,
        reconnect: ReconnectConfig,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            ctx: SessionContext {
                url: url.into(),
                reconnect,
                registry,
                metrics: None,
                state_tx: Arc::new(state_tx),
            },
            state_rx,
            session: Mutex::new(None),
        }
    }

    /// Attach Prometheus metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LiveMetrics>) -> Self {
        self.ctx.metrics = Some(metrics);
        self
    }

    /// Registry events are dispatched into.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.ctx.registry
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether a session task exists (connected, connecting, or waiting to retry).
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .map(|s| s.as_ref().is_some_and(|h| !h.task.is_finished()))
            .unwrap_or(false)
    }

    /// Start a new session, replacing any running one.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(&self) {
        self.disconnect().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        info!(url = %ctx.url, "Starting push connection");
        let task = tokio::spawn(run_session(ctx, shutdown_rx));

        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(SessionHandle {
                shutdown: shutdown_tx,
                task,
            });
        }
    }

    /// Stop the running session and cancel any pending retry.
    ///
    /// Idempotent. When this returns no further attempt will be made.
    pub async fn disconnect(&self) {
        let handle = self.session.lock().ok().and_then(|mut guard| guard.take());
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Push session task ended abnormally");
        }
        self.ctx.state_tx.send_replace(ConnectionState::Idle);
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.record_state(ConnectionState::Idle);
        }
        info!("Push connection stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.shutdown.send(true);
                handle.task.abort();
            }
        }
    }
}

async fn run_session(ctx: SessionContext, mut shutdown: watch::Receiver<bool>) {
    let mut machine = ConnectionStateMachine::new();
    ctx.transition(&mut machine, ConnectionState::Connecting);

    loop {
        if let Some(ref metrics) = ctx.metrics {
            metrics.connection_attempts.inc();
        }

        let attempt = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = connect_async(ctx.url.as_str()) => result,
        };

        match attempt {
            Ok((socket, _response)) => {
                ctx.transition(&mut machine, ConnectionState::Open);
                info!(url = %ctx.url, "Push connection open");
                ctx.dispatch(&PushEvent::Connected);

                match pump(socket, &ctx, &mut shutdown).await {
                    SessionEnd::Shutdown => {
                        ctx.dispatch(&PushEvent::Disconnected);
                        break;
                    }
                    SessionEnd::Closed => {
                        info!("Push connection closed by peer");
                    }
                    SessionEnd::Failed(reason) => {
                        warn!(error = %reason, "Push connection failed");
                        ctx.dispatch(&PushEvent::Error(reason));
                    }
                }
                ctx.dispatch(&PushEvent::Disconnected);
            }
            Err(e) => {
                warn!(url = %ctx.url, error = %e, "Push connection attempt failed");
                ctx.dispatch(&PushEvent::Error(DashboardError::Transport(format!(
                    "connect to {} failed: {e}",
                    ctx.url
                ))));
                ctx.dispatch(&PushEvent::Disconnected);
            }
        }

        let next = machine.attempt() + 1;
        if ctx.reconnect.exhausted(next) {
            ctx.transition(&mut machine, ConnectionState::Failed);
            warn!(
                attempts = machine.attempt(),
                "Reconnect attempts exhausted, giving up"
            );
            return;
        }

        ctx.transition(&mut machine, ConnectionState::Reconnecting);
        let delay = ctx.reconnect.delay_for(machine.attempt());
        info!(attempt = machine.attempt(), delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    ctx.transition(&mut machine, ConnectionState::Idle);
}

async fn pump(
    socket: Socket,
    ctx: &SessionContext,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "Close frame not sent");
                }
                return SessionEnd::Shutdown;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => ctx.handle_text(&text),
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Peer sent close");
                    return SessionEnd::Closed;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Ignoring binary push frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return SessionEnd::Failed(DashboardError::Transport(format!("read failed: {e}")))
                }
                None => return SessionEnd::Closed,
            }
        }
    }
}
