use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::packet::Packet;
use crate::credentials::CredentialPair;
use crate::error::RealtimeError;
use crate::refresh::{CredentialListener, RefreshCoordinator};

const EVENT_BROADCAST_CAPACITY: usize = 256;
const OUTGOING_CAPACITY: usize = 64;

/// Credential recoveries attempted after auth rejections without a
/// successful connection in between.
const MAX_CONSECUTIVE_RECOVERIES: u32 = 1;

/// Connect-error messages that mean the access token itself was refused.
const AUTH_REJECTION_MARKERS: &[&str] = &[
    "jwt expired",
    "jwt malformed",
    "invalid signature",
    "invalid token",
    "unauthorized",
];

/// Whether a connect error is about the credential rather than anything else
/// the server may refuse a connection for.
fn is_auth_rejection(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    AUTH_REJECTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Observable state of the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeStatus {
    pub state: ConnectionState,
    /// Access token the connection was opened with.
    pub token: Option<String>,
}

impl RealtimeStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            token: None,
        }
    }
}

/// A server-sent event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEvent {
    pub name: String,
    pub payload: Value,
}

/// How a connection ended when nobody asked it to.
enum SessionEnd {
    Cancelled,
    Closed,
    /// The server refused the access token.
    Rejected(String),
    /// The server refused the connection for another reason.
    Refused(String),
}

struct ActiveConnection {
    token: String,
    cancel: CancellationToken,
    outgoing: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl ActiveConnection {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// What a connection task needs from the bridge.
struct ConnectionContext {
    id: u64,
    url: Url,
    token: String,
    cancel: CancellationToken,
    status: Arc<watch::Sender<RealtimeStatus>>,
    generation: Arc<AtomicU64>,
    events: broadcast::Sender<RealtimeEvent>,
    bridge: Weak<RealtimeBridge>,
}

impl ConnectionContext {
    /// Update the status unless a newer connection has taken over.
    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if self.generation.load(Ordering::SeqCst) != self.id {
                return false;
            }
            status.state = state;
            status.token = Some(self.token.clone());
            true
        });
    }
}

/// Persistent duplex connection authenticated with the session credential.
///
/// One physical connection at a time. A rotated credential reconnects the
/// bridge while it is engaged, that is between [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect).
pub struct RealtimeBridge {
    url: Url,
    coordinator: RefreshCoordinator,
    status: Arc<watch::Sender<RealtimeStatus>>,
    generation: Arc<AtomicU64>,
    events: broadcast::Sender<RealtimeEvent>,
    slot: Mutex<Option<ActiveConnection>>,
    recoveries: AtomicU32,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    this: Weak<RealtimeBridge>,
}

impl fmt::Debug for RealtimeBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeBridge")
            .field("url", &self.url.as_str())
            .field("state", &self.status.borrow().state)
            .finish()
    }
}

impl RealtimeBridge {
    /// `shutdown` cancels every task of the bridge when fired.
    pub fn new(
        url: Url,
        coordinator: RefreshCoordinator,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(RealtimeStatus::disconnected());
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Arc::new_cyclic(|this| Self {
            url,
            coordinator,
            status: Arc::new(status),
            generation: Arc::new(AtomicU64::new(0)),
            events,
            slot: Mutex::new(None),
            recoveries: AtomicU32::new(0),
            shutdown,
            tasks: TaskTracker::new(),
            this: this.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> RealtimeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RealtimeStatus> {
        self.status.subscribe()
    }

    /// Receive server events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Whether the caller wants a connection.
    pub fn is_engaged(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Open a connection authenticated with `token`.
    ///
    /// No-op when already connected or connecting with the same token. Any
    /// other connection is closed before the new one is opened.
    pub fn connect(&self, token: &str) {
        self.recoveries.store(0, Ordering::SeqCst);
        self.open(token, false);
    }

    /// Close the connection and stop following credential rotations.
    pub async fn disconnect(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.status.send_replace(RealtimeStatus::disconnected());
            slot.take()
        };
        if let Some(previous) = previous {
            info!("Disconnecting realtime connection");
            previous.stop().await;
        }
    }

    /// Send an event to the server.
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), RealtimeError> {
        let outgoing = {
            let slot = self.slot.lock();
            match slot.as_ref() {
                Some(active) if self.status.borrow().state == ConnectionState::Connected => {
                    active.outgoing.clone()
                }
                _ => return Err(RealtimeError::NotConnected),
            }
        };
        outgoing
            .send(Packet::event(name, payload).encode())
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Close the connection and wait for every task of the bridge to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect().await;
        self.tasks.close();
        self.tasks.wait().await;
        debug!("Realtime bridge shut down");
    }

    fn open(&self, token: &str, only_if_engaged: bool) {
        if self.shutdown.is_cancelled() {
            debug!("Realtime bridge is shut down, ignoring connect");
            return;
        }

        let mut slot = self.slot.lock();
        match slot.as_ref() {
            None if only_if_engaged => return,
            Some(active) if active.token == token => {
                if self.status.borrow().state != ConnectionState::Disconnected {
                    trace!("Realtime connection already uses this credential");
                    return;
                }
            }
            _ => {}
        }

        let previous = slot.take();
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_replace(RealtimeStatus {
            state: ConnectionState::Connecting,
            token: Some(token.to_string()),
        });

        let cancel = self.shutdown.child_token();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let context = ConnectionContext {
            id,
            url: self.url.clone(),
            token: token.to_string(),
            cancel: cancel.clone(),
            status: Arc::clone(&self.status),
            generation: Arc::clone(&self.generation),
            events: self.events.clone(),
            bridge: self.this.clone(),
        };
        let task = tokio::spawn(run_connection(context, previous, outgoing_rx));

        *slot = Some(ActiveConnection {
            token: token.to_string(),
            cancel,
            outgoing: outgoing_tx,
            task,
        });
    }

    /// Refresh the credential after the server refused `token`, then reconnect.
    fn recover_from_rejection(&self, token: String) {
        let attempt = self.recoveries.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_CONSECUTIVE_RECOVERIES {
            warn!(attempt, "Realtime connection rejected again, not recovering");
            return;
        }

        let coordinator = self.coordinator.clone();
        let cancel = self.shutdown.child_token();
        let this = self.this.clone();
        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = coordinator.recover(&token) => result,
            };
            match result {
                Ok(credential) => {
                    if let Some(bridge) = this.upgrade() {
                        bridge.open(&credential.access_token, true);
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Realtime credential recovery failed");
                }
            }
        });
    }
}

impl CredentialListener for RealtimeBridge {
    fn on_credential_rotated(&self, credential: &CredentialPair) {
        debug!("Credential rotated, reconnecting realtime bridge if engaged");
        self.open(&credential.access_token, true);
    }
}

async fn run_connection(
    ctx: ConnectionContext,
    previous: Option<ActiveConnection>,
    mut outgoing: mpsc::Receiver<String>,
) {
    if let Some(previous) = previous {
        previous.stop().await;
    }

    match session(&ctx, &mut outgoing).await {
        Ok(SessionEnd::Cancelled) => {
            debug!(id = ctx.id, "Realtime connection cancelled");
        }
        Ok(SessionEnd::Closed) => {
            info!("Realtime connection closed by server");
            ctx.set_state(ConnectionState::Disconnected);
        }
        Ok(SessionEnd::Rejected(message)) => {
            warn!(%message, "Realtime connection rejected");
            ctx.set_state(ConnectionState::Disconnected);
            if let Some(bridge) = ctx.bridge.upgrade() {
                bridge.recover_from_rejection(ctx.token.clone());
            }
        }
        Ok(SessionEnd::Refused(message)) => {
            warn!(%message, "Realtime connection refused");
            ctx.set_state(ConnectionState::Disconnected);
        }
        Err(error) => {
            warn!(error = %error, "Realtime connection lost");
            ctx.set_state(ConnectionState::Disconnected);
        }
    }
}

async fn session(
    ctx: &ConnectionContext,
    outgoing: &mut mpsc::Receiver<String>,
) -> Result<SessionEnd, RealtimeError> {
    info!(url = %ctx.url, "Connecting realtime bridge");
    let (mut stream, _) = tokio::select! {
        _ = ctx.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = connect_async(ctx.url.as_str()) => result?,
    };

    // Engine handshake: the server speaks first.
    let open = loop {
        let frame = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str())? {
                Packet::Open(info) => break info,
                other => {
                    return Err(RealtimeError::protocol(format!(
                        "expected open packet, got {other:?}"
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    };
    trace!(sid = %open.sid, "Engine session opened");

    stream
        .send(Message::text(Packet::connect_with_token(&ctx.token).encode()))
        .await?;

    let liveness = open.liveness_window();
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);
    let mut connected = false;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                if connected {
                    let _ = stream.send(Message::text(Packet::Disconnect.encode())).await;
                }
                let _ = stream.close(None).await;
                return Ok(SessionEnd::Cancelled);
            }

            _ = &mut deadline => {
                return Err(RealtimeError::protocol("ping timeout"));
            }

            Some(frame) = outgoing.recv(), if connected => {
                stream.send(Message::text(frame)).await?;
            }

            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                let packet = match Packet::decode(text.as_str()) {
                    Ok(packet) => packet,
                    Err(error) => {
                        warn!(error = %error, "Ignoring malformed realtime frame");
                        continue;
                    }
                };

                match packet {
                    Packet::Ping => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                        stream.send(Message::text(Packet::Pong.encode())).await?;
                    }
                    Packet::Connect(_) if !connected => {
                        connected = true;
                        info!("Realtime bridge connected");
                        ctx.set_state(ConnectionState::Connected);
                        if let Some(bridge) = ctx.bridge.upgrade() {
                            bridge.recoveries.store(0, Ordering::SeqCst);
                        }
                    }
                    Packet::ConnectError { message } if is_auth_rejection(&message) => {
                        return Ok(SessionEnd::Rejected(message));
                    }
                    Packet::ConnectError { message } => return Ok(SessionEnd::Refused(message)),
                    Packet::Event { name, payload } => {
                        trace!(%name, "Realtime event");
                        // No subscribers is fine.
                        let _ = ctx.events.send(RealtimeEvent { name, payload });
                    }
                    Packet::Disconnect | Packet::Close => return Ok(SessionEnd::Closed),
                    _ => {}
                }
            }
        }
    }
}
