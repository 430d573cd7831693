//! Credential refresh coordination.
//!
//! Orchestrates the refresh exchange for every caller that hit an expired
//! access credential:
//!
//! - at most one exchange is in flight; later callers queue behind it
//! - a caller that was rejected with a credential that has since been rotated
//!   gets the current pair back without a new exchange
//! - the exchange runs on its own task, so dropping the caller that started
//!   it never strands the queue
//! - a failed exchange signs the session out and stays failed until a
//!   successful sign-in calls [`RefreshCoordinator::reset`]
//! - sign-in, sign-out and restore change the session through
//!   [`RefreshCoordinator::suspend`], so no exchange overlaps an identity
//!   change

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::endpoints;
use crate::credentials::{CredentialPair, CredentialStore, StorageKey};
use crate::dispatcher::{ApiRequest, HttpTransport, Outcome};
use crate::error::{ApiError, Result};
use crate::notify::Notifier;
use crate::session::{Profile, SessionState, SessionUpdate};

/// Visible phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    /// The last exchange was rejected; no further exchange until reset.
    Failed,
    /// The session identity is being replaced or was signed out; no exchange
    /// until reset.
    Suspended,
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Refreshing => write!(f, "refreshing"),
            Self::Failed => write!(f, "failed"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// Why a queued caller did not get a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    Exhausted,
    Cancelled,
}

impl From<RefreshFailure> for ApiError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Exhausted => ApiError::SessionExpired,
            RefreshFailure::Cancelled => ApiError::Cancelled,
        }
    }
}

/// Access/refresh pair as sent by the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Body of a successful sign-in or refresh.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub tokens: TokenPair,
    #[serde(default)]
    pub profile: Option<Profile>,
}

impl TokenResponse {
    pub fn credential(&self) -> CredentialPair {
        CredentialPair::new(&self.tokens.access, &self.tokens.refresh)
    }
}

/// Trades a refresh credential for a new pair.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Exchange over `POST /auth/refresh-token`.
#[derive(Debug, Clone)]
pub struct HttpCredentialExchange {
    transport: HttpTransport,
}

impl HttpCredentialExchange {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse> {
        let request = ApiRequest::post(endpoints::REFRESH_TOKEN)
            .anonymous()
            .json(serde_json::json!({ "refreshToken": refresh_token }));

        match self.transport.send(&request, None).await? {
            Outcome::Success(body) => Ok(serde_json::from_value(body)?),
            Outcome::AuthRejected { message } => Err(ApiError::Unauthorized {
                message: message.unwrap_or_else(|| "Unauthorized".to_string()),
            }),
        }
    }
}

/// Receives every rotated credential.
pub trait CredentialListener: Send + Sync {
    fn on_credential_rotated(&self, credential: &CredentialPair);
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<u64, Weak<dyn CredentialListener>>,
}

impl ListenerRegistry {
    fn snapshot(&self) -> Vec<Arc<dyn CredentialListener>> {
        self.listeners
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }
}

/// Keeps a listener registered. Dropping it unregisters the listener.
#[must_use = "the listener is removed when the handle is dropped"]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.remove(&self.id);
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

type Resolution = std::result::Result<CredentialPair, RefreshFailure>;

struct CoordinatorState {
    waiters: Vec<oneshot::Sender<Resolution>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<CoordinatorState>,
    /// Only written while `state` is held.
    phase: watch::Sender<RefreshPhase>,
    exchange: Arc<dyn CredentialExchange>,
    store: Arc<dyn CredentialStore>,
    session: SessionState,
    notifier: Notifier,
    listeners: Arc<ListenerRegistry>,
    exchanges: AtomicU64,
    closed: AtomicBool,
}

/// Single-flight refresh of the session credential.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("phase", &self.phase())
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        exchange: Arc<dyn CredentialExchange>,
        store: Arc<dyn CredentialStore>,
        session: SessionState,
        notifier: Notifier,
    ) -> Self {
        let (phase, _) = watch::channel(RefreshPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoordinatorState {
                    waiters: Vec::new(),
                    task: None,
                }),
                phase,
                exchange,
                store,
                session,
                notifier,
                listeners: Arc::new(ListenerRegistry::default()),
                exchanges: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.inner.phase.borrow()
    }

    /// Number of exchanges started since construction.
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    /// Observe phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<RefreshPhase> {
        self.inner.phase.subscribe()
    }

    /// Register `listener` for rotated credentials.
    ///
    /// Only a weak reference is kept; the caller owns the listener.
    pub fn register_listener(&self, listener: &Arc<dyn CredentialListener>) -> ListenerHandle {
        let registry = &self.inner.listeners;
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        registry.listeners.insert(id, Arc::downgrade(listener));
        ListenerHandle {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.listeners.len()
    }

    /// Obtain a credential to replace `rejected`, the access token a request
    /// was sent with before it was rejected.
    pub async fn recover(&self, rejected: &str) -> Result<CredentialPair> {
        let rx = {
            let mut state = self.inner.state.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(ApiError::Cancelled);
            }

            let phase = *self.inner.phase.borrow();
            if phase != RefreshPhase::Refreshing {
                // Rotated after the request went out.
                if let Some(current) = self.inner.session.snapshot().credential {
                    if current.access_token != rejected {
                        debug!("Credential already rotated, reusing current pair");
                        return Ok(current);
                    }
                }
                if matches!(phase, RefreshPhase::Failed | RefreshPhase::Suspended) {
                    return Err(ApiError::SessionExpired);
                }
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            if phase == RefreshPhase::Idle {
                self.start_exchange(&mut state);
            } else {
                debug!(queued = state.waiters.len(), "Refresh in flight, queued");
            }
            rx
        };

        match rx.await {
            Ok(resolution) => resolution.map_err(ApiError::from),
            Err(_) => Err(ApiError::Cancelled),
        }
    }

    /// Wait until no exchange is in flight.
    pub async fn settle(&self) {
        let mut rx = self.inner.phase.subscribe();
        // Only errs when the sender is gone, which means the coordinator is.
        let _ = rx.wait_for(|phase| *phase != RefreshPhase::Refreshing).await;
    }

    /// Apply `update` to the session once no exchange is in flight, and stop
    /// starting new ones until [`reset`](Self::reset).
    ///
    /// The update and the phase change happen under the coordinator lock, so
    /// a rejection racing with it either joins the exchange that finished
    /// before it or gets `SessionExpired`.
    pub async fn suspend(&self, update: SessionUpdate) {
        loop {
            self.settle().await;
            let _state = self.inner.state.lock();
            if *self.inner.phase.borrow() == RefreshPhase::Refreshing {
                continue;
            }
            self.inner.session.update(update);
            self.inner.phase.send_replace(RefreshPhase::Suspended);
            debug!("Refresh coordinator suspended");
            return;
        }
    }

    /// Leave the `Failed` or `Suspended` phase once the session holds a
    /// credential worth refreshing.
    pub fn reset(&self) {
        let _state = self.inner.state.lock();
        let reset = self.inner.phase.send_if_modified(|phase| {
            if matches!(*phase, RefreshPhase::Failed | RefreshPhase::Suspended) {
                *phase = RefreshPhase::Idle;
                true
            } else {
                false
            }
        });
        if reset {
            info!("Refresh coordinator reset");
        }
    }

    /// Abort any exchange and release every waiter with `Cancelled`.
    pub fn shutdown(&self) {
        let (task, waiters) = {
            let mut state = self.inner.state.lock();
            self.inner.closed.store(true, Ordering::SeqCst);
            let waiters = std::mem::take(&mut state.waiters);
            let task = state.task.take();
            self.inner.phase.send_replace(RefreshPhase::Idle);
            (task, waiters)
        };

        if let Some(task) = task {
            task.abort();
        }
        let released = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshFailure::Cancelled));
        }
        debug!(released, "Refresh coordinator shut down");
    }

    fn start_exchange(&self, state: &mut CoordinatorState) {
        self.inner.phase.send_replace(RefreshPhase::Refreshing);
        let count = self.inner.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        info!(exchange = count, "Starting credential refresh");

        let inner = Arc::clone(&self.inner);
        let started_from = inner.session.access_token();
        state.task = Some(tokio::spawn(async move {
            run_exchange(inner, started_from).await;
        }));
    }
}

#[instrument(skip_all, name = "credential_refresh")]
async fn run_exchange(inner: Arc<Inner>, started_from: Option<String>) {
    let outcome = match refresh_token(&inner).await {
        Some(token) => inner.exchange.exchange(&token).await,
        None => Err(ApiError::Unauthorized {
            message: "No refresh credential available".to_string(),
        }),
    };

    match outcome {
        Ok(response) => complete(&inner, response, started_from.as_deref()).await,
        Err(error) => fail(&inner, error, started_from.as_deref()).await,
    }
}

/// Stored refresh token, falling back to the in-memory one.
async fn refresh_token(inner: &Inner) -> Option<String> {
    let in_memory = inner
        .session
        .snapshot()
        .refresh_token()
        .map(str::to_owned);

    match inner.store.get(StorageKey::RefreshToken).await {
        Ok(Some(token)) => Some(token),
        Ok(None) => in_memory,
        Err(error) => {
            warn!(error = %error, "Failed to read refresh credential, using in-memory copy");
            inner.notifier.danger(ApiError::from(error).user_message());
            in_memory
        }
    }
}

/// Whether the session still holds the access token the exchange started from.
fn still_current(inner: &Inner, started_from: Option<&str>) -> bool {
    inner.session.access_token().as_deref() == started_from
}

/// Settle an exchange whose session was replaced while it ran. Its outcome
/// belongs to a credential nobody holds any more.
fn discard(inner: &Inner, mut state: MutexGuard<'_, CoordinatorState>) {
    state.task = None;
    inner.phase.send_replace(RefreshPhase::Idle);
    let waiters = std::mem::take(&mut state.waiters);
    drop(state);

    warn!("Session changed during refresh, discarding the outcome");
    for waiter in waiters {
        let _ = waiter.send(Err(RefreshFailure::Cancelled));
    }
}

async fn complete(inner: &Inner, response: TokenResponse, started_from: Option<&str>) {
    let credential = response.credential();

    if still_current(inner, started_from) {
        if let Err(error) = inner.store.save_pair(&credential).await {
            warn!(error = %error, "Failed to persist refreshed credential");
            inner.notifier.danger(ApiError::from(error).user_message());
        }
    }

    let waiters = {
        let mut state = inner.state.lock();
        if !still_current(inner, started_from) {
            return discard(inner, state);
        }
        // Only the credential rotates; the profile is left as it is.
        inner.session.update_with(|session| SessionUpdate {
            profile: session.profile.clone(),
            credential: Some(credential.clone()),
            pending: session.pending,
        });
        state.task = None;
        inner.phase.send_replace(RefreshPhase::Idle);
        std::mem::take(&mut state.waiters)
    };

    info!(queued = waiters.len(), "Credential refreshed");

    for listener in inner.listeners.snapshot() {
        listener.on_credential_rotated(&credential);
    }
    for waiter in waiters {
        let _ = waiter.send(Ok(credential.clone()));
    }
}

async fn fail(inner: &Inner, error: ApiError, started_from: Option<&str>) {
    let rejected = rejects_credential(&error);
    warn!(error = %error, rejected, "Credential refresh failed");

    // The stored pair is only dropped when the server refused it; a transport
    // failure leaves it for the next start.
    if rejected && still_current(inner, started_from) {
        if let Err(error) = inner.store.clear().await {
            warn!(error = %error, "Failed to clear credential store");
        }
    }

    let waiters = {
        let mut state = inner.state.lock();
        if !still_current(inner, started_from) {
            return discard(inner, state);
        }
        inner.session.update(SessionUpdate::signed_out());
        state.task = None;
        inner.phase.send_replace(RefreshPhase::Failed);
        std::mem::take(&mut state.waiters)
    };

    inner.notifier.danger(ApiError::SessionExpired.to_string());
    for waiter in waiters {
        let _ = waiter.send(Err(RefreshFailure::Exhausted));
    }
}

fn rejects_credential(error: &ApiError) -> bool {
    match error {
        ApiError::Unauthorized { .. } => true,
        ApiError::Application { status, .. } => status.is_client_error(),
        _ => false,
    }
}
