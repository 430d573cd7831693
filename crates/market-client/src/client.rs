//! Caller-facing client.
//!
//! [`MarketClient`] owns one instance of every component: credential store,
//! session state, notifier, refresh coordinator, dispatcher, realtime bridge
//! and conversation store. Everything is constructed explicitly here and torn
//! down by [`MarketClient::shutdown`] (or, best effort, on drop).

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::conversation::ConversationStore;
use crate::credentials::CredentialStore;
use crate::dispatcher::{ApiRequest, HttpTransport, RequestDispatcher};
use crate::error::{ApiError, Result};
use crate::http_client::build_http_client;
use crate::notify::{Notice, Notifier};
use crate::realtime::RealtimeBridge;
use crate::refresh::{
    CredentialExchange, CredentialListener, HttpCredentialExchange, ListenerHandle,
    RefreshCoordinator,
};
use crate::session::{Session, SessionState};

/// Authenticated client for the marketplace backend.
pub struct MarketClient {
    pub(crate) config: ClientConfig,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) session: SessionState,
    pub(crate) notifier: Notifier,
    pub(crate) coordinator: RefreshCoordinator,
    pub(crate) dispatcher: RequestDispatcher,
    pub(crate) realtime: Arc<RealtimeBridge>,
    pub(crate) conversations: Arc<ConversationStore>,
    cancel: CancellationToken,
    feed: Mutex<Option<JoinHandle<()>>>,
    _rotation: ListenerHandle,
}

impl std::fmt::Debug for MarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketClient")
            .field("base_url", &self.config.base_url)
            .field("logged_in", &self.session.logged_in())
            .field("refresh", &self.coordinator.phase())
            .finish()
    }
}

impl MarketClient {
    /// Build a client that refreshes credentials over HTTP.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(build_http_client(&config)?, config.base_url.clone());
        let exchange = Arc::new(HttpCredentialExchange::new(transport.clone()));
        Self::assemble(config, store, transport, exchange)
    }

    /// Build a client with a custom credential exchange.
    pub fn with_exchange(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(build_http_client(&config)?, config.base_url.clone());
        Self::assemble(config, store, transport, exchange)
    }

    fn assemble(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: HttpTransport,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Result<Self> {
        let session = SessionState::new();
        let notifier = Notifier::new();
        let coordinator =
            RefreshCoordinator::new(exchange, store.clone(), session.clone(), notifier.clone());
        let dispatcher = RequestDispatcher::new(
            transport,
            session.clone(),
            coordinator.clone(),
            notifier.clone(),
        );

        let cancel = CancellationToken::new();
        let realtime = RealtimeBridge::new(
            config.realtime_url()?,
            coordinator.clone(),
            cancel.child_token(),
        );
        let listener: Arc<dyn CredentialListener> = realtime.clone();
        let rotation = coordinator.register_listener(&listener);

        debug!(base_url = %config.base_url, "Market client created");

        Ok(Self {
            config,
            store,
            session,
            notifier,
            coordinator,
            dispatcher,
            realtime,
            conversations: Arc::new(ConversationStore::new()),
            cancel,
            feed: Mutex::new(None),
            _rotation: rotation,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_snapshot(&self) -> Session {
        self.session.snapshot()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// User-visible notices published from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn realtime(&self) -> &Arc<RealtimeBridge> {
        &self.realtime
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// Send a request with the session credential.
    pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T> {
        self.dispatcher.request(req).await
    }

    /// Like [`request`](Self::request), for callers that only need the value.
    ///
    /// `None` means the failure was already published as a notice.
    pub async fn call<T: DeserializeOwned>(&self, req: ApiRequest) -> Option<T> {
        self.dispatcher.request(req).await.ok()
    }

    /// Open the realtime connection with the current access credential and
    /// start feeding chat messages into the conversation store.
    pub fn connect_realtime(&self) -> Result<()> {
        let token = self.session.access_token().ok_or_else(|| ApiError::Unauthorized {
            message: "Not signed in".to_string(),
        })?;

        {
            let mut feed = self.feed.lock();
            if feed.as_ref().is_none_or(JoinHandle::is_finished) {
                let store = Arc::clone(&self.conversations);
                *feed = Some(tokio::spawn(
                    store.follow(self.realtime.subscribe(), self.cancel.child_token()),
                ));
            }
        }

        self.realtime.connect(&token);
        Ok(())
    }

    pub async fn disconnect_realtime(&self) {
        self.realtime.disconnect().await;
    }

    /// Stop every background task and release every waiting request.
    pub async fn shutdown(&self) {
        info!("Shutting down market client");
        self.cancel.cancel();
        self.coordinator.shutdown();
        self.realtime.shutdown().await;

        let feed = self.feed.lock().take();
        if let Some(feed) = feed {
            let _ = feed.await;
        }
    }
}

impl Drop for MarketClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.coordinator.shutdown();
    }
}
