//! In-process marketplace backend for integration tests.
//!
//! Tokens are `access-{n}` / `refresh-{n}` where `n` is the current
//! generation. Signing in or refreshing bumps the generation, so every older
//! pair becomes invalid, like a rotating refresh-token backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use market_client::{ClientConfig, CredentialStore, MarketClient, MemoryCredentialStore};

pub const PASSWORD: &str = "secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
}

pub struct BackendState {
    generation: AtomicU64,
    expired: AtomicBool,
    refresh_ok: AtomicBool,
    refresh_delay_ms: AtomicU64,
    refreshes: AtomicUsize,
    hits: Mutex<Vec<Hit>>,
    sign_out_bodies: Mutex<Vec<Value>>,
    upload_parts: Mutex<Vec<Vec<String>>>,
    socket_tokens: Mutex<Vec<String>>,
    socket_push: broadcast::Sender<String>,
    socket_received: Mutex<Vec<String>>,
    /// Connect-error message for the next socket, whatever its token.
    refuse_socket: Mutex<Option<String>>,
}

impl BackendState {
    fn new() -> Self {
        let (socket_push, _) = broadcast::channel(32);
        Self {
            generation: AtomicU64::new(1),
            expired: AtomicBool::new(false),
            refresh_ok: AtomicBool::new(true),
            refresh_delay_ms: AtomicU64::new(0),
            refreshes: AtomicUsize::new(0),
            hits: Mutex::new(Vec::new()),
            sign_out_bodies: Mutex::new(Vec::new()),
            upload_parts: Mutex::new(Vec::new()),
            socket_tokens: Mutex::new(Vec::new()),
            socket_push,
            socket_received: Mutex::new(Vec::new()),
            refuse_socket: Mutex::new(None),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn rotate(&self) -> u64 {
        self.expired.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn access_valid(&self, token: &str) -> bool {
        token == format!("access-{}", self.generation()) && !self.expired.load(Ordering::SeqCst)
    }

    fn record(&self, method: &str, path: &str, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        self.hits.lock().push(Hit {
            method: method.to_string(),
            path: path.to_string(),
            bearer: bearer.clone(),
        });
        bearer
    }

    fn authorize(&self, method: &str, path: &str, headers: &HeaderMap) -> Result<(), Response> {
        match self.record(method, path, headers) {
            Some(token) if self.access_valid(&token) => Ok(()),
            Some(_) => Err(error(StatusCode::UNAUTHORIZED, "jwt expired")),
            None => Err(error(StatusCode::UNAUTHORIZED, "Unauthorized request!")),
        }
    }
}

pub struct Backend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl Backend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::new());
        let app = Router::new()
            .route("/auth/sign-in", post(sign_in))
            .route("/auth/sign-up", post(sign_up))
            .route("/auth/sign-out", post(sign_out))
            .route("/auth/refresh-token", post(refresh_token))
            .route("/auth/profile", get(profile))
            .route("/product/latest", get(latest))
            .route("/product/listings", get(listings))
            .route("/product/detail/{id}", get(detail))
            .route("/product/list", post(create_listing))
            .route("/product/{id}", delete(delete_product).patch(create_listing))
            .route("/broken", get(broken))
            .route("/auth/locked", get(locked))
            .route("/auth/update-profile", patch(update_profile))
            .route("/socket-message/", get(socket))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test backend");
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.base_url());
        config.request_timeout_secs = 5;
        config
    }

    /// Client with an in-memory store.
    pub fn client(&self) -> (MarketClient, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let client = MarketClient::new(self.config(), store.clone()).expect("client");
        (client, store)
    }

    pub fn client_with_store(&self, store: Arc<dyn CredentialStore>) -> MarketClient {
        MarketClient::new(self.config(), store).expect("client")
    }

    /// Invalidate the current access token; the refresh token stays valid.
    pub fn expire_access(&self) {
        self.state.expired.store(true, Ordering::SeqCst);
    }

    pub fn reject_refresh(&self) {
        self.state.refresh_ok.store(false, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state
            .refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn current_access(&self) -> String {
        format!("access-{}", self.state.generation())
    }

    pub fn current_refresh(&self) -> String {
        format!("refresh-{}", self.state.generation())
    }

    pub fn hits(&self, path: &str) -> Vec<Hit> {
        self.state
            .hits
            .lock()
            .iter()
            .filter(|h| h.path == path)
            .cloned()
            .collect()
    }

    pub fn sign_out_bodies(&self) -> Vec<Value> {
        self.state.sign_out_bodies.lock().clone()
    }

    pub fn upload_parts(&self) -> Vec<Vec<String>> {
        self.state.upload_parts.lock().clone()
    }

    pub fn socket_tokens(&self) -> Vec<String> {
        self.state.socket_tokens.lock().clone()
    }

    pub fn socket_received(&self) -> Vec<String> {
        self.state.socket_received.lock().clone()
    }

    /// Send a raw frame to every connected socket.
    pub fn refuse_socket(&self, message: impl Into<String>) {
        *self.state.refuse_socket.lock() = Some(message.into());
    }

    pub fn push_frame(&self, frame: impl Into<String>) {
        let _ = self.state.socket_push.send(frame.into());
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn profile_json() -> Value {
    json!({
        "id": "u1",
        "name": "Jane",
        "email": "jane@example.com",
        "verified": true
    })
}

fn tokens_json(generation: u64) -> Value {
    json!({
        "access": format!("access-{generation}"),
        "refresh": format!("refresh-{generation}"),
    })
}

async fn sign_in(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", "/auth/sign-in", &headers);
    if body["password"] != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "Email/Password mismatch!");
    }
    let generation = state.rotate();
    Json(json!({ "profile": profile_json(), "tokens": tokens_json(generation) })).into_response()
}

async fn sign_up(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.record("POST", "/auth/sign-up", &headers);
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Please check your inbox." })),
    )
        .into_response()
}

async fn sign_out(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = state.authorize("POST", "/auth/sign-out", &headers) {
        return response;
    }
    state.sign_out_bodies.lock().push(body.clone());
    if body["refreshToken"] != format!("refresh-{}", state.generation()) {
        return error(StatusCode::BAD_REQUEST, "Invalid refresh token");
    }
    StatusCode::OK.into_response()
}

async fn refresh_token(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", "/auth/refresh-token", &headers);
    state.refreshes.fetch_add(1, Ordering::SeqCst);

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let valid = body["refreshToken"] == format!("refresh-{}", state.generation());
    if !valid || !state.refresh_ok.load(Ordering::SeqCst) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized request!");
    }
    let generation = state.rotate();
    Json(json!({ "profile": profile_json(), "tokens": tokens_json(generation) })).into_response()
}

async fn profile(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if let Err(response) = state.authorize("GET", "/auth/profile", &headers) {
        return response;
    }
    Json(json!({ "profile": profile_json() })).into_response()
}

async fn update_profile(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = state.authorize("PATCH", "/auth/update-profile", &headers) {
        return response;
    }
    let mut profile = profile_json();
    profile["name"] = body["name"].clone();
    Json(json!({ "profile": profile })).into_response()
}

async fn latest(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if let Err(response) = state.authorize("GET", "/product/latest", &headers) {
        return response;
    }
    Json(json!({
        "products": [
            { "id": "p1", "name": "Desk", "category": "Home", "price": 120, "thumbnail": "https://img/p1.jpg" },
            { "id": "p2", "name": "Phone", "category": "Electronics", "price": 300 }
        ]
    }))
    .into_response()
}

fn product_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": "Desk",
        "description": "Solid oak",
        "category": "Home",
        "price": 120,
        "image": ["https://img/p1.jpg"],
        "date": "2024-03-01T00:00:00.000Z",
        "seller": { "id": "u1", "name": "Jane" }
    })
}

async fn listings(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if let Err(response) = state.authorize("GET", "/product/listings", &headers) {
        return response;
    }
    Json(json!({ "products": [product_json("p1")] })).into_response()
}

async fn detail(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize("GET", "/product/detail", &headers) {
        return response;
    }
    if id != "p1" {
        return error(StatusCode::NOT_FOUND, "Product not found!");
    }
    Json(json!({ "product": product_json(&id) })).into_response()
}

async fn create_listing(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(response) = state.authorize("POST", "/product/list", &headers) {
        return response;
    }
    let mut names = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        names.push(field.name().unwrap_or_default().to_string());
    }
    state.upload_parts.lock().push(names);
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Added new product." })),
    )
        .into_response()
}

async fn delete_product(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if let Err(response) = state.authorize("DELETE", "/product", &headers) {
        return response;
    }
    Json(json!({ "message": "Product removed successfully." })).into_response()
}

async fn broken(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.record("GET", "/broken", &headers);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
}

async fn locked(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.record("GET", "/auth/locked", &headers);
    error(StatusCode::UNAUTHORIZED, "Account locked")
}

async fn socket(State(state): State<Arc<BackendState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut sender, mut receiver) = socket.split();
    let open = r#"0{"sid":"engine-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if sender.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    // Socket.IO connect with auth.
    let token = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let text = text.as_str();
                if let Some(auth) = text.strip_prefix("40") {
                    let auth: Value = serde_json::from_str(auth).unwrap_or(Value::Null);
                    break auth["token"].as_str().unwrap_or_default().to_string();
                }
            }
            Some(Ok(_)) => {}
            _ => return,
        }
    };

    state.socket_tokens.lock().push(token.clone());
    let refusal = state.refuse_socket.lock().take();
    if let Some(message) = refusal {
        let frame = format!("44{}", json!({ "message": message }));
        let _ = sender.send(Message::Text(frame.into())).await;
        let _ = sender.close().await;
        return;
    }
    if !state.access_valid(&token) {
        let _ = sender
            .send(Message::Text(r#"44{"message":"jwt expired"}"#.into()))
            .await;
        let _ = sender.close().await;
        return;
    }
    let mut push = state.socket_push.subscribe();
    if sender
        .send(Message::Text(r#"40{"sid":"socket-1"}"#.into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = push.recv() => {
                let Ok(frame) = frame else { break };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.socket_received.lock().push(text.as_str().to_string());
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Sign `client` in with the test credentials.
pub async fn signed_in(backend: &Backend) -> (MarketClient, Arc<MemoryCredentialStore>) {
    let (client, store) = backend.client();
    client
        .sign_in("jane@example.com", PASSWORD)
        .await
        .expect("sign in");
    (client, store)
}
