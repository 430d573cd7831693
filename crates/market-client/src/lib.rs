//! Authenticated HTTP and realtime client for the marketplace backend.
//!
//! The core is a single-flight credential refresh: requests rejected with an
//! expired access credential are suspended, one exchange rotates the
//! credential pair, and every suspended request is replayed once with the new
//! pair. The rotated credential is persisted, published to the session and
//! pushed to the realtime connection.

pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod http_client;
pub mod notify;
pub mod realtime;
pub mod refresh;
pub mod session;

pub use client::MarketClient;
pub use config::{ClientConfig, ProxyConfig};
pub use credentials::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use dispatcher::{ApiRequest, FormPart};
pub use error::{ApiError, RealtimeError, Result, StorageError};
pub use notify::{Notice, NoticeKind, Notifier};
pub use realtime::{ConnectionState, RealtimeBridge, RealtimeEvent, RealtimeStatus};
pub use refresh::{RefreshCoordinator, RefreshPhase};
pub use session::{Profile, Session, SessionState, SessionUpdate};
