// crates/core/src/lib.rs
//! Session and live-notification core for the civic portal.
//!
//! Two components share one credential:
//! - [`SessionManager`] keeps the access token fresh, refreshing at most once
//!   per burst of 401s and replaying whatever queued up meanwhile.
//! - [`NotificationClient`] holds the WebSocket to the backend and turns
//!   inbound frames into persisted [`NotificationRecord`]s.
//!
//! Both are plain structs built by the caller (see the `civic-portal` binary)
//! over injected storage and transport.

pub mod config;
pub mod error;
pub mod notifications;
pub mod paths;
pub mod session;
pub mod storage;
pub mod transport;

pub use civic_portal_types::*;
pub use config::{ConfigError, PortalConfig};
pub use error::{ApiError, NetworkErrorKind, StorageError, TransportError};
pub use notifications::{
    ConnectError, ConnectionState, Connector, InboundFrame, NotificationClient,
    NotificationStore, ReconnectPolicy, WsConnector,
};
pub use session::{Attempt, SessionManager};
pub use storage::{CredentialStore, FileStore, KeyValueStore, MemoryStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, RefreshCookieJar, Transport};
