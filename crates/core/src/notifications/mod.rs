//! Live admin notifications over WebSocket.
//!
//! - [`connector`]: the socket seam and its tokio-tungstenite implementation
//! - [`client`]: the supervisor task (connect, read, reconnect with a bound)
//! - [`store`]: the persisted notification list and its change feed

pub mod client;
pub mod connector;
pub mod store;

pub use client::{ConnectionState, NotificationClient, ReconnectPolicy};
pub use connector::{ConnectError, Connector, FrameStream, InboundFrame, WsConnector};
pub use store::NotificationStore;
