// crates/types/src/lib.rs
//! Shared wire and domain types for the civic portal session core.
//!
//! Everything here is plain data: the backend's JSON contracts (login,
//! refresh, setup, notification frames), the response envelope, and the
//! locally materialized records the core hands to its consumers.

pub mod auth;
pub mod envelope;
pub mod notification;

pub use auth::{
    CompleteSetupRequest, CompleteSetupResponse, Credential, LoginRequest, LoginResponse,
    RefreshResponse, Role,
};
pub use envelope::Envelope;
pub use notification::{NotificationFrame, NotificationRecord, NEW_COMPLAINT};
