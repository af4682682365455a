// crates/types/src/notification.rs
//! Server-pushed notification frames and their local records.

use serde::{Deserialize, Serialize};

/// Type tag the backend uses for newly filed complaints.
pub const NEW_COMPLAINT: &str = "NewComplaint";

/// A decoded inbound WebSocket frame. Carries no stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub tracking_number: String,
    pub complaint_type: String,
    /// Kept exactly as the server sent it.
    pub submitted_at: String,
}

/// A notification as held (and persisted) on this side of the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tracking_number: String,
    pub complaint_type: String,
    pub submitted_at: String,
    pub read: bool,
}

impl NotificationRecord {
    /// Materialize a frame with a freshly generated local id, unread.
    pub fn from_frame(frame: NotificationFrame) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: frame.kind,
            tracking_number: frame.tracking_number,
            complaint_type: frame.complaint_type,
            submitted_at: frame.submitted_at,
            read: false,
        }
    }
}

impl NotificationFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
