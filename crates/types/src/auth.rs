// crates/types/src/auth.rs
//! Authentication contracts and the in-memory session credential.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A role name as issued by the backend.
///
/// The portal only branches on `Admin` and `Employee`; anything else is kept
/// verbatim so it survives a persist/restore cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Employee,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "Admin",
            Role::Employee => "Employee",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Admin" => Role::Admin,
            "Employee" => Role::Employee,
            _ => Role::Other(name),
        }
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Role::from(name.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active authenticated session.
///
/// The refresh token is deliberately absent: it lives in the transport's
/// cookie jar and application code only ever asks whether one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub roles: Vec<Role>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when the credential carries at least one of `required`.
    /// An empty requirement list admits every authenticated session.
    pub fn has_any_role(&self, required: &[Role]) -> bool {
        required.is_empty() || required.iter().any(|r| self.roles.contains(r))
    }

    /// Replace the token and expiry after a refresh, keeping the roles.
    pub fn renewed(&self, refresh: RefreshResponse) -> Self {
        Self {
            access_token: refresh.access_token,
            expires_at: refresh.expires_at,
            roles: self.roles.clone(),
        }
    }
}

/// POST /auth/login
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    pub access_token_expires_at: DateTime<Utc>,
    /// Normally delivered as an HTTP-only cookie; some deployments echo it
    /// in the body as well.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl LoginResponse {
    pub fn credential(&self) -> Credential {
        Credential {
            access_token: self.access_token.clone(),
            expires_at: self.access_token_expires_at,
            roles: self.roles.clone(),
        }
    }
}

/// POST /auth/refresh-token
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /admin/complete-setup (first-time employee login)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSetupRequest {
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteSetupResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}
