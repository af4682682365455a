// crates/core/src/error.rs
use std::collections::BTreeMap;
use std::error::Error as _;
use std::path::PathBuf;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Why a request produced no HTTP response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The overall request timeout elapsed.
    Timeout,
    /// Nothing is listening on the target address.
    ConnectionRefused,
    /// The server accepted the connection and closed it without a response.
    EmptyResponse,
    /// DNS, TLS or another connect-phase failure.
    Connect,
    Other,
}

impl NetworkErrorKind {
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }

        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => return Self::ConnectionRefused,
                    std::io::ErrorKind::TimedOut => return Self::Timeout,
                    std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
                        return Self::EmptyResponse
                    }
                    _ => {}
                }
            }
            // hyper surfaces an empty reply only through its message text
            if cause.to_string().contains("connection closed before message completed") {
                return Self::EmptyResponse;
            }
            source = cause.source();
        }

        if err.is_connect() {
            Self::Connect
        } else {
            Self::Other
        }
    }

    /// Human-readable hint pointing at the usual misconfiguration.
    pub fn diagnostic(self, base_url: &str) -> String {
        match self {
            Self::Timeout => "Request timeout. The server took too long to respond.".to_string(),
            Self::ConnectionRefused => {
                format!("Connection refused. Make sure the backend server is running on {base_url}")
            }
            Self::EmptyResponse => "Server closed connection without response. \
                 This often indicates a CORS preflight (OPTIONS) request failed. \
                 Check backend CORS configuration."
                .to_string(),
            Self::Connect => format!(
                "Could not connect to {base_url}. Check the API URL, DNS and TLS configuration."
            ),
            Self::Other => "Network error - no response received".to_string(),
        }
    }
}

/// Error surfaced to callers of the Session Manager.
///
/// `Clone` so that one refresh failure can be handed to every queued request.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        errors: Option<BTreeMap<String, Vec<String>>>,
    },

    #[error("{message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        detail: String,
    },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Token refresh was abandoned before it settled")]
    RefreshAbandoned,
}

/// Fields the backend may put in an error body.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Classify a non-success response.
    pub fn from_response(method: &Method, status: StatusCode, body: &[u8]) -> Self {
        log_status(status);

        let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let mut message = parsed
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));

        if status == StatusCode::METHOD_NOT_ALLOWED {
            message = if *method == Method::OPTIONS {
                "CORS preflight failed: Backend must allow OPTIONS requests and return proper \
                 CORS headers (Access-Control-Allow-Origin, Access-Control-Allow-Methods, \
                 Access-Control-Allow-Credentials)."
                    .to_string()
            } else {
                format!("Method {method} not allowed on this endpoint.")
            };
        }

        ApiError::Status {
            status: status.as_u16(),
            message,
            errors: parsed.errors,
        }
    }

    /// Classify a request that got no response.
    pub fn from_transport(err: &reqwest::Error, base_url: &str) -> Self {
        let kind = NetworkErrorKind::classify(err);
        tracing::error!(
            kind = ?kind,
            url = ?err.url().map(|u| u.as_str()),
            error = %err,
            "No response received"
        );
        ApiError::Network {
            kind,
            message: kind.diagnostic(base_url),
            detail: err.to_string(),
        }
    }
}

fn log_status(status: StatusCode) {
    match status.as_u16() {
        401 => tracing::debug!("Unauthorized"),
        403 => tracing::warn!("Access forbidden"),
        404 => tracing::warn!("Resource not found"),
        405 => tracing::error!(
            "Method not allowed - CORS configuration issue. Ensure backend allows OPTIONS requests."
        ),
        s if s >= 500 => tracing::error!(status = s, "Server error"),
        _ => {}
    }
}

/// Errors building the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid API base URL {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors from the durable key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_from_body() {
        let err = ApiError::from_response(
            &Method::GET,
            StatusCode::BAD_REQUEST,
            br#"{"message":"Tracking number is required","errors":{"trackingNumber":["required"]}}"#,
        );
        assert_eq!(err.to_string(), "Tracking number is required");
        assert_eq!(err.status(), Some(400));
        match err {
            ApiError::Status { errors: Some(errors), .. } => {
                assert_eq!(errors["trackingNumber"], vec!["required".to_string()]);
            }
            other => panic!("expected field errors, got {other:?}"),
        }
    }

    #[test]
    fn test_status_message_fallback_for_non_json_body() {
        let err = ApiError::from_response(&Method::GET, StatusCode::BAD_GATEWAY, b"<html>");
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_method_not_allowed_messages() {
        let preflight = ApiError::from_response(&Method::OPTIONS, StatusCode::METHOD_NOT_ALLOWED, b"");
        assert!(preflight.to_string().starts_with("CORS preflight failed"));

        let delete = ApiError::from_response(&Method::DELETE, StatusCode::METHOD_NOT_ALLOWED, b"");
        assert_eq!(delete.to_string(), "Method DELETE not allowed on this endpoint.");
    }

    #[test]
    fn test_is_unauthorized() {
        let err = ApiError::from_response(&Method::GET, StatusCode::UNAUTHORIZED, b"{}");
        assert!(err.is_unauthorized());
        assert!(!ApiError::RefreshAbandoned.is_unauthorized());
    }

    #[test]
    fn test_diagnostics_mention_base_url() {
        let msg = NetworkErrorKind::ConnectionRefused.diagnostic("http://localhost:5001/api");
        assert!(msg.contains("http://localhost:5001/api"));
        assert!(NetworkErrorKind::Timeout.diagnostic("x").contains("timeout"));
    }
}
