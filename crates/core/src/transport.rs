// crates/core/src/transport.rs
//! HTTP transport: request/response shapes, the [`Transport`] seam the
//! Session Manager drives, and the reqwest-backed implementation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::cookie::CookieStore;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PortalConfig;
use crate::error::{ApiError, TransportError};
use crate::storage::CredentialStore;
use civic_portal_types::Envelope;

/// An outbound API call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json<B: Serialize>(self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(self.with_body(value))
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`.
    /// Without a token (or with one that is not a valid header value) the
    /// request goes out unauthenticated.
    pub fn with_bearer(&self, token: Option<&str>) -> Self {
        let mut request = self.clone();
        request.headers.remove(AUTHORIZATION);
        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "access token is not a valid header value"),
            }
        }
        request
    }

    /// The bearer token currently attached, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A response that arrived, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decode the body, unwrapping the `{ data }` envelope when present.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice::<Envelope<T>>(&self.body)
            .map(Envelope::into_inner)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One round trip to the backend.
///
/// `execute` returns `Ok` for every response that arrived, including 4xx/5xx;
/// `Err` means no response at all. The refresh token never leaves the
/// transport: callers may only ask whether one is held, or drop it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;

    fn has_refresh_token(&self) -> bool;

    fn clear_refresh_token(&self);
}

/// Cookie provider that only tracks the refresh-token cookie, persisting it
/// through the credential store so a restart does not force a new login.
///
/// The cookie goes back only to the API origin, under the `Path` the server
/// set. Until a `Set-Cookie` is seen (a token restored from storage) the
/// scope is the API base path.
pub struct RefreshCookieJar {
    cookie_name: String,
    origin: Url,
    path: Mutex<String>,
    credentials: CredentialStore,
}

impl RefreshCookieJar {
    pub fn new(cookie_name: impl Into<String>, api_base: &Url, credentials: CredentialStore) -> Self {
        let base_path = api_base.path().trim_end_matches('/');
        Self {
            cookie_name: cookie_name.into(),
            origin: api_base.clone(),
            path: Mutex::new(if base_path.is_empty() { "/".to_string() } else { base_path.to_string() }),
            credentials,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.refresh_token()
    }

    pub fn clear(&self) {
        if let Err(e) = self.credentials.clear_refresh_token() {
            warn!(error = %e, "failed to drop refresh token");
        }
    }

    /// Whether a request to `url` carries the refresh cookie.
    pub fn sends_to(&self, url: &Url) -> bool {
        self.same_origin(url)
            && path_matches(url.path(), &self.path.lock().expect("cookie path lock poisoned"))
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.origin.scheme()
            && url.host_str() == self.origin.host_str()
            && url.port_or_known_default() == self.origin.port_or_known_default()
    }

    /// Apply one `Set-Cookie` header value received from `url`. Returns true
    /// when it named the refresh cookie.
    fn apply(&self, raw: &str, url: &Url) -> bool {
        if !self.same_origin(url) {
            return false;
        }
        let mut parts = raw.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|kv| kv.split_once('=')) else {
            return false;
        };
        if name.trim() != self.cookie_name {
            return false;
        }

        let mut expired = false;
        let mut path = None;
        for attr in parts {
            let (key, val) = attr
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .unwrap_or((attr, ""));
            if key.eq_ignore_ascii_case("max-age") {
                expired = val == "0" || val.starts_with('-');
            } else if key.eq_ignore_ascii_case("path") && val.starts_with('/') {
                path = Some(val.to_string());
            }
        }

        let value = value.trim().trim_matches('"');
        if value.is_empty() || expired {
            debug!("server cleared refresh cookie");
            self.clear();
            return true;
        }
        if let Err(e) = self.credentials.set_refresh_token(value) {
            warn!(error = %e, "failed to persist refresh token");
        }
        *self.path.lock().expect("cookie path lock poisoned") =
            path.unwrap_or_else(|| default_cookie_path(url));
        true
    }
}

/// Cookie default-path: the request path up to, not including, its last `/`.
fn default_cookie_path(url: &Url) -> String {
    match url.path().rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => url.path()[..i].to_string(),
    }
}

fn path_matches(request: &str, cookie: &str) -> bool {
    request == cookie
        || (request.starts_with(cookie)
            && (cookie.ends_with('/') || request[cookie.len()..].starts_with('/')))
}

impl CookieStore for RefreshCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.apply(raw, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        if !self.sends_to(url) {
            return None;
        }
        let token = self.token()?;
        HeaderValue::from_str(&format!("{}={}", self.cookie_name, token)).ok()
    }
}

/// reqwest-backed transport with the fixed per-call timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    jar: Arc<RefreshCookieJar>,
}

impl HttpTransport {
    pub fn new(config: &PortalConfig, credentials: CredentialStore) -> Result<Self, TransportError> {
        let base = Url::parse(&config.api_base_url).map_err(|e| TransportError::InvalidBaseUrl {
            url: config.api_base_url.clone(),
            message: e.to_string(),
        })?;
        let jar = Arc::new(RefreshCookieJar::new(
            config.refresh_cookie_name.clone(),
            &base,
            credentials,
        ));
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .cookie_provider(jar.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            jar,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        debug!(method = %request.method, path = %request.path, "API request");

        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e, &self.base_url))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_transport(&e, &self.base_url))?;

        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "API response");
        Ok(ApiResponse::new(status, body.to_vec()))
    }

    fn has_refresh_token(&self) -> bool {
        self.jar.token().is_some()
    }

    fn clear_refresh_token(&self) {
        self.jar.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    fn url(raw: &str) -> Url {
        raw.parse().unwrap()
    }

    fn jar() -> RefreshCookieJar {
        RefreshCookieJar::new(
            "refreshToken",
            &url("http://localhost:5001/api"),
            CredentialStore::new(Arc::new(MemoryStore::new())),
        )
    }

    #[test]
    fn test_with_bearer_replaces_header() {
        let req = ApiRequest::get("/complaints").with_bearer(Some("A1"));
        assert_eq!(req.bearer_token(), Some("A1"));
        let req = req.with_bearer(Some("A2"));
        assert_eq!(req.bearer_token(), Some("A2"));
        assert_eq!(req.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(req.with_bearer(None).bearer_token(), None);
    }

    #[test]
    fn test_json_unwraps_envelope() {
        let wrapped = ApiResponse::new(StatusCode::OK, r#"{"data":{"n":1},"message":"ok"}"#);
        let bare = ApiResponse::new(StatusCode::OK, r#"{"n":1}"#);
        let a: serde_json::Value = wrapped.json().unwrap();
        let b: serde_json::Value = bare.json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_jar_tracks_only_refresh_cookie() {
        let jar = jar();
        let login = url("http://localhost:5001/api/auth/login");
        assert!(!jar.apply("session=abc; Path=/", &login));
        assert!(jar.token().is_none());

        assert!(jar.apply("refreshToken=R1; HttpOnly; Secure; Path=/api/auth", &login));
        assert_eq!(jar.token().as_deref(), Some("R1"));

        let refresh = url("http://localhost:5001/api/auth/refresh-token");
        assert_eq!(jar.cookies(&refresh).unwrap().to_str().unwrap(), "refreshToken=R1");
    }

    #[test]
    fn test_jar_scopes_cookie_to_origin_and_path() {
        let jar = jar();
        jar.apply(
            "refreshToken=R1; HttpOnly; Path=/api/auth",
            &url("http://localhost:5001/api/auth/login"),
        );

        assert!(jar.cookies(&url("http://localhost:5001/api/auth/refresh-token")).is_some());
        assert!(jar.cookies(&url("http://localhost:5001/api/complaints")).is_none());
        assert!(jar.cookies(&url("http://localhost:5001/api/authority")).is_none());
        assert!(jar.cookies(&url("http://localhost:5002/api/auth/refresh-token")).is_none());
        assert!(jar.cookies(&url("https://localhost:5001/api/auth/refresh-token")).is_none());
        assert!(jar.cookies(&url("http://evil.example/api/auth/refresh-token")).is_none());
    }

    #[test]
    fn test_jar_ignores_cookie_from_foreign_origin() {
        let jar = jar();
        assert!(!jar.apply("refreshToken=EVIL; Path=/", &url("http://evil.example/")));
        assert!(jar.token().is_none());
    }

    #[test]
    fn test_restored_token_is_scoped_to_api_base_path() {
        let jar = jar();
        jar.credentials.set_refresh_token("R0").unwrap();
        assert!(jar.cookies(&url("http://localhost:5001/api/auth/refresh-token")).is_some());
        assert!(jar.cookies(&url("http://localhost:5001/other")).is_none());
    }

    #[test]
    fn test_missing_path_attribute_uses_request_directory() {
        let jar = jar();
        jar.apply("refreshToken=R1; HttpOnly", &url("http://localhost:5001/api/auth/login"));
        assert!(jar.cookies(&url("http://localhost:5001/api/auth/refresh-token")).is_some());
        assert!(jar.cookies(&url("http://localhost:5001/api/complaints")).is_none());
    }

    #[test]
    fn test_jar_honours_expiry_cookie() {
        let jar = jar();
        let login = url("http://localhost:5001/api/auth/login");
        jar.apply("refreshToken=R1; HttpOnly", &login);
        jar.apply("refreshToken=; Max-Age=0; Path=/", &login);
        assert!(jar.token().is_none());
        assert!(jar.cookies(&url("http://localhost:5001/api/auth/login")).is_none());
    }

    #[test]
    fn test_unparseable_base_url_is_rejected() {
        let config = PortalConfig {
            api_base_url: "not a url".into(),
            ..PortalConfig::default()
        };
        let err = HttpTransport::new(&config, CredentialStore::new(Arc::new(MemoryStore::new())))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_url_joins_without_doubling_slashes() {
        let config = PortalConfig {
            api_base_url: "https://portal.example.gov/api/".into(),
            ..PortalConfig::default()
        };
        let transport =
            HttpTransport::new(&config, CredentialStore::new(Arc::new(MemoryStore::new()))).unwrap();
        assert_eq!(transport.url("/auth/login"), "https://portal.example.gov/api/auth/login");
    }
}
