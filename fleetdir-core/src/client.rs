//! Blocking HTTP client for the directory service.
//!
//! This module provides:
//! - [`DirectoryApi`] - The operations the authentication controller drives
//! - [`DirectoryClient`] - The HTTPS/JSON implementation
//! - [`ApiError`] - Typed classification of every failed call
//!
//! # Response Classification
//!
//! | Response | Error |
//! |---|---|
//! | 401 | [`ApiError::Authentication`] (recoverable) |
//! | other 4xx | [`ApiError::Client`] |
//! | 5xx and other non-2xx | [`ApiError::Server`] |
//! | connection or I/O failure | [`ApiError::Transport`] |
//! | malformed success body | [`ApiError::Decode`] |
//!
//! Nothing in this module retries. Deciding whether to re-authenticate is the
//! caller's job.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::model::{Device, DeviceQuery, Identity, InvalidIdentity, TokenTtl};
use crate::store::Secret;

const AUTHENTICATE_PATH: &[&str] = &["authenticate_user"];
const TOKEN_PATH: &[&str] = &["token"];
const DEVICE_QUERY_PATH: &[&str] = &["api", "v1", "devices", "query"];

/// Scheme prepended to scoped tokens so they can be sent verbatim.
pub const SCOPED_TOKEN_SCHEME: &str = "JWT";

/// Error type for directory service calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An empty password was supplied; no request was made.
    #[error("empty password")]
    InvalidInput,

    /// A token is required for this call but none is held.
    #[error("no token available")]
    NoCredential,

    /// The server rejected the credential (HTTP 401), or no token was held
    /// for an authenticated call. Re-authenticating may succeed.
    #[error("API authentication failed: {message}")]
    Authentication { message: String },

    /// Permanent client error (4xx other than 401).
    #[error("HTTP request failed ({status}): {body}")]
    Client { status: StatusCode, body: String },

    /// Server-side or otherwise unexpected status.
    #[error("server error ({status}): {body}")]
    Server { status: StatusCode, body: String },

    /// Connection, TLS, timeout, or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A successful response carried a body that could not be decoded.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured server URL is unusable.
    #[error("invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The identity is incomplete.
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] InvalidIdentity),
}

impl ApiError {
    /// True when the caller should re-authenticate and may retry once.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// True when the failure means the supplied password was not accepted.
    pub fn is_rejected_password(&self) -> bool {
        matches!(self, Self::InvalidInput | Self::Authentication { .. })
    }
}

/// Timeouts and pooling for the underlying HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,

    /// Bound on a whole request, including reading the response.
    ///
    /// The blocking client has no response-header timeout; this also bounds
    /// the wait for headers.
    pub request_timeout: Duration,

    pub tcp_keepalive: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            tcp_keepalive: Duration::from_secs(30),
            pool_max_idle_per_host: 5,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Operations against the directory service.
///
/// The session (user, token, authenticated flag) lives in the implementor.
pub trait DirectoryApi {
    /// The account this session authenticates as.
    fn user_name(&self) -> &str;

    fn has_token(&self) -> bool;

    /// Install a token obtained elsewhere, such as the on-disk cache.
    fn set_token(&mut self, token: Secret);

    /// True once a call has proven the held token valid.
    fn is_authenticated(&self) -> bool;

    /// Exchange a password for a token.
    ///
    /// Does not persist anything.
    fn authenticate(&mut self, password: &Secret) -> Result<(), ApiError>;

    /// Exchange the held token for a read-only device token with the given TTL.
    fn request_scoped_token(&self, ttl: TokenTtl) -> Result<Secret, ApiError>;

    /// Resolve group and device names into devices with salt ids.
    fn resolve_devices(&mut self, query: &DeviceQuery) -> Result<Vec<Device>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,

    #[serde(default)]
    messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,

    #[serde(rename = "statusCode", default)]
    status_code: u16,

    #[serde(default)]
    messages: Vec<String>,
}

/// HTTPS/JSON client for the directory service.
pub struct DirectoryClient {
    http: Client,
    server_url: Url,
    user_name: String,
    token: Option<Secret>,
    authenticated: bool,
}

impl DirectoryClient {
    /// Create a client for `identity`.
    ///
    /// Fails if the identity is incomplete or its server URL does not parse.
    pub fn new(identity: &Identity, settings: &HttpSettings) -> Result<Self, ApiError> {
        identity.validate()?;

        let server_url = Url::parse(&identity.server_url).map_err(|e| ApiError::InvalidUrl {
            url: identity.server_url.clone(),
            reason: e.to_string(),
        })?;
        if server_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: identity.server_url.clone(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .tcp_keepalive(settings.tcp_keepalive)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .build()?;

        Ok(Self {
            http,
            server_url,
            user_name: identity.user_name.clone(),
            token: None,
            authenticated: false,
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// The currently held token, if any.
    pub fn token(&self) -> Option<&Secret> {
        self.token.as_ref()
    }

    /// Join path segments onto the server URL, keeping any base path.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.server_url.clone();
        // cannot_be_a_base URLs are rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn held_token(&self) -> Option<&Secret> {
        self.token.as_ref().filter(|token| !token.is_empty())
    }

    fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send()?;
        check_response(response)
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("server_url", &self.server_url.as_str())
            .field("user_name", &self.user_name)
            .field("has_token", &self.has_token())
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl DirectoryApi for DirectoryClient {
    fn user_name(&self) -> &str {
        &self.user_name
    }

    fn has_token(&self) -> bool {
        self.held_token().is_some()
    }

    fn set_token(&mut self, token: Secret) {
        self.token = Some(token);
        self.authenticated = false;
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn authenticate(&mut self, password: &Secret) -> Result<(), ApiError> {
        if password.is_empty() {
            return Err(ApiError::InvalidInput);
        }

        let url = self.endpoint(AUTHENTICATE_PATH);
        debug!("Authenticating {} against {}", self.user_name, url);

        let body = json!({
            "username": self.user_name,
            "password": password.expose(),
        });
        let response = self.execute(self.http.post(url).json(&body))?;
        let decoded: TokenResponse = decode(response)?;
        debug!("Authentication response messages: {:?}", decoded.messages);

        self.token = Some(Secret::new(decoded.token));
        self.authenticated = true;
        info!("Authenticated as {}", self.user_name);
        Ok(())
    }

    fn request_scoped_token(&self, ttl: TokenTtl) -> Result<Secret, ApiError> {
        let token = self.held_token().ok_or(ApiError::NoCredential)?;

        let url = self.endpoint(TOKEN_PATH);
        debug!("Requesting {} read-only device token from {}", ttl, url);

        let body = json!({
            "ttl": ttl,
            "access": { "devices": "r" },
        });
        let request = self
            .http
            .post(url)
            .header(AUTHORIZATION, token.expose())
            .json(&body);
        let decoded: TokenResponse = decode(self.execute(request)?)?;
        debug!("Token response messages: {:?}", decoded.messages);

        Ok(Secret::new(format!("{} {}", SCOPED_TOKEN_SCHEME, decoded.token)))
    }

    fn resolve_devices(&mut self, query: &DeviceQuery) -> Result<Vec<Device>, ApiError> {
        let token = self.held_token().ok_or_else(|| ApiError::Authentication {
            message: "no token supplied".to_string(),
        })?;

        let mut params: Vec<(&str, String)> = Vec::new();
        if !query.groups().is_empty() {
            params.push(("groups", serde_json::to_string(query.groups())?));
        }
        if !query.devices().is_empty() {
            params.push(("devices", serde_json::to_string(query.devices())?));
        }

        let url = self.endpoint(DEVICE_QUERY_PATH);
        debug!("Querying {} with {:?}", url, params);

        let request = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.expose())
            .query(&params);

        let response = match self.execute(request) {
            Ok(response) => response,
            Err(e) => {
                if e.is_recoverable() {
                    self.authenticated = false;
                }
                return Err(e);
            }
        };

        let decoded: DevicesResponse = decode(response)?;
        debug!(
            "Resolved {} devices (status {}, messages {:?})",
            decoded.devices.len(),
            decoded.status_code,
            decoded.messages
        );

        self.authenticated = true;
        Ok(decoded.devices)
    }
}

/// Pass through 2xx responses and classify everything else.
fn check_response(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(classify_failure(status, String::new()));
    }

    let body = response.text()?;
    Err(classify_failure(status, body))
}

fn classify_failure(status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::UNAUTHORIZED {
        ApiError::Authentication {
            message: format!("server returned {}", status.as_u16()),
        }
    } else if status.is_client_error() {
        ApiError::Client { status, body }
    } else {
        ApiError::Server { status, body }
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text()?;
    Ok(serde_json::from_str(&body)?)
}
