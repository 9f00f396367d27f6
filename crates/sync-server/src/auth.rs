//! Pluggable authentication (spec §6): "HTTP-basic and cookie validation
//! are plug-in callbacks" — the actual credential store is out of scope,
//! this crate only defines the seam and two concrete adapters plus the
//! loopback-only no-op used by local-mode servers.

use async_trait::async_trait;
use sync_core::{Result, SyncError};

/// Credentials as lifted off the connecting transport, before a provider
/// decides whether they're valid.
#[derive(Clone, Debug)]
pub enum Credentials {
    /// `Authorization: Basic base64(user:pass)`.
    HttpBasic { username: String, password: String },
    /// The `mauth` cookie value (spec §6), opaque to this crate.
    MauthCookie(String),
    /// No credentials presented (loopback-only local mode).
    None,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolves `credentials` to an authenticated username, or an
    /// `AuthFailed` error (spec §7: "reject … handshake, client sees
    /// connect failure, no reconnect loop").
    async fn authenticate(&self, credentials: Credentials) -> Result<String>;
}

/// Accepts anything: the loopback-only local mode (spec §6).
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn authenticate(&self, _credentials: Credentials) -> Result<String> {
        Ok("local".to_string())
    }
}

/// Validates `HttpBasic` credentials against a caller-supplied callback;
/// rejects any other credential kind.
pub struct HttpBasicAuth<F> {
    verify: F,
}

impl<F> HttpBasicAuth<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    pub fn new(verify: F) -> Self {
        Self { verify }
    }
}

#[async_trait]
impl<F> AuthProvider for HttpBasicAuth<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    async fn authenticate(&self, credentials: Credentials) -> Result<String> {
        match credentials {
            Credentials::HttpBasic { username, password } => {
                if (self.verify)(&username, &password) {
                    Ok(username)
                } else {
                    Err(SyncError::auth_failed("bad username or password"))
                }
            }
            _ => Err(SyncError::auth_failed("expected HTTP basic credentials")),
        }
    }
}

/// Validates the `mauth` cookie against a caller-supplied async-free
/// callback that returns the resolved username on success.
pub struct MauthCookieAuth<F> {
    verify: F,
}

impl<F> MauthCookieAuth<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(verify: F) -> Self {
        Self { verify }
    }
}

#[async_trait]
impl<F> AuthProvider for MauthCookieAuth<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn authenticate(&self, credentials: Credentials) -> Result<String> {
        match credentials {
            Credentials::MauthCookie(cookie) => {
                (self.verify)(&cookie).ok_or_else(|| SyncError::auth_failed("invalid mauth cookie"))
            }
            _ => Err(SyncError::auth_failed("expected mauth cookie")),
        }
    }
}

/// Decodes an `Authorization: Basic <b64>` header value into
/// [`Credentials::HttpBasic`].
pub fn parse_basic_header(header_value: &str) -> Result<Credentials> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or_else(|| SyncError::auth_failed("not a Basic authorization header"))?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        .map_err(|e| SyncError::auth_failed(format!("malformed base64: {e}")))?;
    let text = String::from_utf8(decoded).map_err(|e| SyncError::auth_failed(format!("malformed utf8: {e}")))?;
    let (username, password) =
        text.split_once(':').ok_or_else(|| SyncError::auth_failed("missing ':' in basic credentials"))?;
    Ok(Credentials::HttpBasic { username: username.to_string(), password: password.to_string() })
}
