//! Credentials supplied to the transport and their renewal.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::debug;

use tidewire_protocol::ErrorInfo;
use tidewire_protocol::constants::codes;

/// Credentials presented when opening a transport.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Long-lived API key.
    Key(String),
    /// Short-lived token issued by an auth service.
    Token(String),
}

impl Credentials {
    /// Query parameter name and value carrying these credentials.
    pub fn query_param(&self) -> (&'static str, &str) {
        match self {
            Credentials::Key(key) => ("key", key.as_str()),
            Credentials::Token(token) => ("access_token", token.as_str()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Key(_) => f.write_str("Key(<redacted>)"),
            Credentials::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// Errors from credential renewal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("credentials cannot be renewed")]
    NotRenewable,

    #[error("token request rejected: {0}")]
    Rejected(String),

    #[error("token request failed: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Error details reported on the connection when renewal fails.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(codes::INVALID_CREDENTIALS, 401, self.to_string())
    }
}

/// Source of credentials for the connection.
pub trait AuthProvider: Send + Sync + 'static {
    /// Credentials to present on the next connection attempt.
    fn current_credentials(&self) -> Credentials;

    /// Obtains fresh credentials after the service rejected the current ones.
    fn renew(&self) -> BoxFuture<'static, Result<Credentials, AuthError>>;
}

/// Fixed credentials that cannot be renewed.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    credentials: Credentials,
}

impl StaticAuth {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::Key(key.into()),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::Token(token.into()),
        }
    }
}

impl AuthProvider for StaticAuth {
    fn current_credentials(&self) -> Credentials {
        self.credentials.clone()
    }

    fn renew(&self) -> BoxFuture<'static, Result<Credentials, AuthError>> {
        futures_util::future::ready(Err(AuthError::NotRenewable)).boxed()
    }
}

type IssueFn = dyn Fn() -> BoxFuture<'static, Result<String, AuthError>> + Send + Sync;

/// Token credentials refreshed through an async callback.
///
/// The callback is invoked on every renewal; the token it returns replaces
/// the current one.
#[derive(Clone)]
pub struct TokenRenewer {
    current: Arc<RwLock<String>>,
    issue: Arc<IssueFn>,
}

impl TokenRenewer {
    pub fn new<F>(initial_token: impl Into<String>, issue: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<String, AuthError>> + Send + Sync + 'static,
    {
        Self {
            current: Arc::new(RwLock::new(initial_token.into())),
            issue: Arc::new(issue),
        }
    }
}

impl AuthProvider for TokenRenewer {
    fn current_credentials(&self) -> Credentials {
        let token = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Credentials::Token(token)
    }

    fn renew(&self) -> BoxFuture<'static, Result<Credentials, AuthError>> {
        let current = self.current.clone();
        let request = (self.issue)();
        async move {
            let token = request.await?;
            debug!("token renewed");
            *current.write().unwrap_or_else(PoisonError::into_inner) = token.clone();
            Ok(Credentials::Token(token))
        }
        .boxed()
    }
}

impl fmt::Debug for TokenRenewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRenewer").finish_non_exhaustive()
    }
}
