//! Credential collaborator
//!
//! The client asks its [`CredentialProvider`] for credentials right before
//! signing each request and drops them afterwards. `Ok(None)` means the
//! request goes out unsigned (anonymous access).

use crate::s3::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Access key pair plus an optional STS session token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of credentials, consulted once per request
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` selects anonymous mode for this request
    async fn fetch(&self) -> Result<Option<Credentials>>;
}

/// Fixed key pair
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn fetch(&self) -> Result<Option<Credentials>> {
        Ok(Some(self.credentials.clone()))
    }
}

/// Unsigned requests, for public buckets
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousProvider;

#[async_trait]
impl CredentialProvider for AnonymousProvider {
    async fn fetch(&self) -> Result<Option<Credentials>> {
        Ok(None)
    }
}
