//! Admin sign-in.
//!
//! An [`Authenticator`] checks credentials: [`LocalAuthenticator`] against
//! argon2 hashes from `[[auth.admins]]`, [`RestAuthenticator`] against the
//! hosted auth service. [`AuthService`] turns a successful check into a
//! session in the shared [`SessionContext`] and ends it again on sign-out.

use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use scriptorium_core::session::{Session, SessionContext};

use crate::config::{AdminAccount, AuthProvider, Config, RestConfig};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("auth provider failed: {0}")]
    Provider(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Checks admin credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verifies the credentials. Returns the provider's own access token when
    /// the provider issues one.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<String>, AuthError>;

    /// Invalidates a provider token on sign-out.
    async fn revoke(&self, _provider_token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Hashes a password into an argon2id PHC string for `[[auth.admins]]`.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, phc: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(phc).map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Admin accounts listed in the config file.
pub struct LocalAuthenticator {
    admins: Vec<AdminAccount>,
    /// Verified against when no account matches, so unknown emails cost the
    /// same argon2 work as wrong passwords.
    dummy_hash: Option<String>,
}

impl LocalAuthenticator {
    pub fn new(admins: Vec<AdminAccount>) -> Self {
        let dummy_hash = match hash_password("scriptorium-no-such-admin") {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "could not prepare dummy password hash");
                None
            }
        };
        Self { admins, dummy_hash }
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<String>, AuthError> {
        let email = email.trim();
        let Some(account) = self.admins.iter().find(|a| a.email.eq_ignore_ascii_case(email)) else {
            if let Some(dummy) = &self.dummy_hash {
                verify_password(password, dummy)?;
            }
            return Err(AuthError::InvalidCredentials);
        };
        if verify_password(password, &account.password_hash)? {
            Ok(None)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Password grant against the hosted auth service (`/auth/v1`).
pub struct RestAuthenticator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestAuthenticator {
    pub fn new(config: &RestConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<String>, AuthError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email.trim(), "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!("HTTP {status}")));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Ok(Some(body.access_token))
    }

    async fn revoke(&self, provider_token: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(provider_token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::Provider(format!("HTTP {}", response.status())))
        }
    }
}

/// Sign-in and sign-out over one authenticator and one session context.
#[derive(Clone)]
pub struct AuthService {
    authenticator: Arc<dyn Authenticator>,
    sessions: SessionContext,
}

impl AuthService {
    pub fn new(authenticator: Arc<dyn Authenticator>, sessions: SessionContext) -> Self {
        Self {
            authenticator,
            sessions,
        }
    }

    /// Builds the provider named by `[auth] provider`.
    pub fn from_config(config: &Config, sessions: SessionContext) -> anyhow::Result<Self> {
        let authenticator: Arc<dyn Authenticator> = match config.auth.provider {
            AuthProvider::Local => {
                if config.auth.admins.is_empty() {
                    warn!("no [[auth.admins]] configured; admin sign-in will always fail");
                }
                Arc::new(LocalAuthenticator::new(config.auth.admins.clone()))
            }
            AuthProvider::Rest => Arc::new(RestAuthenticator::new(config.rest()?)?),
        };
        Ok(Self::new(authenticator, sessions))
    }

    pub fn sessions(&self) -> &SessionContext {
        &self.sessions
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let provider_token = self.authenticator.authenticate(email, password).await?;
        let session = self.sessions.establish(email.trim(), provider_token);
        debug!(email = %session.email, "credentials accepted");
        Ok(session)
    }

    /// Ends the session locally, then revokes the provider token. A failed
    /// revocation is logged; the local session is gone either way.
    pub async fn sign_out(&self, token: &str) -> Option<Session> {
        let session = self.sessions.end(token)?;
        if let Some(provider_token) = &session.provider_token {
            if let Err(e) = self.authenticator.revoke(provider_token).await {
                warn!(error = %e, "could not revoke provider token");
            }
        }
        Some(session)
    }
}
