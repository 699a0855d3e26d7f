//! Identity verification.
//!
//! A connection proves who it is once, in its `ClientHello`. The resulting
//! [`IdentityHandle`] is bound to the connection for its whole life.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};
use crate::persistence::{Persistence, UserRecord};

/// Verified (user id, display name) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityHandle {
    pub user_id: u64,
    pub username: String,
}

impl IdentityHandle {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// Credentials presented by a client.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn validate(&self) -> SessionResult<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(SessionError::InvalidRequest("Username and password are required."));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Check credentials against a stored account.
    async fn verify(&self, credentials: &Credentials) -> SessionResult<IdentityHandle>;

    /// Create an account and return its identity.
    async fn register(&self, credentials: &Credentials) -> SessionResult<IdentityHandle>;
}

/// Username/password accounts stored in [`Persistence`], hashed with bcrypt.
pub struct PasswordVerifier {
    store: Arc<Persistence>,
    cost: u32,
}

impl PasswordVerifier {
    pub fn new(store: Arc<Persistence>) -> Self {
        Self::with_cost(store, bcrypt::DEFAULT_COST)
    }

    /// Use a specific bcrypt cost. Tests use the minimum (4) to stay fast.
    pub fn with_cost(store: Arc<Persistence>, cost: u32) -> Self {
        Self { store, cost }
    }
}

#[async_trait]
impl IdentityVerifier for PasswordVerifier {
    async fn verify(&self, credentials: &Credentials) -> SessionResult<IdentityHandle> {
        credentials.validate()?;
        let username = credentials.username.trim();

        let Some((user_id, user)) = self.store.find_user(username)? else {
            debug!(username, "login for unknown user");
            return Err(SessionError::Unauthenticated);
        };

        // bcrypt is CPU bound; keep it off the async workers.
        let password = credentials.password.clone();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| SessionError::Storage(format!("verify task failed: {e}")))?
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        if !matches {
            debug!(username, "login with wrong password");
            return Err(SessionError::Unauthenticated);
        }
        Ok(IdentityHandle::new(user_id, user.username))
    }

    async fn register(&self, credentials: &Credentials) -> SessionResult<IdentityHandle> {
        credentials.validate()?;
        let username = credentials.username.trim().to_string();

        if self.store.find_user(&username)?.is_some() {
            return Err(SessionError::UsernameTaken(username));
        }

        let password = credentials.password.clone();
        let cost = self.cost;
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| SessionError::Storage(format!("hash task failed: {e}")))?
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        let user_id = self.store.insert_user(&UserRecord {
            username: username.clone(),
            password_hash,
        })?;
        info!(user_id, username = %username, "registered new user");
        Ok(IdentityHandle::new(user_id, username))
    }
}
