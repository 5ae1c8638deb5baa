//! Identity boundary: session identity and the hosted auth provider.
//!
//! The provider is consumed, not implemented, by this system. The trait
//! mirrors the hosted service's surface; implementations are the HTTP
//! client in [`remote`] and the in-memory provider in [`memory`] used for
//! dev mode and tests.

pub mod memory;
pub mod remote;
pub mod verification;

pub use memory::MemoryIdentityProvider;
pub use remote::HttpIdentityProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by the identity boundary.
///
/// All of these are recoverable and shown inline as form-level messages.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("No account found with this email address")]
    UserNotFound,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("An account with this email already exists")]
    EmailInUse,

    #[error("{0}")]
    WeakPassword(String),

    #[error("Auth backend error: {0}")]
    Backend(String),
}

/// The authenticated identity supplied by the provider.
///
/// Read-only to this system; held only in memory for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
    pub display_name: String,
    pub last_sign_in: Option<DateTime<Utc>>,
}

/// The hosted identity provider surface.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current-session state channel. Fires once with the initial state on
    /// subscribe, then on every login/logout.
    fn auth_state(&self) -> watch::Receiver<Option<SessionUser>>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SessionUser, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn send_verification_email(&self, user: &SessionUser) -> Result<(), AuthError>;

    /// Re-fetch the user record (picks up a changed verification flag).
    async fn reload(&self, user: &SessionUser) -> Result<SessionUser, AuthError>;

    /// Re-prove the account credential for an already signed-in user.
    async fn reauthenticate(&self, user: &SessionUser, password: &str) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Remove the account entirely (cleanup of abandoned unverified signups).
    async fn delete_account(&self, user: &SessionUser) -> Result<(), AuthError>;

    /// Whether an account exists for this email.
    async fn lookup_by_email(&self, email: &str) -> Result<bool, AuthError>;
}

/// Sign-up password policy. Violations block the call locally, before the
/// backend is contacted.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters long.".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one number.".to_string(),
        ));
    }
    if !password.chars().any(|c| r#"!@#$%^&*(),.?":{}|<>"#.contains(c)) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one special character.".to_string(),
        ));
    }
    if password.chars().any(char::is_whitespace) {
        return Err(AuthError::WeakPassword(
            "Password must not contain spaces.".to_string(),
        ));
    }
    Ok(())
}

/// Request a password-reset email, short-circuiting for unregistered
/// addresses so no reset is sent for them.
pub async fn request_password_reset<I>(identity: &I, email: &str) -> Result<(), AuthError>
where
    I: IdentityProvider + ?Sized,
{
    if !identity.lookup_by_email(email).await? {
        return Err(AuthError::UserNotFound);
    }
    identity.send_password_reset(email).await
}
