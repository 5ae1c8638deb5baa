//! In-memory identity provider for dev mode and tests.
//!
//! Holds accounts in a process-local map and pushes auth-state changes over
//! a watch channel, mirroring how the hosted provider notifies the client.

use crate::auth::{validate_password, AuthError, IdentityProvider, SessionUser};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: String,
    password: String,
    display_name: String,
    email_verified: bool,
    last_sign_in: Option<DateTime<Utc>>,
}

impl Account {
    fn session_user(&self) -> SessionUser {
        SessionUser {
            uid: self.uid.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
            display_name: self.display_name.clone(),
            last_sign_in: self.last_sign_in,
        }
    }
}

/// Clones share the same account map and auth-state channel.
#[derive(Clone)]
pub struct MemoryIdentityProvider {
    accounts: Arc<Mutex<HashMap<String, Account>>>,
    state_tx: Arc<watch::Sender<Option<SessionUser>>>,
    auto_verify: bool,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            state_tx: Arc::new(state_tx),
            auto_verify: false,
        }
    }

    /// Dev-mode variant: fresh signups come back already verified, since a
    /// single-process run has no inbox to click through.
    pub fn with_auto_verify() -> Self {
        Self {
            auto_verify: true,
            ..Self::new()
        }
    }

    /// Flip the verification flag, standing in for the user clicking the
    /// emailed link. Dev mode and tests only; does not push a state change
    /// (the client discovers it via `reload`, as with the real provider).
    pub fn mark_verified(&self, email: &str) {
        let mut accounts = self.accounts.lock().expect("accounts lock");
        if let Some(account) = accounts.get_mut(email) {
            account.email_verified = true;
        }
    }

    fn find_by_uid(accounts: &HashMap<String, Account>, uid: &str) -> Option<Account> {
        accounts.values().find(|a| a.uid == uid).cloned()
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn auth_state(&self) -> watch::Receiver<Option<SessionUser>> {
        self.state_tx.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SessionUser, AuthError> {
        validate_password(password)?;

        let mut accounts = self.accounts.lock().expect("accounts lock");
        if accounts.contains_key(email) {
            return Err(AuthError::EmailInUse);
        }

        let account = Account {
            uid: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.to_string(),
            email_verified: self.auto_verify,
            last_sign_in: Some(Utc::now()),
        };
        let user = account.session_user();
        accounts.insert(email.to_string(), account);

        // The provider signs the fresh account in
        let _ = self.state_tx.send(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AuthError> {
        let mut accounts = self.accounts.lock().expect("accounts lock");
        let account = accounts.get_mut(email).ok_or(AuthError::UserNotFound)?;
        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }

        account.last_sign_in = Some(Utc::now());
        let user = account.session_user();
        drop(accounts);

        let _ = self.state_tx.send(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let _ = self.state_tx.send(None);
        Ok(())
    }

    async fn send_verification_email(&self, user: &SessionUser) -> Result<(), AuthError> {
        let accounts = self.accounts.lock().expect("accounts lock");
        Self::find_by_uid(&accounts, &user.uid)
            .map(|_| ())
            .ok_or(AuthError::UserNotFound)
    }

    async fn reload(&self, user: &SessionUser) -> Result<SessionUser, AuthError> {
        let accounts = self.accounts.lock().expect("accounts lock");
        Self::find_by_uid(&accounts, &user.uid)
            .map(|a| a.session_user())
            .ok_or(AuthError::UserNotFound)
    }

    async fn reauthenticate(&self, user: &SessionUser, password: &str) -> Result<(), AuthError> {
        let accounts = self.accounts.lock().expect("accounts lock");
        let account =
            Self::find_by_uid(&accounts, &user.uid).ok_or(AuthError::UserNotFound)?;
        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let accounts = self.accounts.lock().expect("accounts lock");
        if accounts.contains_key(email) {
            Ok(())
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    async fn delete_account(&self, user: &SessionUser) -> Result<(), AuthError> {
        let mut accounts = self.accounts.lock().expect("accounts lock");
        accounts.retain(|_, a| a.uid != user.uid);
        drop(accounts);

        // Deleting the signed-in account ends the session
        let was_current = self
            .state_tx
            .borrow()
            .as_ref()
            .is_some_and(|u| u.uid == user.uid);
        if was_current {
            let _ = self.state_tx.send(None);
        }
        Ok(())
    }

    async fn lookup_by_email(&self, email: &str) -> Result<bool, AuthError> {
        let accounts = self.accounts.lock().expect("accounts lock");
        Ok(accounts.contains_key(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let identity = MemoryIdentityProvider::new();

        let user = identity
            .sign_up("user@example.com", "s3cret!pw", "Jane Doe")
            .await
            .unwrap();
        assert!(!user.email_verified);
        assert_eq!(user.display_name, "Jane Doe");

        let again = identity
            .sign_in("user@example.com", "s3cret!pw")
            .await
            .unwrap();
        assert_eq!(again.uid, user.uid);
    }

    #[tokio::test]
    async fn sign_in_wrong_password() {
        let identity = MemoryIdentityProvider::new();
        identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();

        assert!(matches!(
            identity.sign_in("user@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            identity.sign_in("other@example.com", "s3cret!pw").await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let identity = MemoryIdentityProvider::new();
        identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();

        assert!(matches!(
            identity.sign_up("user@example.com", "s3cret!pw", "Eve").await,
            Err(AuthError::EmailInUse)
        ));
    }

    #[tokio::test]
    async fn auth_state_fires_initial_then_changes() {
        let identity = MemoryIdentityProvider::new();
        let mut rx = identity.auth_state();

        // Initial state is available immediately
        assert!(rx.borrow_and_update().is_none());

        identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        identity.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn reload_picks_up_verification() {
        let identity = MemoryIdentityProvider::new();
        let user = identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();

        identity.mark_verified("user@example.com");
        let refreshed = identity.reload(&user).await.unwrap();
        assert!(refreshed.email_verified);
    }

    #[tokio::test]
    async fn delete_account_ends_session() {
        let identity = MemoryIdentityProvider::new();
        let user = identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();

        identity.delete_account(&user).await.unwrap();
        assert!(identity.auth_state().borrow().is_none());
        assert!(!identity.lookup_by_email("user@example.com").await.unwrap());
    }
}
