//! HTTP client for the hosted identity service.

use crate::auth::{AuthError, IdentityProvider, SessionUser};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;

/// HTTP client for the hosted auth service.
///
/// Auth-state changes originate from this client's own sign-in/sign-out
/// calls and are pushed to subscribers over a watch channel. Clones share
/// the session channel.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    state_tx: std::sync::Arc<watch::Sender<Option<SessionUser>>>,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        let (state_tx, _) = watch::channel(None);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            state_tx: std::sync::Arc::new(state_tx),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };

        Err(match status.as_u16() {
            401 => AuthError::InvalidCredentials,
            403 => AuthError::EmailNotVerified,
            404 => AuthError::UserNotFound,
            409 => AuthError::EmailInUse,
            _ => AuthError::Backend(format!("{}: {}", status, message)),
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AuthError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Self::check(resp).await
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn auth_state(&self) -> watch::Receiver<Option<SessionUser>> {
        self.state_tx.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SessionUser, AuthError> {
        crate::auth::validate_password(password)?;

        let body = serde_json::json!({
            "email": email,
            "password": password,
            "display_name": display_name,
        });
        let user: SessionUser = self
            .post_json("/v1/auth/signup", &body)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("invalid signup response: {}", e)))?;

        let _ = self.state_tx.send(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let user: SessionUser = self
            .post_json("/v1/auth/signin", &body)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("invalid signin response: {}", e)))?;

        let _ = self.state_tx.send(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.post_json("/v1/auth/signout", &serde_json::json!({}))
            .await?;
        let _ = self.state_tx.send(None);
        Ok(())
    }

    async fn send_verification_email(&self, user: &SessionUser) -> Result<(), AuthError> {
        let body = serde_json::json!({ "uid": user.uid });
        self.post_json("/v1/auth/verification-email", &body).await?;
        Ok(())
    }

    async fn reload(&self, user: &SessionUser) -> Result<SessionUser, AuthError> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/auth/users/{}", user.uid)))
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("invalid user response: {}", e)))
    }

    async fn reauthenticate(&self, user: &SessionUser, password: &str) -> Result<(), AuthError> {
        let body = serde_json::json!({ "uid": user.uid, "password": password });
        self.post_json("/v1/auth/reauthenticate", &body).await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let body = serde_json::json!({ "email": email });
        self.post_json("/v1/auth/password-reset", &body).await?;
        Ok(())
    }

    async fn delete_account(&self, user: &SessionUser) -> Result<(), AuthError> {
        let resp = self
            .client
            .delete(self.url(&format!("/v1/auth/users/{}", user.uid)))
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Self::check(resp).await?;

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
        let resp = self
            .client
            .get(self.url("/v1/auth/lookup"))
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        let body: ExistsResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::Backend(format!("invalid lookup response: {}", e)))?;
        Ok(body.exists)
    }
}
