//! Session lifecycle: auth-state driven locker feed.
//!
//! On sign-in the identity boundary yields a user id, the PIN record is
//! read once, and a live locker subscription opens under that id. Incoming
//! snapshots are decrypted field-by-field for display; mutations are
//! encrypted before they cross the persistence boundary. On sign-out the
//! subscription is cancelled.

use crate::auth::{IdentityProvider, SessionUser};
use crate::crypto::Cipher;
use crate::store::{
    Locker, LockerPatch, LockerStore, LockerSubscription, NewLocker, PersistenceError, PinStore,
    SubscriptionEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Events emitted over a session's lifetime.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Signed in, but no PIN record exists: setup is mandatory before any
    /// other sensitive action.
    PinSetupRequired { user: SessionUser },
    /// Signed in with a PIN record in place.
    Ready { user: SessionUser },
    /// A fresh snapshot, passwords decrypted for display. Replaces prior
    /// state wholesale.
    Lockers(Vec<Locker>),
    /// A failure on the subscription stream; the feed continues.
    SubscriptionError(PersistenceError),
    /// Signed out (also fired at startup when no session exists).
    SignedOut,
}

/// Decrypt a snapshot for display.
///
/// A record whose password fails to decrypt keeps its raw ciphertext
/// (visibly degraded) while siblings render normally.
pub fn decrypt_for_display(cipher: &Cipher, mut lockers: Vec<Locker>) -> Vec<Locker> {
    for locker in &mut lockers {
        match cipher.decrypt(&locker.password) {
            Ok(plaintext) => locker.password = plaintext,
            Err(e) => {
                warn!(locker = %locker.id, "password left encrypted: {}", e);
            }
        }
    }
    lockers
}

/// Encrypt-before-write wrapper over a [`LockerStore`].
///
/// Callers hand over plaintext; nothing leaves this type unencrypted.
pub struct LockerService<S> {
    store: S,
    cipher: Arc<Cipher>,
}

impl<S: LockerStore> LockerService<S> {
    pub fn new(store: S, cipher: Arc<Cipher>) -> Self {
        Self { store, cipher }
    }

    pub async fn create(
        &self,
        uid: &str,
        name: &str,
        username: &str,
        password: &str,
    ) -> crate::Result<String> {
        let encrypted = self.cipher.encrypt(password)?;
        let id = self
            .store
            .create(
                uid,
                NewLocker {
                    name: name.to_string(),
                    username: username.to_string(),
                    password: encrypted,
                },
            )
            .await?;
        Ok(id)
    }

    /// Partial update; the password field, if present, is encrypted here.
    pub async fn update(&self, uid: &str, id: &str, mut patch: LockerPatch) -> crate::Result<()> {
        if let Some(password) = patch.password.take() {
            patch.password = Some(self.cipher.encrypt(&password)?);
        }
        self.store.update(uid, id, patch).await?;
        Ok(())
    }

    pub async fn delete(&self, uid: &str, id: &str) -> crate::Result<()> {
        self.store.delete(uid, id).await?;
        Ok(())
    }
}

/// Drives one session: subscribes to auth state and manages the locker
/// feed for whoever is signed in.
pub struct SessionController<I, S> {
    identity: I,
    store: S,
    cipher: Arc<Cipher>,
}

/// Handle to a running session loop. Dropping it tears the loop down.
pub struct SessionHandle {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn shutdown(&mut self) {
        self.task.abort();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<I, S> SessionController<I, S>
where
    I: IdentityProvider + 'static,
    S: LockerStore + PinStore + 'static,
{
    pub fn new(identity: I, store: S, cipher: Arc<Cipher>) -> Self {
        Self {
            identity,
            store,
            cipher,
        }
    }

    /// Spawn the session loop; events arrive on the returned handle.
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(tx));
        SessionHandle { events: rx, task }
    }

    async fn run(self, tx: mpsc::UnboundedSender<SessionEvent>) {
        let mut auth_rx = self.identity.auth_state();

        loop {
            let user = auth_rx.borrow_and_update().clone();

            match user {
                Some(user) if user.email_verified => {
                    if self.run_signed_in(&tx, &mut auth_rx, user).await.is_err() {
                        return;
                    }
                }
                _ => {
                    // No session (or unverified): nothing to subscribe to
                    if tx.send(SessionEvent::SignedOut).is_err() {
                        return;
                    }
                    if auth_rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Handle one signed-in period. Returns `Err(())` when the loop should
    /// exit entirely (consumer gone or auth channel closed mid-session).
    async fn run_signed_in(
        &self,
        tx: &mpsc::UnboundedSender<SessionEvent>,
        auth_rx: &mut tokio::sync::watch::Receiver<Option<SessionUser>>,
        user: SessionUser,
    ) -> Result<(), ()> {
        info!(uid = %user.uid, "session started");

        // The PIN record is read once per sign-in
        let event = match self.store.load_pin(&user.uid).await {
            Ok(Some(_)) => SessionEvent::Ready { user: user.clone() },
            Ok(None) => SessionEvent::PinSetupRequired { user: user.clone() },
            Err(e) => {
                warn!("failed to load PIN record: {}", e);
                SessionEvent::SubscriptionError(e)
            }
        };
        tx.send(event).map_err(|_| ())?;

        let mut feed = match LockerStore::subscribe(&self.store, &user.uid).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                tx.send(SessionEvent::SubscriptionError(e)).map_err(|_| ())?;
                None
            }
        };

        let exit = loop {
            tokio::select! {
                changed = auth_rx.changed() => {
                    // Re-evaluate the session on any auth transition;
                    // a closed channel ends the loop for good
                    break changed.is_err();
                }
                event = next_feed_event(&mut feed) => match event {
                    Some(SubscriptionEvent::Snapshot(snapshot)) => {
                        let view = decrypt_for_display(&self.cipher, snapshot);
                        if tx.send(SessionEvent::Lockers(view)).is_err() {
                            break true;
                        }
                    }
                    Some(SubscriptionEvent::Error(e)) => {
                        if tx.send(SessionEvent::SubscriptionError(e)).is_err() {
                            break true;
                        }
                    }
                    None => {
                        // Feed ended; keep the session until auth changes
                        feed = None;
                    }
                },
            }
        };

        // Teardown: the subscription must not outlive the session
        if let Some(mut feed) = feed.take() {
            feed.cancel();
        }
        info!(uid = %user.uid, "session ended");

        if exit {
            Err(())
        } else {
            Ok(())
        }
    }
}

/// Pending forever when no feed is open, so `select!` ignores this arm.
async fn next_feed_event(feed: &mut Option<LockerSubscription>) -> Option<SubscriptionEvent> {
    match feed {
        Some(feed) => feed.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryIdentityProvider;
    use crate::pin::PinService;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn cipher() -> Arc<Cipher> {
        Arc::new(Cipher::new("test_key").unwrap())
    }

    async fn verified_user(identity: &MemoryIdentityProvider) -> SessionUser {
        identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();
        identity.mark_verified("user@example.com");
        identity
            .sign_in("user@example.com", "s3cret!pw")
            .await
            .unwrap()
    }

    async fn next_or_timeout(handle: &mut SessionHandle) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), handle.next_event())
            .await
            .expect("timed out waiting for session event")
            .expect("session loop ended unexpectedly")
    }

    #[test]
    fn decrypt_for_display_degrades_per_record() {
        let cipher = cipher();
        let good = cipher.encrypt("hunter2").unwrap();
        let lockers = vec![
            Locker {
                id: "1".into(),
                name: "Good".into(),
                username: "a".into(),
                password: good,
            },
            Locker {
                id: "2".into(),
                name: "Bad".into(),
                username: "b".into(),
                password: "unreadable-ciphertext".into(),
            },
        ];

        let view = decrypt_for_display(&cipher, lockers);
        assert_eq!(view[0].password, "hunter2");
        // The undecryptable record keeps its ciphertext; nothing is dropped
        assert_eq!(view[1].password, "unreadable-ciphertext");
        assert_eq!(view.len(), 2);
    }

    #[tokio::test]
    async fn service_encrypts_before_write() {
        let store = MemoryStore::new();
        let cipher = cipher();
        let service = LockerService::new(store.clone(), cipher.clone());

        let id = service
            .create("uid-1", "Bank", "jane", "hunter2")
            .await
            .unwrap();

        let mut sub = LockerStore::subscribe(&store, "uid-1").await.unwrap();
        let Some(SubscriptionEvent::Snapshot(snap)) = sub.next_event().await else {
            panic!("expected snapshot");
        };
        assert_eq!(snap[0].id, id);
        assert_ne!(snap[0].password, "hunter2");
        assert_eq!(cipher.decrypt(&snap[0].password).unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn service_encrypts_patched_password() {
        let store = MemoryStore::new();
        let cipher = cipher();
        let service = LockerService::new(store.clone(), cipher.clone());

        let id = service
            .create("uid-1", "Bank", "jane", "hunter2")
            .await
            .unwrap();
        service
            .update(
                "uid-1",
                &id,
                LockerPatch {
                    password: Some("changed".to_string()),
                    ..LockerPatch::default()
                },
            )
            .await
            .unwrap();

        let mut sub = LockerStore::subscribe(&store, "uid-1").await.unwrap();
        let Some(SubscriptionEvent::Snapshot(snap)) = sub.next_event().await else {
            panic!("expected snapshot");
        };
        assert_eq!(cipher.decrypt(&snap[0].password).unwrap(), "changed");
    }

    #[tokio::test]
    async fn session_flow_sign_in_to_sign_out() {
        let identity = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let cipher = cipher();

        let user = verified_user(&identity).await;
        let pins = PinService::new(store.clone(), cipher.clone());
        pins.setup(&user.uid, "4242", "4242").await.unwrap();

        let service = LockerService::new(store.clone(), cipher.clone());
        service
            .create(&user.uid, "Bank", "jane", "hunter2")
            .await
            .unwrap();
        service
            .create(&user.uid, "Apple", "jane", "letmein")
            .await
            .unwrap();

        let controller = SessionController::new(identity.clone(), store, cipher);
        let mut handle = controller.spawn();

        assert!(matches!(
            next_or_timeout(&mut handle).await,
            SessionEvent::Ready { .. }
        ));

        match next_or_timeout(&mut handle).await {
            SessionEvent::Lockers(view) => {
                let names: Vec<_> = view.iter().map(|l| l.name.as_str()).collect();
                assert_eq!(names, ["Apple", "Bank"]);
                assert_eq!(view[1].password, "hunter2");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        identity.sign_out().await.unwrap();
        loop {
            match next_or_timeout(&mut handle).await {
                SessionEvent::SignedOut => break,
                SessionEvent::Lockers(_) => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn session_requires_pin_setup_when_absent() {
        let identity = MemoryIdentityProvider::new();
        let store = MemoryStore::new();

        verified_user(&identity).await;

        let controller = SessionController::new(identity.clone(), store, cipher());
        let mut handle = controller.spawn();

        assert!(matches!(
            next_or_timeout(&mut handle).await,
            SessionEvent::PinSetupRequired { .. }
        ));
    }

    #[tokio::test]
    async fn session_starts_signed_out() {
        let identity = MemoryIdentityProvider::new();
        let store = MemoryStore::new();

        let controller = SessionController::new(identity, store, cipher());
        let mut handle = controller.spawn();

        assert!(matches!(
            next_or_timeout(&mut handle).await,
            SessionEvent::SignedOut
        ));
    }

    #[tokio::test]
    async fn unverified_user_is_not_admitted() {
        let identity = MemoryIdentityProvider::new();
        let store = MemoryStore::new();

        identity
            .sign_up("user@example.com", "s3cret!pw", "Jane")
            .await
            .unwrap();

        let controller = SessionController::new(identity, store, cipher());
        let mut handle = controller.spawn();

        // Signed in but unverified: treated as no session
        assert!(matches!(
            next_or_timeout(&mut handle).await,
            SessionEvent::SignedOut
        ));
    }
}
