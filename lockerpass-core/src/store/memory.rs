//! In-memory locker and PIN store for dev mode and tests.
//!
//! Mutations push a fresh name-ordered snapshot to every live subscriber,
//! mirroring the hosted document store's push updates.

use crate::store::{
    sort_by_name, Locker, LockerPatch, LockerStore, LockerSubscription, NewLocker,
    PersistenceError, PinStore, SubscriptionEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
struct State {
    lockers: HashMap<String, Vec<Locker>>,
    pins: HashMap<String, String>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<SubscriptionEvent>>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(state: &State, uid: &str) -> Vec<Locker> {
        let mut lockers = state.lockers.get(uid).cloned().unwrap_or_default();
        sort_by_name(&mut lockers);
        lockers
    }

    fn broadcast(state: &mut State, uid: &str) {
        let snapshot = Self::snapshot(state, uid);
        if let Some(subscribers) = state.subscribers.get_mut(uid) {
            subscribers.retain(|tx| {
                tx.send(SubscriptionEvent::Snapshot(snapshot.clone())).is_ok()
            });
        }
    }

    /// Push a stream-level error to live subscribers without cancelling
    /// them. Stands in for a backend-side read failure.
    #[cfg(test)]
    pub(crate) fn inject_error(&self, uid: &str, error: PersistenceError) {
        let mut state = self.inner.lock().expect("store lock");
        if let Some(subscribers) = state.subscribers.get_mut(uid) {
            subscribers.retain(|tx| tx.send(SubscriptionEvent::Error(error.clone())).is_ok());
        }
    }
}

#[async_trait]
impl LockerStore for MemoryStore {
    async fn subscribe(&self, uid: &str) -> Result<LockerSubscription, PersistenceError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.lock().expect("store lock");
        let initial = Self::snapshot(&state, uid);
        let _ = tx.send(SubscriptionEvent::Snapshot(initial));
        state.subscribers.entry(uid.to_string()).or_default().push(tx);

        // No backing task: emissions are pushed directly on mutation
        Ok(LockerSubscription::new(rx, None))
    }

    async fn create(&self, uid: &str, locker: NewLocker) -> Result<String, PersistenceError> {
        let id = Uuid::new_v4().to_string();

        let mut state = self.inner.lock().expect("store lock");
        state.lockers.entry(uid.to_string()).or_default().push(Locker {
            id: id.clone(),
            name: locker.name,
            username: locker.username,
            password: locker.password,
        });
        Self::broadcast(&mut state, uid);

        Ok(id)
    }

    async fn update(
        &self,
        uid: &str,
        id: &str,
        patch: LockerPatch,
    ) -> Result<(), PersistenceError> {
        let mut state = self.inner.lock().expect("store lock");

        let locker = state
            .lockers
            .get_mut(uid)
            .and_then(|lockers| lockers.iter_mut().find(|l| l.id == id))
            .ok_or_else(|| PersistenceError::NotFound(format!("locker {}", id)))?;

        if let Some(name) = patch.name {
            locker.name = name;
        }
        if let Some(username) = patch.username {
            locker.username = username;
        }
        if let Some(password) = patch.password {
            locker.password = password;
        }

        Self::broadcast(&mut state, uid);
        Ok(())
    }

    async fn delete(&self, uid: &str, id: &str) -> Result<(), PersistenceError> {
        let mut state = self.inner.lock().expect("store lock");

        if let Some(lockers) = state.lockers.get_mut(uid) {
            lockers.retain(|l| l.id != id);
        }
        Self::broadcast(&mut state, uid);

        Ok(())
    }
}

#[async_trait]
impl PinStore for MemoryStore {
    async fn load_pin(&self, uid: &str) -> Result<Option<String>, PersistenceError> {
        let state = self.inner.lock().expect("store lock");
        Ok(state.pins.get(uid).cloned())
    }

    async fn save_pin(&self, uid: &str, ciphertext: &str) -> Result<(), PersistenceError> {
        let mut state = self.inner.lock().expect("store lock");
        state.pins.insert(uid.to_string(), ciphertext.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_locker(name: &str) -> NewLocker {
        NewLocker {
            name: name.to_string(),
            username: format!("{}-user", name.to_lowercase()),
            password: "ciphertext".to_string(),
        }
    }

    #[tokio::test]
    async fn emissions_are_ordered_by_name() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("uid-1").await.unwrap();

        // Initial emission: empty snapshot
        match sub.next_event().await.unwrap() {
            SubscriptionEvent::Snapshot(snap) => assert!(snap.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        store.create("uid-1", new_locker("Bank")).await.unwrap();
        store.create("uid-1", new_locker("Apple")).await.unwrap();
        store.create("uid-1", new_locker("Zeta")).await.unwrap();

        let mut last = None;
        for _ in 0..3 {
            if let Some(SubscriptionEvent::Snapshot(snap)) = sub.next_event().await {
                last = Some(snap);
            }
        }

        let names: Vec<_> = last
            .unwrap()
            .iter()
            .map(|l| l.name.clone())
            .collect();
        assert_eq!(names, ["Apple", "Bank", "Zeta"]);
    }

    #[tokio::test]
    async fn partial_update_leaves_other_fields() {
        let store = MemoryStore::new();
        let id = store.create("uid-1", new_locker("Bank")).await.unwrap();

        store
            .update(
                "uid-1",
                &id,
                LockerPatch {
                    username: Some("new-user".to_string()),
                    ..LockerPatch::default()
                },
            )
            .await
            .unwrap();

        let mut sub = store.subscribe("uid-1").await.unwrap();
        let SubscriptionEvent::Snapshot(snap) = sub.next_event().await.unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snap[0].name, "Bank");
        assert_eq!(snap[0].username, "new-user");
        assert_eq!(snap[0].password, "ciphertext");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = store.create("uid-1", new_locker("Bank")).await.unwrap();

        store.delete("uid-1", &id).await.unwrap();
        // Second delete of the same id is not an error
        store.delete("uid-1", &id).await.unwrap();
        store.delete("uid-1", "never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn update_missing_id_reports_not_found() {
        let store = MemoryStore::new();
        let result = store
            .update("uid-1", "missing", LockerPatch::default())
            .await;
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[tokio::test]
    async fn collections_are_scoped_per_user() {
        let store = MemoryStore::new();
        store.create("uid-1", new_locker("Mine")).await.unwrap();

        let mut sub = store.subscribe("uid-2").await.unwrap();
        let SubscriptionEvent::Snapshot(snap) = sub.next_event().await.unwrap() else {
            panic!("expected snapshot");
        };
        assert!(snap.is_empty());
    }

    #[tokio::test]
    async fn stream_error_does_not_cancel_subscription() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("uid-1").await.unwrap();
        let _ = sub.next_event().await; // initial snapshot

        store.inject_error(
            "uid-1",
            PersistenceError::Request("read failed".to_string()),
        );
        assert!(matches!(
            sub.next_event().await,
            Some(SubscriptionEvent::Error(_))
        ));

        // The feed keeps delivering after the error
        store.create("uid-1", new_locker("Bank")).await.unwrap();
        assert!(matches!(
            sub.next_event().await,
            Some(SubscriptionEvent::Snapshot(snap)) if snap.len() == 1
        ));
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_receiving() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("uid-1").await.unwrap();
        let _ = sub.next_event().await;

        sub.cancel();
        store.create("uid-1", new_locker("Bank")).await.unwrap();
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn pin_record_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.load_pin("uid-1").await.unwrap(), None);

        store.save_pin("uid-1", "pin-ciphertext").await.unwrap();
        assert_eq!(
            store.load_pin("uid-1").await.unwrap().as_deref(),
            Some("pin-ciphertext")
        );

        // Replace on change
        store.save_pin("uid-1", "new-ciphertext").await.unwrap();
        assert_eq!(
            store.load_pin("uid-1").await.unwrap().as_deref(),
            Some("new-ciphertext")
        );
    }
}
