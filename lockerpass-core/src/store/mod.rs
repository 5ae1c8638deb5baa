//! Persistence boundary: locker models, store traits, and live subscriptions.
//!
//! All operations are scoped to one user's id. The password field of a
//! [`Locker`] is ciphertext everywhere on this side of the boundary;
//! decryption happens only at the presentation layer.

pub mod memory;
pub mod remote;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors surfaced by the document-store boundary.
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// One saved credential entry.
///
/// `id` is assigned by the backend on creation and stable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locker {
    pub id: String,
    pub name: String,
    pub username: String,
    /// Ciphertext at rest and on the wire.
    pub password: String,
}

/// Fields for a new locker. `password` must already be ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLocker {
    pub name: String,
    pub username: String,
    pub password: String,
}

/// Partial update: only present fields change on the stored record.
/// `password`, when present, must already be ciphertext.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl LockerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.username.is_none() && self.password.is_none()
    }
}

/// An emission on a live locker subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// Full current snapshot, ordered by name. Replaces prior state wholesale.
    Snapshot(Vec<Locker>),
    /// A failure on the stream. Does not cancel the subscription.
    Error(PersistenceError),
}

/// A live feed of locker snapshots for one user.
///
/// The feed is infinite until cancelled. Dropping the subscription also
/// stops the backing task; holding it open past sign-out is a resource
/// leak on the backend.
pub struct LockerSubscription {
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    task: Option<JoinHandle<()>>,
}

impl LockerSubscription {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, task }
    }

    /// Next emission; `None` once the feed has been cancelled.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Stop the feed and release the backing task.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for LockerSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The per-user locker collection contract.
#[async_trait]
pub trait LockerStore: Send + Sync {
    /// Open a live subscription to the user's lockers. The first emission
    /// is the current snapshot; later emissions follow backend changes in
    /// production order.
    async fn subscribe(&self, uid: &str) -> Result<LockerSubscription, PersistenceError>;

    /// Append a new locker; the backend assigns and returns the id.
    async fn create(&self, uid: &str, locker: NewLocker) -> Result<String, PersistenceError>;

    /// Partial update of one locker.
    async fn update(
        &self,
        uid: &str,
        id: &str,
        patch: LockerPatch,
    ) -> Result<(), PersistenceError>;

    /// Idempotent removal; deleting a missing id is not an error.
    async fn delete(&self, uid: &str, id: &str) -> Result<(), PersistenceError>;
}

/// The per-user PIN record: a single encrypted value, never deleted.
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Load the stored PIN ciphertext, if a record exists.
    async fn load_pin(&self, uid: &str) -> Result<Option<String>, PersistenceError>;

    /// Create or replace the PIN record.
    async fn save_pin(&self, uid: &str, ciphertext: &str) -> Result<(), PersistenceError>;
}

pub(crate) fn sort_by_name(lockers: &mut [Locker]) {
    lockers.sort_by(|a, b| a.name.cmp(&b.name));
}
