//! HTTP client for the hosted document store.
//!
//! CRUD maps onto the backend's per-user collection routes; the live
//! subscription is a spawned poll loop that emits a snapshot whenever the
//! fetched collection changes, and reports per-poll failures in-band
//! without cancelling the feed.

use crate::store::{
    sort_by_name, Locker, LockerPatch, LockerStore, LockerSubscription, NewLocker,
    PersistenceError, PinStore, SubscriptionEvent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Serialize, Deserialize)]
struct PinDocument {
    value: String,
}

impl RemoteStore {
    pub fn new(base_url: &str, poll_interval: Duration) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    fn lockers_url(&self, uid: &str) -> String {
        format!("{}/v1/users/{}/lockers", self.base_url, uid)
    }

    fn locker_url(&self, uid: &str, id: &str) -> String {
        format!("{}/v1/users/{}/lockers/{}", self.base_url, uid, id)
    }

    fn pin_url(&self, uid: &str) -> String {
        format!("{}/v1/users/{}/security/pin", self.base_url, uid)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PersistenceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
        Err(PersistenceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_snapshot(
        client: &reqwest::Client,
        url: &str,
    ) -> Result<Vec<Locker>, PersistenceError> {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        let mut lockers: Vec<Locker> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::InvalidResponse(e.to_string()))?;

        sort_by_name(&mut lockers);
        Ok(lockers)
    }
}

#[async_trait]
impl LockerStore for RemoteStore {
    async fn subscribe(&self, uid: &str) -> Result<LockerSubscription, PersistenceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.lockers_url(uid);
        let poll = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            let mut last: Option<Vec<Locker>> = None;

            loop {
                ticker.tick().await;

                match Self::fetch_snapshot(&client, &url).await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            if tx.send(SubscriptionEvent::Snapshot(snapshot.clone())).is_err() {
                                break;
                            }
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => {
                        // Reported once per failed poll; the feed keeps going
                        warn!("locker subscription poll failed: {}", e);
                        if tx.send(SubscriptionEvent::Error(e)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(LockerSubscription::new(rx, Some(task)))
    }

    async fn create(&self, uid: &str, locker: NewLocker) -> Result<String, PersistenceError> {
        let resp = self
            .client
            .post(self.lockers_url(uid))
            .json(&locker)
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        let body: CreateResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::InvalidResponse(e.to_string()))?;
        Ok(body.id)
    }

    async fn update(
        &self,
        uid: &str,
        id: &str,
        patch: LockerPatch,
    ) -> Result<(), PersistenceError> {
        let resp = self
            .client
            .patch(self.locker_url(uid, id))
            .json(&patch)
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        Self::check(resp).await?;
        Ok(())
    }

    async fn delete(&self, uid: &str, id: &str) -> Result<(), PersistenceError> {
        let resp = self
            .client
            .delete(self.locker_url(uid, id))
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        // Removal is idempotent: a missing id is success
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl PinStore for RemoteStore {
    async fn load_pin(&self, uid: &str) -> Result<Option<String>, PersistenceError> {
        let resp = self
            .client
            .get(self.pin_url(uid))
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }

        let doc: PinDocument = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::InvalidResponse(e.to_string()))?;
        Ok(Some(doc.value))
    }

    async fn save_pin(&self, uid: &str, ciphertext: &str) -> Result<(), PersistenceError> {
        let doc = PinDocument {
            value: ciphertext.to_string(),
        };
        let resp = self
            .client
            .put(self.pin_url(uid))
            .json(&doc)
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        Self::check(resp).await?;
        Ok(())
    }
}
