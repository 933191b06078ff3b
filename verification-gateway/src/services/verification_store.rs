//! Redundant persistence of [`VerificationRecord`]s.
//!
//! A record is written to a durable store and, best effort, to a
//! session-scoped store. Reads prefer the durable copy and fall back to the
//! session copy. Corrupt or missing data reads as "not verified"; reading
//! never fails.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::models::VerificationRecord;
use crate::services::kv_store::KeyValueStore;

/// Shared backing stores plus the change feeds observers subscribe to.
#[derive(Clone)]
pub struct VerificationBackends {
    inner: Arc<BackendsInner>,
}

struct BackendsInner {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    key_prefix: String,
    feeds: DashMap<String, watch::Sender<Option<VerificationRecord>>>,
}

impl VerificationBackends {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(BackendsInner {
                durable,
                session,
                key_prefix: key_prefix.into(),
                feeds: DashMap::new(),
            }),
        }
    }

    /// Users with at least one live feed.
    pub fn watched_users(&self) -> usize {
        self.inner.feeds.len()
    }

    /// The verification store of one user.
    pub fn store_for(&self, user_id: &str) -> VerificationStore {
        VerificationStore {
            backends: self.inner.clone(),
            key: format!("{}:{}", self.inner.key_prefix, user_id),
        }
    }
}

/// One user's verification state.
#[derive(Clone)]
pub struct VerificationStore {
    backends: Arc<BackendsInner>,
    key: String,
}

impl VerificationStore {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes `record` to both stores. Succeeds once the durable write
    /// succeeds; the session copy is best effort. When the durable write
    /// fails nothing is written, so the session copy can never grant access
    /// on its own.
    pub fn write(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let raw = record.to_json()?;

        self.backends.durable.set(&self.key, &raw).inspect_err(|err| {
            tracing::error!(key = %self.key, error = %err, "Durable verification write failed");
        })?;

        if let Err(err) = self.backends.session.set(&self.key, &raw) {
            tracing::warn!(key = %self.key, error = %err, "Session verification write failed");
        }

        self.publish(Some(record.clone()));
        Ok(())
    }

    pub fn read(&self) -> Option<VerificationRecord> {
        self.read_from("durable", self.backends.durable.as_ref())
            .or_else(|| self.read_from("session", self.backends.session.as_ref()))
    }

    pub fn is_verified(&self) -> bool {
        self.read().is_some()
    }

    /// Removes the record from both stores. Both removals are always
    /// attempted; the first failure is reported.
    pub fn clear(&self) -> Result<(), StoreError> {
        let durable = self.backends.durable.remove(&self.key);
        let session = self.backends.session.remove(&self.key);
        self.publish(None);

        if let Err(err) = &durable {
            tracing::error!(key = %self.key, error = %err, "Durable verification clear failed");
        }
        if let Err(err) = &session {
            tracing::warn!(key = %self.key, error = %err, "Session verification clear failed");
        }
        durable.and(session)
    }

    /// Receives the current record now and after every `write`/`clear`.
    pub fn subscribe(&self) -> VerificationFeed {
        let changes = self
            .backends
            .feeds
            .entry(self.key.clone())
            .or_insert_with(|| watch::channel(self.read()).0)
            .subscribe();
        VerificationFeed {
            changes,
            backends: self.backends.clone(),
            key: self.key.clone(),
        }
    }

    fn read_from(&self, scope: &str, store: &dyn KeyValueStore) -> Option<VerificationRecord> {
        match store.get(&self.key) {
            Ok(Some(raw)) => {
                let record = VerificationRecord::parse(&raw);
                if record.is_none() {
                    tracing::warn!(key = %self.key, scope, "Ignoring unreadable verification record");
                }
                record
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key = %self.key, scope, error = %err, "Verification store read failed");
                None
            }
        }
    }

    fn publish(&self, record: Option<VerificationRecord>) {
        if let Some(feed) = self.backends.feeds.get(&self.key) {
            feed.send_replace(record);
        }
        self.backends
            .feeds
            .remove_if(&self.key, |_, feed| feed.receiver_count() == 0);
    }
}

/// A subscription to one user's record. The shared feed is dropped with its
/// last subscription.
pub struct VerificationFeed {
    changes: watch::Receiver<Option<VerificationRecord>>,
    backends: Arc<BackendsInner>,
    key: String,
}

impl VerificationFeed {
    /// Waits for the next `write`/`clear`. Fails once the feed is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.changes.changed().await
    }

    /// The latest record, marking it seen.
    pub fn latest(&mut self) -> Option<VerificationRecord> {
        self.changes.borrow_and_update().clone()
    }
}

impl Drop for VerificationFeed {
    fn drop(&mut self) {
        // Release our receiver before counting the rest.
        let (_, closed) = watch::channel(None);
        drop(std::mem::replace(&mut self.changes, closed));
        self.backends
            .feeds
            .remove_if(&self.key, |_, feed| feed.receiver_count() == 0);
    }
}
