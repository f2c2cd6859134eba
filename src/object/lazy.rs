//! Lazy partial-object proxy.
//!
//! A [`LazyRecord`] wraps a record whose field bag is known to be a strict
//! subset of the resource's true remote field set, plus the identity needed
//! to fetch the rest. Accessing a field that is already present never
//! touches the network; accessing an absent one triggers a single
//! full-fetch, merges the result (local unsaved edits win) and completes
//! the record. After completion, a missing field is a plain
//! [`Error::KeyNotFound`], never another fetch.
//!
//! Fetch initiation is serialized: at most one full-fetch is in flight per
//! instance, and concurrent callers all observe that fetch's one outcome.
//! A failed or cancelled fetch reverts to the partial state so a later
//! access can retry.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::rest::Bugzilla;

use super::record::{ResourceKind, ResourceRecord};
use super::value::FieldValue;

/// Outcome of one full-fetch attempt, broadcast to concurrent waiters.
/// `None` means the fetch is still in flight.
type Outcome = Option<std::result::Result<(), String>>;

enum Phase {
    /// Field bag is a strict subset of the remote field set.
    Partial,
    /// A full-fetch is in flight; waiters subscribe to its outcome.
    Fetching(watch::Receiver<Outcome>),
    /// Terminal: the bag holds the full remote representation.
    Complete,
}

struct Inner {
    record: ResourceRecord,
    phase: Phase,
}

/// What a caller decided to do while holding the lock.
enum Action {
    Wait(watch::Receiver<Outcome>),
    Fetch(watch::Sender<Outcome>),
}

/// A possibly-partial resource record that fetches missing fields on
/// first access.
pub struct LazyRecord {
    client: Bugzilla,
    kind: ResourceKind,
    identity: String,
    inner: Arc<Mutex<Inner>>,
}

/// Reverts an abandoned in-flight fetch to the partial state, so a
/// cancelled request does not wedge the proxy.
struct FetchGuard {
    inner: Arc<Mutex<Inner>>,
    armed: bool,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = lock(&self.inner);
            if matches!(inner.phase, Phase::Fetching(_)) {
                inner.phase = Phase::Partial;
            }
        }
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> std::sync::MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LazyRecord {
    /// Wrap a partial record with an explicit identity.
    pub fn new(
        client: Bugzilla,
        kind: ResourceKind,
        identity: impl Into<String>,
        record: ResourceRecord,
    ) -> Self {
        Self {
            client,
            kind,
            identity: identity.into(),
            inner: Arc::new(Mutex::new(Inner {
                record,
                phase: Phase::Partial,
            })),
        }
    }

    /// Wrap a partial record, taking the identity from its primary key.
    pub fn from_partial(client: Bugzilla, record: ResourceRecord) -> Result<Self> {
        let identity = record
            .identity()
            .ok_or_else(|| Error::decode(record.kind(), "partial record has no primary key"))?;
        let kind = record.kind();
        Ok(Self::new(client, kind, identity, record))
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True once a full-fetch has succeeded; proxying is then a
    /// pass-through.
    pub fn is_complete(&self) -> bool {
        matches!(lock(&self.inner).phase, Phase::Complete)
    }

    /// Clone of the record as currently known.
    pub fn snapshot(&self) -> ResourceRecord {
        lock(&self.inner).record.clone()
    }

    /// Set a field directly on the bag. Never changes the partiality
    /// state and never triggers a fetch; setting is not "filling in" a
    /// remote gap.
    pub fn set(&self, name: impl Into<String>, value: impl Into<FieldValue>) {
        lock(&self.inner).record.set(name, value);
    }

    /// Get a field, fetching the full remote representation first if the
    /// field is absent and the record is still partial.
    pub async fn get(&self, name: &str) -> Result<FieldValue> {
        loop {
            // The inner lock is never held across an await.
            let action = {
                let mut inner = lock(&self.inner);
                if let Some(value) = inner.record.try_get(name) {
                    return Ok(value.clone());
                }
                match &inner.phase {
                    Phase::Complete => return Err(Error::key_not_found(name)),
                    Phase::Fetching(rx) => Action::Wait(rx.clone()),
                    Phase::Partial => {
                        let (tx, rx) = watch::channel(None);
                        inner.phase = Phase::Fetching(rx);
                        Action::Fetch(tx)
                    },
                }
            };
            match action {
                Action::Wait(mut rx) => Self::await_outcome(&mut rx).await?,
                Action::Fetch(tx) => self.run_fetch(tx).await?,
            }
            // The fetch (ours or another caller's) succeeded; resolve
            // against the merged record on the next pass.
        }
    }

    /// Fetch the full record now, regardless of which fields are present.
    /// A no-op once complete.
    pub async fn load(&self) -> Result<()> {
        let action = {
            let mut inner = lock(&self.inner);
            match &inner.phase {
                Phase::Complete => return Ok(()),
                Phase::Fetching(rx) => Action::Wait(rx.clone()),
                Phase::Partial => {
                    let (tx, rx) = watch::channel(None);
                    inner.phase = Phase::Fetching(rx);
                    Action::Fetch(tx)
                },
            }
        };
        match action {
            Action::Wait(mut rx) => Self::await_outcome(&mut rx).await,
            Action::Fetch(tx) => self.run_fetch(tx).await,
        }
    }

    /// Perform the full-fetch as the initiating caller and broadcast the
    /// outcome.
    async fn run_fetch(&self, tx: watch::Sender<Outcome>) -> Result<()> {
        let mut guard = FetchGuard {
            inner: Arc::clone(&self.inner),
            armed: true,
        };

        tracing::debug!(kind = %self.kind, identity = %self.identity, "lazy full-fetch");
        let fetched = self.client.fetch_full(self.kind, &self.identity).await;

        let mut inner = lock(&self.inner);
        guard.armed = false;
        match fetched {
            Ok(full) => {
                // Local unsaved edits take precedence over fetched values.
                inner.record.fields_mut().merge_missing(full.into_fields());
                inner.phase = Phase::Complete;
                let _ = tx.send(Some(Ok(())));
                Ok(())
            },
            Err(err) => {
                inner.phase = Phase::Partial;
                let reason = err.to_string();
                let _ = tx.send(Some(Err(reason.clone())));
                Err(Error::Fetch { reason })
            },
        }
    }

    /// Wait for the in-flight fetch started by another caller.
    async fn await_outcome(rx: &mut watch::Receiver<Outcome>) -> Result<()> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome.map_err(|reason| Error::Fetch { reason });
            }
            if rx.changed().await.is_err() {
                // Sender dropped without an outcome: the fetch was
                // cancelled. The guard has reverted the state to partial.
                return Err(Error::Fetch {
                    reason: "fetch cancelled".to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for LazyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("LazyRecord")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("complete", &matches!(inner.phase, Phase::Complete))
            .field("record", &inner.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port 9 (discard) is never listening; connects hang or fail, which
    // is all these tests need.
    fn offline_client() -> Bugzilla {
        Bugzilla::new("http://127.0.0.1:9/", None).unwrap()
    }

    fn partial_user(client: Bugzilla) -> LazyRecord {
        let mut record = ResourceRecord::new(ResourceKind::User);
        record.set("name", "alice");
        LazyRecord::new(client, ResourceKind::User, "alice", record)
    }

    #[tokio::test]
    async fn present_field_resolves_without_network() {
        let lazy = partial_user(offline_client());
        let name = lazy.get("name").await.unwrap();
        assert_eq!(name.as_str(), Some("alice"));
        assert!(!lazy.is_complete());
    }

    #[tokio::test]
    async fn set_never_triggers_a_fetch() {
        let lazy = partial_user(offline_client());
        lazy.set("real_name", "Alice A.");
        let value = lazy.get("real_name").await.unwrap();
        assert_eq!(value.as_str(), Some("Alice A."));
        assert!(!lazy.is_complete());
    }

    #[tokio::test]
    async fn cancelled_fetch_reverts_to_partial() {
        let lazy = partial_user(offline_client());

        {
            let mut pending = tokio_test::task::spawn(lazy.get("real_name"));
            assert!(pending.poll().is_pending());
        } // dropped mid-flight; the guard must disarm the Fetching phase

        assert!(!lazy.is_complete());
        assert!(lazy.snapshot().try_get("real_name").is_none());
    }

    #[test]
    fn from_partial_requires_primary_key() {
        let record = ResourceRecord::new(ResourceKind::Bug);
        let err = LazyRecord::from_partial(offline_client(), record).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn from_partial_takes_identity_from_id() {
        let mut record = ResourceRecord::new(ResourceKind::Bug);
        record.set("id", 42);
        let lazy = LazyRecord::from_partial(offline_client(), record).unwrap();
        assert_eq!(lazy.identity(), "42");
    }
}
