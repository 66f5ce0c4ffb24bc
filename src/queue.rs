//! Offline submission queue.
//!
//! Buffers reports in the local store until the sync coordinator pushes them
//! to the ingestion endpoint. Entries are never dropped while unsynced; they
//! leave storage only through an explicit [`SubmissionQueue::purge_synced`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;

use crate::error::{ErrorContext, Result};
use crate::models::{EntryState, QueueEntry, ReportPayload};
use crate::store::{MarkOutcome, QueueStore};

/// Prefix of every locally generated id.
pub const LOCAL_ID_PREFIX: &str = "offline_";

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Generate a namespaced local id: `offline_<unix millis>_<9 base36 chars>`.
pub fn generate_local_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!(
        "{}{}_{}",
        LOCAL_ID_PREFIX,
        Utc::now().timestamp_millis(),
        suffix
    )
}

/// Handle to the local queue. Cheap to clone; clones share the store and the
/// in-flight registry.
#[derive(Clone)]
pub struct SubmissionQueue {
    store: Arc<dyn QueueStore>,
    in_flight: Arc<DashMap<String, Instant>>,
}

impl SubmissionQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Validate and persist a report, returning its local id.
    ///
    /// Storage failures are returned to the caller.
    pub async fn enqueue(&self, payload: ReportPayload) -> Result<String> {
        payload.validate()?;

        let entry = QueueEntry {
            local_id: generate_local_id(),
            payload,
            synced: false,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.add(&entry).await {
            e.log_with_context(
                &ErrorContext::new("enqueue").with_record_id(entry.local_id.clone()),
            );
            return Err(e);
        }

        tracing::info!(
            local_id = %entry.local_id,
            hazard_type = %entry.payload.hazard_type,
            "Report queued offline"
        );

        Ok(entry.local_id)
    }

    /// Unsynced entries in insertion order.
    pub async fn list_unsynced(&self) -> Result<Vec<QueueEntry>> {
        self.store.list_by_synced(false).await
    }

    /// Every stored entry, synced or not, in insertion order.
    pub async fn all_entries(&self) -> Result<Vec<QueueEntry>> {
        self.store.list_all().await
    }

    pub async fn get(&self, local_id: &str) -> Result<Option<QueueEntry>> {
        self.store.get(local_id).await
    }

    /// Mark an entry synced. Idempotent.
    pub async fn mark_synced(&self, local_id: &str) -> Result<MarkOutcome> {
        let outcome = self.store.mark_synced(local_id).await?;
        match outcome {
            MarkOutcome::Marked => tracing::debug!(local_id = %local_id, "Entry marked synced"),
            MarkOutcome::AlreadySynced => {
                tracing::debug!(local_id = %local_id, "Entry already synced")
            }
            MarkOutcome::NotFound => {
                tracing::debug!(local_id = %local_id, "Mark synced for unknown entry")
            }
        }
        Ok(outcome)
    }

    /// Remove every synced entry.
    pub async fn purge_synced(&self) -> Result<u64> {
        let removed = self.store.delete_synced().await?;
        if removed > 0 {
            tracing::info!(count = removed, "Purged synced queue entries");
        }
        Ok(removed)
    }

    /// Current sync state of an entry, or `None` if it is not stored.
    pub async fn state(&self, local_id: &str) -> Result<Option<EntryState>> {
        let Some(entry) = self.store.get(local_id).await? else {
            return Ok(None);
        };
        Ok(Some(if entry.synced {
            EntryState::Synced
        } else if self.in_flight.contains_key(local_id) {
            EntryState::Submitting
        } else {
            EntryState::Queued
        }))
    }

    /// Claim an entry for submission. Returns `None` if someone else holds it.
    ///
    /// The claim is released when the returned guard is dropped.
    pub fn try_claim(&self, local_id: &str) -> Option<SubmissionClaim> {
        match self.in_flight.entry(local_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(SubmissionClaim {
                    local_id: local_id.to_string(),
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Marks an entry as being submitted until dropped.
pub struct SubmissionClaim {
    local_id: String,
    in_flight: Arc<DashMap<String, Instant>>,
}

impl SubmissionClaim {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

impl Drop for SubmissionClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.local_id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::error::{Result, TidewatchError};
    use crate::models::{EntryState, HazardType, QueueEntry, ReportPayload};
    use crate::queue::{generate_local_id, SubmissionQueue, LOCAL_ID_PREFIX};
    use crate::store::{MarkOutcome, MemoryQueueStore, QueueStore};

    fn payload(description: &str) -> ReportPayload {
        ReportPayload {
            latitude: 17.68,
            longitude: 83.21,
            hazard_type: HazardType::UnusualTide,
            description: Some(description.to_string()),
            image_url: None,
            video_url: None,
            severity: 3,
            language: "te".to_string(),
            user_id: None,
        }
    }

    fn memory_queue() -> SubmissionQueue {
        SubmissionQueue::new(Arc::new(MemoryQueueStore::new()))
    }

    /// Store whose every write fails.
    struct BrokenStore;

    #[async_trait]
    impl QueueStore for BrokenStore {
        async fn add(&self, _entry: &QueueEntry) -> Result<()> {
            Err(TidewatchError::Storage("disk full".to_string()))
        }
        async fn get(&self, _local_id: &str) -> Result<Option<QueueEntry>> {
            Ok(None)
        }
        async fn put(&self, _entry: &QueueEntry) -> Result<()> {
            Err(TidewatchError::Storage("disk full".to_string()))
        }
        async fn delete(&self, _local_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn list_by_synced(&self, _synced: bool) -> Result<Vec<QueueEntry>> {
            Ok(vec![])
        }
        async fn list_created_between(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<QueueEntry>> {
            Ok(vec![])
        }
        async fn list_all(&self) -> Result<Vec<QueueEntry>> {
            Ok(vec![])
        }
        async fn mark_synced(&self, _local_id: &str) -> Result<MarkOutcome> {
            Err(TidewatchError::Storage("disk full".to_string()))
        }
        async fn delete_synced(&self) -> Result<u64> {
            Err(TidewatchError::Storage("disk full".to_string()))
        }
    }

    #[test]
    fn local_ids_are_namespaced() {
        let id = generate_local_id();
        assert!(id.starts_with(LOCAL_ID_PREFIX));
        let suffix = id.rsplit('_').next().expect("suffix");
        assert_eq!(suffix.len(), 9);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn enqueue_then_list_preserves_order() {
        let queue = memory_queue();
        let first = queue.enqueue(payload("first report")).await.expect("enqueue");
        let second = queue.enqueue(payload("second report")).await.expect("enqueue");

        let unsynced = queue.list_unsynced().await.expect("list");
        assert_eq!(unsynced.len(), 2);
        assert_eq!(unsynced[0].local_id, first);
        assert_eq!(unsynced[1].local_id, second);
        assert!(!unsynced[0].synced);
    }

    #[tokio::test]
    async fn synced_entries_stay_until_purged() {
        let queue = memory_queue();
        let id = queue.enqueue(payload("waves")).await.expect("enqueue");

        assert_eq!(queue.mark_synced(&id).await.expect("mark"), MarkOutcome::Marked);
        assert!(queue.list_unsynced().await.expect("list").is_empty());
        assert_eq!(queue.all_entries().await.expect("all").len(), 1);
        assert_eq!(queue.state(&id).await.expect("state"), Some(EntryState::Synced));

        assert_eq!(queue.purge_synced().await.expect("purge"), 1);
        assert!(queue.all_entries().await.expect("all").is_empty());
        assert_eq!(queue.state(&id).await.expect("state"), None);
    }

    #[tokio::test]
    async fn mark_synced_is_idempotent() {
        let queue = memory_queue();
        let id = queue.enqueue(payload("waves")).await.expect("enqueue");

        queue.mark_synced(&id).await.expect("mark");
        assert_eq!(
            queue.mark_synced(&id).await.expect("mark again"),
            MarkOutcome::AlreadySynced
        );
        assert_eq!(
            queue.mark_synced("offline_0_missing").await.expect("unknown"),
            MarkOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn purge_keeps_unsynced_entries() {
        let queue = memory_queue();
        let keep = queue.enqueue(payload("keep me")).await.expect("enqueue");
        let done = queue.enqueue(payload("done")).await.expect("enqueue");
        queue.mark_synced(&done).await.expect("mark");

        queue.purge_synced().await.expect("purge");

        let remaining = queue.all_entries().await.expect("all");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, keep);
    }

    #[tokio::test]
    async fn invalid_payload_is_never_enqueued() {
        let queue = memory_queue();
        let mut bad = payload("nowhere");
        bad.latitude = 123.0;

        let err = queue.enqueue(bad).await.unwrap_err();
        assert!(matches!(err, TidewatchError::Validation(_)));
        assert!(queue.all_entries().await.expect("all").is_empty());
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let queue = SubmissionQueue::new(Arc::new(BrokenStore));
        let err = queue.enqueue(payload("lost?")).await.unwrap_err();
        assert!(matches!(err, TidewatchError::Storage(_)));
        assert!(err.is_critical());
    }

    #[tokio::test]
    async fn claims_are_exclusive() {
        let queue = memory_queue();
        let id = queue.enqueue(payload("claim me")).await.expect("enqueue");

        let claim = queue.try_claim(&id).expect("first claim");
        assert_eq!(claim.local_id(), id);
        assert!(queue.try_claim(&id).is_none());
        assert!(queue.clone().try_claim(&id).is_none());
        assert_eq!(queue.state(&id).await.expect("state"), Some(EntryState::Submitting));

        drop(claim);
        assert_eq!(queue.in_flight_count(), 0);
        assert_eq!(queue.state(&id).await.expect("state"), Some(EntryState::Queued));
        assert!(queue.try_claim(&id).is_some());
    }

    #[tokio::test]
    async fn concurrent_enqueues_are_all_kept() {
        let queue = memory_queue();
        let mut handles = Vec::new();
        for i in 0..32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(payload(&format!("report {i}"))).await
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.expect("join").expect("enqueue"));
        }

        assert_eq!(ids.len(), 32);
        assert_eq!(queue.list_unsynced().await.expect("list").len(), 32);
    }
}
