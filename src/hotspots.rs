//! Live report set and debounced hotspot recomputation.
//!
//! Reports are stored as `Arc<Report>` and replaced whole, so a clustering
//! pass working from a snapshot sees each report either before or after its
//! classification, never halfway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::cluster::{cluster, ClusterConfig};
use crate::models::{ClassificationResult, Report, ReportStatus};
use crate::publisher::HotspotPublisher;

#[derive(Default)]
struct Slots {
    next_seq: u64,
    by_id: HashMap<String, (u64, Arc<Report>)>,
}

/// Current reports known to this process, in arrival order.
#[derive(Default)]
pub struct ReportSet {
    slots: RwLock<Slots>,
    changed: Notify,
}

impl ReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a report. A replaced report keeps its position.
    pub async fn upsert(&self, report: Report) {
        {
            let mut slots = self.slots.write().await;
            let seq = match slots.by_id.get(&report.id) {
                Some((seq, _)) => *seq,
                None => {
                    slots.next_seq += 1;
                    slots.next_seq
                }
            };
            slots.by_id.insert(report.id.clone(), (seq, Arc::new(report)));
        }
        self.changed.notify_one();
    }

    /// Replace the whole set, e.g. after a refresh from the server.
    pub async fn replace_all(&self, reports: Vec<Report>) {
        {
            let mut slots = self.slots.write().await;
            slots.by_id.clear();
            for report in reports {
                slots.next_seq += 1;
                let seq = slots.next_seq;
                slots.by_id.insert(report.id.clone(), (seq, Arc::new(report)));
            }
        }
        self.changed.notify_one();
    }

    /// Merge a full listing from the server into the set.
    ///
    /// Reports missing from `fetched` are dropped and known reports keep
    /// their position. While the server still lists a report as pending, the
    /// local copy wins, so a local classification is not undone. Returns the
    /// pending reports this set had not seen before.
    pub async fn refresh(&self, fetched: Vec<Report>) -> Vec<Report> {
        let mut unseen = Vec::new();
        {
            let mut slots = self.slots.write().await;
            let mut previous = std::mem::take(&mut slots.by_id);

            for report in fetched {
                let id = report.id.clone();
                let slot = match previous.remove(&id) {
                    Some((seq, local)) if report.status == ReportStatus::Pending => (seq, local),
                    Some((seq, _)) => (seq, Arc::new(report)),
                    None => {
                        if report.status == ReportStatus::Pending {
                            unseen.push(report.clone());
                        }
                        slots.next_seq += 1;
                        (slots.next_seq, Arc::new(report))
                    }
                };
                slots.by_id.insert(id, slot);
            }
        }
        self.changed.notify_one();
        unseen
    }

    /// Swap in the classified version of a report.
    ///
    /// Returns the new value, or `None` if the report is no longer present.
    pub async fn apply_classification(
        &self,
        report_id: &str,
        result: &ClassificationResult,
    ) -> Option<Arc<Report>> {
        let updated = {
            let mut slots = self.slots.write().await;
            let (_, current) = slots.by_id.get_mut(report_id)?;
            let next = Arc::new(current.with_classification(result));
            *current = Arc::clone(&next);
            next
        };
        self.changed.notify_one();
        Some(updated)
    }

    pub async fn remove(&self, report_id: &str) -> bool {
        let removed = self.slots.write().await.by_id.remove(report_id).is_some();
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    pub async fn get(&self, report_id: &str) -> Option<Arc<Report>> {
        self.slots
            .read()
            .await
            .by_id
            .get(report_id)
            .map(|(_, report)| Arc::clone(report))
    }

    /// Point-in-time copy of the set in arrival order.
    pub async fn snapshot(&self) -> Vec<Arc<Report>> {
        let slots = self.slots.read().await;
        let mut rows: Vec<_> = slots.by_id.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, r)| Arc::clone(r)).collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolves after the next change. A change made while nobody was
    /// waiting is remembered for the next waiter.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// Recompute hotspots after the report set settles.
///
/// A change starts a quiet window of `debounce`; further changes restart it.
/// When the set becomes empty the empty list is published at once. The task
/// runs until aborted.
pub fn spawn_hotspot_task(
    reports: Arc<ReportSet>,
    publisher: Arc<HotspotPublisher>,
    config: ClusterConfig,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            reports.changed().await;

            if reports.is_empty().await {
                publisher.publish(Vec::new());
                continue;
            }

            let mut coalesced = 1usize;
            while tokio::time::timeout(debounce, reports.changed()).await.is_ok() {
                coalesced += 1;
            }

            let snapshot = reports.snapshot().await;
            let hotspots = cluster(&snapshot, &config, Utc::now());
            tracing::info!(
                reports = snapshot.len(),
                hotspots = hotspots.len(),
                coalesced_changes = coalesced,
                "Hotspots recomputed"
            );
            publisher.publish(hotspots);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use crate::cluster::test_support::{report_at, KM_LAT};
    use crate::cluster::ClusterConfig;
    use crate::hotspots::{spawn_hotspot_task, ReportSet};
    use crate::models::{ClassificationResult, ReportStatus};
    use crate::publisher::HotspotPublisher;

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    fn verdict(valid: bool, severity: u8) -> ClassificationResult {
        ClassificationResult {
            is_valid_hazard: valid,
            severity_score: severity,
            reasoning: "test".to_string(),
            keywords: BTreeSet::new(),
            language: "en".to_string(),
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn snapshot_keeps_arrival_order() {
        let set = ReportSet::new();
        let now = Utc::now();
        set.upsert(report_at("b", 1.0, 1.0, Some(2), now)).await;
        set.upsert(report_at("a", 1.0, 1.0, Some(2), now)).await;
        set.upsert(report_at("b", 2.0, 2.0, Some(3), now)).await;

        let ids: Vec<_> = set.snapshot().await.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(set.get("b").await.expect("b").latitude, 2.0);
    }

    #[tokio::test]
    async fn classification_swaps_whole_report() {
        let set = ReportSet::new();
        set.upsert(report_at("r1", 13.0, 80.2, Some(3), Utc::now())).await;

        let before = set.snapshot().await;
        let updated = set
            .apply_classification("r1", &verdict(true, 8))
            .await
            .expect("present");

        assert_eq!(updated.status, ReportStatus::Verified);
        assert_eq!(updated.severity_score, Some(8));
        // earlier snapshot still holds the old value
        assert_eq!(before[0].severity_score, Some(3));
        assert_eq!(set.get("r1").await.expect("r1").severity_score, Some(8));

        assert!(set.apply_classification("gone", &verdict(true, 8)).await.is_none());
    }

    #[tokio::test]
    async fn refresh_keeps_local_classification_and_reports_new_pending() {
        let set = ReportSet::new();
        let now = Utc::now();
        set.upsert(report_at("known", 13.0, 80.2, Some(3), now)).await;
        set.upsert(report_at("stale", 13.0, 80.2, Some(3), now)).await;
        set.apply_classification("known", &verdict(true, 9)).await;

        let mut known = report_at("known", 13.0, 80.2, Some(3), now);
        known.status = ReportStatus::Pending;
        let mut fresh = report_at("fresh", 13.1, 80.3, Some(4), now);
        fresh.status = ReportStatus::Pending;
        let mut reviewed = report_at("reviewed", 13.2, 80.4, Some(6), now);
        reviewed.status = ReportStatus::Verified;

        let unseen = set.refresh(vec![known, fresh, reviewed]).await;

        let unseen_ids: Vec<_> = unseen.iter().map(|r| r.id.clone()).collect();
        assert_eq!(unseen_ids, vec!["fresh"]);
        assert!(set.get("stale").await.is_none());
        let known = set.get("known").await.expect("known");
        assert_eq!(known.status, ReportStatus::Verified);
        assert_eq!(known.severity_score, Some(9));
        let ids: Vec<_> = set.snapshot().await.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["known", "fresh", "reviewed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_coalesces_into_one_recompute() {
        let set = Arc::new(ReportSet::new());
        let publisher = Arc::new(HotspotPublisher::new());
        let handle = spawn_hotspot_task(
            Arc::clone(&set),
            Arc::clone(&publisher),
            ClusterConfig::default(),
            DEBOUNCE,
        );
        let now = Utc::now();

        for i in 0..3 {
            set.upsert(report_at(&format!("r{i}"), 15.0 + i as f64 * KM_LAT, 73.8, Some(5), now))
                .await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        set.upsert(report_at("r3", 15.0, 73.8 + 0.001, Some(5), now)).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(publisher.generation(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(publisher.generation(), 1);
        let hotspots = publisher.current_hotspots();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].report_count, 4);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_set_publishes_immediately() {
        let set = Arc::new(ReportSet::new());
        let publisher = Arc::new(HotspotPublisher::new());
        let handle = spawn_hotspot_task(
            Arc::clone(&set),
            Arc::clone(&publisher),
            ClusterConfig::default(),
            DEBOUNCE,
        );

        set.replace_all(Vec::new()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(publisher.generation(), 1);
        assert!(publisher.current_hotspots().is_empty());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn classification_triggers_recompute() {
        let set = Arc::new(ReportSet::new());
        let publisher = Arc::new(HotspotPublisher::new());
        let now = Utc::now();
        for i in 0..3 {
            set.upsert(report_at(&format!("r{i}"), 9.9, 76.2, Some(2), now)).await;
        }
        let handle = spawn_hotspot_task(
            Arc::clone(&set),
            Arc::clone(&publisher),
            ClusterConfig::default(),
            DEBOUNCE,
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(publisher.generation(), 1);
        let first = publisher.current_hotspots()[0].avg_severity;

        set.apply_classification("r0", &verdict(true, 8)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(publisher.generation(), 2);
        assert!(publisher.current_hotspots()[0].avg_severity > first);

        handle.abort();
    }
}
