//! Sync coordinator for the offline queue.
//!
//! On each connectivity-restored signal the coordinator walks the unsynced
//! entries in order and submits them one at a time. Success marks the entry
//! synced; failure leaves it queued for the next signal. There is no retry
//! loop or backoff timer, and the coordinator never deletes entries.
//!
//! After each pass, and periodically while online, the live report set is
//! refreshed from the ingestion endpoint so hotspots follow the server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ErrorContext, Result, TidewatchError};
use crate::models::{HazardType, Report, ReportPayload, ReportStatus};
use crate::pipeline::ReportPipeline;
use crate::queue::SubmissionQueue;
use crate::store::MarkOutcome;

/// Record created by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedReport {
    /// Server id, when the response carried one.
    pub id: Option<String>,
}

/// The remote ingestion endpoint.
#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Submit one report. Exactly one request per call.
    async fn submit(&self, payload: &ReportPayload) -> Result<IngestedReport>;

    /// Every report the server currently holds.
    async fn fetch_reports(&self) -> Result<Vec<Report>>;

    /// Whether the endpoint is currently reachable.
    async fn probe(&self) -> bool;
}

/// HTTP client for the `/api/reports` ingestion endpoint.
pub struct HttpIngestClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIngestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A report row as listed by `GET /api/reports`.
#[derive(Debug, Deserialize)]
struct ReportRow {
    id: Value,
    latitude: f64,
    longitude: f64,
    hazard_type: HazardType,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity_score: Option<f64>,
    #[serde(default)]
    status: ReportStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    language: Option<String>,
}

impl ReportRow {
    fn into_report(self) -> Option<Report> {
        Some(Report {
            id: id_string(&self.id)?,
            latitude: self.latitude,
            longitude: self.longitude,
            hazard_type: self.hazard_type,
            description: self.description,
            severity_score: self
                .severity_score
                .filter(|s| s.is_finite())
                .map(|s| s.round().clamp(1.0, 10.0) as u8),
            status: self.status,
            created_at: self.created_at,
            language: self.language.unwrap_or_else(|| "en".to_string()),
        })
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn submit(&self, payload: &ReportPayload) -> Result<IngestedReport> {
        let url = format!("{}/api/reports", self.base_url);
        let response = self.client.post(&url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TidewatchError::RemoteUnavailable(format!(
                "ingest HTTP {}: {}",
                status, body
            )));
        }

        // The record exists once the server answered 2xx, whatever the body says
        let body = response.text().await.unwrap_or_default();
        let id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(id_string));
        if id.is_none() {
            tracing::warn!("Ingest accepted report without returning an id");
        }

        Ok(IngestedReport { id })
    }

    async fn fetch_reports(&self) -> Result<Vec<Report>> {
        let url = format!("{}/api/reports", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TidewatchError::RemoteUnavailable(format!(
                "report listing HTTP {}: {}",
                status, body
            )));
        }

        let rows: Vec<Value> = response.json().await?;
        let total = rows.len();
        let reports: Vec<Report> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<ReportRow>(row) {
                Ok(row) => row.into_report(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable report row");
                    None
                }
            })
            .collect();

        if reports.len() < total {
            tracing::warn!(
                skipped = total - reports.len(),
                total,
                "Some listed reports could not be read"
            );
        }
        Ok(reports)
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Counts from one coordinator pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    /// Entries claimed by another coordinator or already synced.
    pub skipped: usize,
}

/// Drains the submission queue against the ingestion endpoint.
pub struct SyncCoordinator {
    queue: SubmissionQueue,
    ingest: Arc<dyn IngestClient>,
    run_lock: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(queue: SubmissionQueue, ingest: Arc<dyn IngestClient>) -> Self {
        Self {
            queue,
            ingest,
            run_lock: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    /// Submit every unsynced entry, sequentially.
    ///
    /// Overlapping calls on the same coordinator run one after the other.
    /// Coordinators sharing a queue skip entries another one has claimed.
    /// Only a failure to list the queue fails the pass; per-entry storage
    /// errors are counted as failures and the pass moves on.
    pub async fn sync_pending(&self) -> Result<SyncReport> {
        let _running = self.run_lock.lock().await;
        let pending = self.queue.list_unsynced().await?;
        let mut report = SyncReport::default();

        for entry in pending {
            let context = || ErrorContext::new("sync_pending").with_record_id(entry.local_id.clone());

            let Some(_claim) = self.queue.try_claim(&entry.local_id) else {
                report.skipped += 1;
                continue;
            };

            // Another coordinator may have finished it after we listed
            match self.queue.get(&entry.local_id).await {
                Ok(Some(current)) if !current.synced => {}
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    e.log_with_context(&context());
                    continue;
                }
            }

            let created = match self.ingest.submit(&entry.payload).await {
                Ok(created) => created,
                Err(e) => {
                    report.failed += 1;
                    e.log_with_context(&context());
                    continue;
                }
            };

            match self.queue.mark_synced(&entry.local_id).await {
                Ok(MarkOutcome::Marked) => {
                    report.synced += 1;
                    tracing::info!(
                        local_id = %entry.local_id,
                        report_id = created.id.as_deref().unwrap_or("unknown"),
                        "Queued report synced"
                    );
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    e.log_with_context(&context());
                }
            }
        }

        Ok(report)
    }
}

async fn run_pass(coordinator: &SyncCoordinator, pipeline: &ReportPipeline) {
    match coordinator.sync_pending().await {
        Ok(report) => {
            if report.synced > 0 || report.failed > 0 {
                tracing::info!(
                    synced = report.synced,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Offline queue sync finished"
                );
            }
        }
        Err(e) => e.log_with_context(&ErrorContext::new("sync_pending")),
    }
    refresh(pipeline).await;
}

async fn refresh(pipeline: &ReportPipeline) {
    if let Err(e) = pipeline.refresh_reports().await {
        e.log_with_context(&ErrorContext::new("refresh_reports"));
    }
}

/// Keep the queue drained and the live report set current.
///
/// A sync pass followed by a report refresh runs at start if the channel
/// already reports online, and on every offline to online transition,
/// including one that happens while a pass is running. While online the
/// report set is also refreshed every `refresh_period`. The task ends when
/// the sender is dropped.
pub fn spawn_sync_task(
    coordinator: Arc<SyncCoordinator>,
    pipeline: Arc<ReportPipeline>,
    mut online: watch::Receiver<bool>,
    refresh_period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut refresh_timer = tokio::time::interval(refresh_period);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        refresh_timer.tick().await;

        let mut was_online = false;
        loop {
            let is_online = *online.borrow_and_update();
            let mut flapped = false;
            if is_online && !was_online {
                run_pass(&coordinator, &pipeline).await;
                refresh_timer.reset();
                // Connectivity moved during the pass; look again before trusting it
                flapped = online.has_changed().unwrap_or(false);
            }
            was_online = is_online && !flapped;

            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Connectivity channel closed, stopping sync task");
                        break;
                    }
                }
                _ = refresh_timer.tick(), if is_online => refresh(&pipeline).await,
            }
        }
    })
}

/// Periodically probe the ingestion endpoint and publish reachability.
///
/// The task stops once every receiver has been dropped.
pub fn spawn_connectivity_probe(
    ingest: Arc<dyn IngestClient>,
    period: Duration,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if tx.is_closed() {
                break;
            }

            let reachable = ingest.probe().await;
            tx.send_if_modified(|current| {
                if *current != reachable {
                    tracing::info!(online = reachable, "Connectivity changed");
                    *current = reachable;
                    true
                } else {
                    false
                }
            });
        }
    });

    (rx, handle)
}
