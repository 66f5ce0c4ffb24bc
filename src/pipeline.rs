//! Report pipeline orchestration.
//!
//! Two entry points:
//! - [`ReportPipeline::submit`] is the submission boundary. It validates a
//!   payload, then posts it when online or parks it in the offline queue.
//! - [`ReportPipeline::accept`] takes a report created by the ingestion side
//!   and hands it to the [`ClassificationSupervisor`], which classifies it in
//!   a supervised task and swaps the result into the live [`ReportSet`].
//! - [`ReportPipeline::refresh_reports`] pulls the server's report listing
//!   into the set and schedules classification for pending reports it has
//!   not seen before.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::classifier::HazardClassifier;
use crate::error::{ErrorContext, Result, TidewatchError};
use crate::hotspots::ReportSet;
use crate::models::{ClassificationResult, Report, ReportPayload, ReportStatus};
use crate::queue::SubmissionQueue;
use crate::sync::IngestClient;

/// Where a submitted report ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionReceipt {
    /// Accepted by the ingestion endpoint.
    Submitted { report_id: Option<String> },
    /// Stored locally for the sync coordinator.
    Queued { local_id: String },
}

/// Outcome of one supervised classification task.
#[derive(Debug, Clone)]
pub struct ClassifiedReport {
    pub report_id: String,
    pub result: ClassificationResult,
    /// False if the report left the set before the result arrived.
    pub applied: bool,
}

/// Counts from one report refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Reports the server listed.
    pub total: usize,
    /// Newly seen pending reports sent for classification.
    pub scheduled: usize,
}

/// Totals reported when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub verified: usize,
    pub rejected: usize,
    pub discarded: usize,
    pub failed: usize,
}

pub struct ReportPipeline {
    queue: SubmissionQueue,
    ingest: Arc<dyn IngestClient>,
    reports: Arc<ReportSet>,
    jobs: mpsc::UnboundedSender<Report>,
}

impl ReportPipeline {
    /// Build the pipeline and the supervisor that runs its classification tasks.
    pub fn new(
        queue: SubmissionQueue,
        ingest: Arc<dyn IngestClient>,
        classifier: Arc<HazardClassifier>,
        reports: Arc<ReportSet>,
    ) -> (Self, ClassificationSupervisor) {
        let (jobs, pending) = mpsc::unbounded_channel();
        let supervisor = ClassificationSupervisor {
            classifier,
            reports: Arc::clone(&reports),
            pending,
            tasks: JoinSet::new(),
            stats: SupervisorStats::default(),
        };
        let pipeline = Self {
            queue,
            ingest,
            reports,
            jobs,
        };
        (pipeline, supervisor)
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    /// Submit a report from the field.
    ///
    /// Online, the payload is posted once; a transport or server failure
    /// falls back to the offline queue. Offline, it is queued directly.
    /// Validation and storage errors are returned to the caller.
    pub async fn submit(&self, payload: ReportPayload, online: bool) -> Result<SubmissionReceipt> {
        payload.validate()?;

        if online {
            match self.ingest.submit(&payload).await {
                Ok(created) => {
                    tracing::info!(
                        report_id = created.id.as_deref().unwrap_or("unknown"),
                        hazard_type = %payload.hazard_type,
                        "Report submitted"
                    );
                    return Ok(SubmissionReceipt::Submitted {
                        report_id: created.id,
                    });
                }
                Err(e) if e.is_degradable() => {
                    tracing::warn!(error = %e, "Submission failed, queueing report offline");
                }
                Err(e) => return Err(e),
            }
        }

        let local_id = self.queue.enqueue(payload).await?;
        Ok(SubmissionReceipt::Queued { local_id })
    }

    /// Add a newly created report to the live set and schedule its classification.
    pub async fn accept(&self, report: Report) -> Result<()> {
        if report.status != ReportStatus::Pending {
            return Err(TidewatchError::Validation(format!(
                "report {} is not pending",
                report.id
            )));
        }

        self.reports.upsert(report.clone()).await;
        self.schedule(report).await
    }

    /// Merge the server's report listing into the live set.
    ///
    /// Pending reports the set had not seen are classified like accepted
    /// ones. Reports the server no longer lists leave the set.
    pub async fn refresh_reports(&self) -> Result<RefreshSummary> {
        let fetched = self.ingest.fetch_reports().await?;
        let total = fetched.len();
        let unseen = self.reports.refresh(fetched).await;

        let mut summary = RefreshSummary {
            total,
            scheduled: 0,
        };
        for report in unseen {
            self.schedule(report).await?;
            summary.scheduled += 1;
        }

        tracing::debug!(
            total = summary.total,
            scheduled = summary.scheduled,
            "Report set refreshed"
        );
        Ok(summary)
    }

    /// Hand a report already in the set to the supervisor.
    ///
    /// If the supervisor has stopped the report is taken out of the set
    /// again, so it cannot sit there pending with nothing to classify it.
    async fn schedule(&self, report: Report) -> Result<()> {
        let report_id = report.id.clone();
        if self.jobs.send(report).is_err() {
            self.reports.remove(&report_id).await;
            return Err(TidewatchError::InternalState(format!(
                "classification supervisor stopped before report {} was scheduled",
                report_id
            )));
        }
        Ok(())
    }
}

/// Owns every in-flight classification task and observes its completion.
pub struct ClassificationSupervisor {
    classifier: Arc<HazardClassifier>,
    reports: Arc<ReportSet>,
    pending: mpsc::UnboundedReceiver<Report>,
    tasks: JoinSet<ClassifiedReport>,
    stats: SupervisorStats,
}

impl ClassificationSupervisor {
    /// Run until the pipeline is dropped and every task has finished.
    pub async fn supervise(mut self) -> SupervisorStats {
        let mut accepting = true;
        loop {
            tokio::select! {
                job = self.pending.recv(), if accepting => match job {
                    Some(report) => self.spawn(report),
                    None => accepting = false,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.record(joined);
                }
                else => break,
            }
        }

        tracing::info!(
            verified = self.stats.verified,
            rejected = self.stats.rejected,
            failed = self.stats.failed,
            "Classification supervisor stopped"
        );
        self.stats
    }

    fn spawn(&mut self, report: Report) {
        let classifier = Arc::clone(&self.classifier);
        let reports = Arc::clone(&self.reports);

        self.tasks.spawn(async move {
            let result = classifier
                .classify(report.description.as_deref(), &report.language)
                .await;
            let applied = reports
                .apply_classification(&report.id, &result)
                .await
                .is_some();
            ClassifiedReport {
                report_id: report.id,
                result,
                applied,
            }
        });
    }

    fn record(&mut self, joined: std::result::Result<ClassifiedReport, tokio::task::JoinError>) {
        match joined {
            Ok(done) if !done.applied => {
                self.stats.discarded += 1;
                tracing::debug!(report_id = %done.report_id, "Report gone before classification finished");
            }
            Ok(done) => {
                if done.result.is_valid_hazard {
                    self.stats.verified += 1;
                } else {
                    self.stats.rejected += 1;
                }
                tracing::info!(
                    report_id = %done.report_id,
                    valid = done.result.is_valid_hazard,
                    severity = done.result.severity_score,
                    confidence = done.result.confidence,
                    "Report classified"
                );
            }
            Err(e) => {
                self.stats.failed += 1;
                TidewatchError::InternalState(format!("classification task failed: {}", e))
                    .log_with_context(&ErrorContext::new("classify_report"));
            }
        }
    }
}
