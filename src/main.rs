//! Tidewatch service entry point.
//!
//! Wires the hazard classifier, the offline submission queue and its sync
//! coordinator, and the debounced hotspot engine, then serves health,
//! hotspot reads and social analysis until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidewatch::analyzer::{OpenRouterAnalyzer, RemoteClassifier};
use tidewatch::classifier::HazardClassifier;
use tidewatch::cluster::ClusterConfig;
use tidewatch::config::TidewatchConfig;
use tidewatch::error::{Result, TidewatchError};
use tidewatch::health::{spawn_health_server, AppState};
use tidewatch::hotspots::{spawn_hotspot_task, ReportSet};
use tidewatch::lexicon::KeywordScorer;
use tidewatch::pipeline::ReportPipeline;
use tidewatch::publisher::HotspotPublisher;
use tidewatch::queue::SubmissionQueue;
use tidewatch::social::SocialAnalyzer;
use tidewatch::store::SqliteQueueStore;
use tidewatch::sync::{
    spawn_connectivity_probe, spawn_sync_task, HttpIngestClient, IngestClient, SyncCoordinator,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default info level
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Tidewatch starting...");

    let config = TidewatchConfig::from_env()?;
    tracing::info!("Configuration loaded");

    // Durable offline queue
    let db_path = config.queue_db_path.to_string_lossy().into_owned();
    let store = Arc::new(SqliteQueueStore::open(&db_path).await?);
    tracing::info!(path = %db_path, "Queue store initialized");
    let queue = SubmissionQueue::new(store.clone());

    let pending = queue.list_unsynced().await?.len();
    if pending > 0 {
        tracing::info!(pending, "Unsynced reports waiting in the offline queue");
    }

    // Classification
    let scorer = KeywordScorer::new()?;
    let remote: Option<Arc<dyn RemoteClassifier>> = match &config.openrouter_api_key {
        Some(key) => {
            let analyzer = OpenRouterAnalyzer::with_rate_limit(
                key.clone(),
                config.classifier_model.clone(),
                config.classifier_timeout,
                config.classifier_requests_per_minute,
            )?;
            tracing::info!(model = %analyzer.model(), "Remote classifier initialized");
            Some(Arc::new(analyzer))
        }
        None => {
            tracing::warn!("OPENROUTER_API_KEY not set, classification is keyword-only");
            None
        }
    };
    let classifier = Arc::new(
        HazardClassifier::new(scorer, remote.clone()).with_timeout(config.classifier_timeout),
    );
    let social = Arc::new(
        SocialAnalyzer::new(classifier.clone(), remote).with_timeout(config.classifier_timeout),
    );

    // Hotspots
    let reports = Arc::new(ReportSet::new());
    let publisher = Arc::new(HotspotPublisher::new());
    let cluster_config = ClusterConfig::default().with_radius_km(config.cluster_radius_km);
    let hotspot_task = spawn_hotspot_task(
        reports.clone(),
        publisher.clone(),
        cluster_config,
        config.hotspot_debounce,
    );
    tracing::info!(
        radius_km = config.cluster_radius_km,
        debounce_ms = config.hotspot_debounce.as_millis() as u64,
        "Hotspot engine initialized"
    );

    // Submission and sync
    let ingest: Arc<dyn IngestClient> = Arc::new(HttpIngestClient::new(
        config.ingest_url.clone(),
        config.classifier_timeout,
    )?);
    let (pipeline, supervisor) =
        ReportPipeline::new(queue.clone(), ingest.clone(), classifier, reports);
    let pipeline = Arc::new(pipeline);
    let supervisor_task = tokio::spawn(supervisor.supervise());

    let coordinator = Arc::new(SyncCoordinator::new(queue, ingest.clone()));
    let (online, probe_task) =
        spawn_connectivity_probe(ingest, config.connectivity_probe_interval);
    let sync_task = spawn_sync_task(
        coordinator,
        pipeline.clone(),
        online,
        config.report_refresh_interval,
    );
    tracing::info!(
        ingest_url = %config.ingest_url,
        refresh_secs = config.report_refresh_interval.as_secs(),
        "Sync coordinator started"
    );

    let health_task = spawn_health_server(config.health_port, AppState { publisher, social });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| TidewatchError::InternalState(format!("signal handler failed: {}", e)))?;
    tracing::info!("Shutdown requested");

    probe_task.abort();
    sync_task.abort();
    hotspot_task.abort();
    health_task.abort();

    // Let in-flight classifications finish once every pipeline handle is gone
    let _ = sync_task.await;
    drop(pipeline);
    match supervisor_task.await {
        Ok(stats) => tracing::info!(
            verified = stats.verified,
            rejected = stats.rejected,
            "Classification supervisor drained"
        ),
        Err(e) => tracing::error!(error = %e, "Classification supervisor panicked"),
    }

    store.close().await;
    tracing::info!("Tidewatch stopped");
    Ok(())
}
