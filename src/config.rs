//! Configuration loading from environment.
//!
//! Every setting has a default except the provider key, whose absence turns
//! the classifier into keyword-only mode. Values that are present but do not
//! parse are rejected rather than silently replaced by the default.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::DEFAULT_MODEL;
use crate::classifier::DEFAULT_REMOTE_TIMEOUT;
use crate::cluster::DEFAULT_RADIUS_KM;
use crate::error::{Result, TidewatchError};

pub const DEFAULT_INGEST_URL: &str = "http://localhost:3000";
pub const DEFAULT_QUEUE_DB_PATH: &str = "tidewatch-queue.db";
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_PROBE_SECS: u64 = 30;
pub const DEFAULT_REFRESH_SECS: u64 = 60;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Main configuration for the Tidewatch service.
#[derive(Debug, Clone)]
pub struct TidewatchConfig {
    /// OpenRouter API key. `None` disables remote classification.
    pub openrouter_api_key: Option<String>,
    pub classifier_model: String,
    /// Upper bound on a single remote classification call.
    pub classifier_timeout: Duration,
    pub classifier_requests_per_minute: u32,
    /// Base URL of the report ingestion endpoint.
    pub ingest_url: String,
    pub queue_db_path: PathBuf,
    pub cluster_radius_km: f64,
    /// Quiet window before hotspots are recomputed.
    pub hotspot_debounce: Duration,
    pub connectivity_probe_interval: Duration,
    /// How often the live report set is pulled from the server while online.
    pub report_refresh_interval: Duration,
    pub health_port: u16,
}

impl TidewatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `OPENROUTER_API_KEY`: provider key (unset: keyword-only)
    /// - `CLASSIFIER_MODEL`: provider model id
    /// - `CLASSIFIER_TIMEOUT_SECS`: remote call timeout (default: 15)
    /// - `CLASSIFIER_REQUESTS_PER_MINUTE`: client-side rate limit (default: 60)
    /// - `INGEST_URL`: ingestion endpoint base URL
    /// - `QUEUE_DB_PATH`: SQLite file for the offline queue
    /// - `CLUSTER_RADIUS_KM`: clustering proximity threshold (default: 5.0)
    /// - `HOTSPOT_DEBOUNCE_MS`: recompute quiet window (default: 1000)
    /// - `CONNECTIVITY_PROBE_SECS`: probe period (default: 30)
    /// - `REPORT_REFRESH_SECS`: report listing refresh period (default: 60)
    /// - `HEALTH_PORT`: health server port (default: 8080)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let classifier_timeout_secs: u64 = parse_or(
            &var,
            "CLASSIFIER_TIMEOUT_SECS",
            DEFAULT_REMOTE_TIMEOUT.as_secs(),
        )?;
        if classifier_timeout_secs == 0 {
            return Err(TidewatchError::Config(
                "CLASSIFIER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let classifier_requests_per_minute: u32 =
            parse_or(&var, "CLASSIFIER_REQUESTS_PER_MINUTE", DEFAULT_REQUESTS_PER_MINUTE)?;
        if classifier_requests_per_minute == 0 {
            return Err(TidewatchError::Config(
                "CLASSIFIER_REQUESTS_PER_MINUTE must be greater than zero".to_string(),
            ));
        }

        let cluster_radius_km: f64 = parse_or(&var, "CLUSTER_RADIUS_KM", DEFAULT_RADIUS_KM)?;
        if !cluster_radius_km.is_finite() || cluster_radius_km <= 0.0 {
            return Err(TidewatchError::Config(format!(
                "CLUSTER_RADIUS_KM must be a positive number, got {}",
                cluster_radius_km
            )));
        }

        let debounce_ms: u64 = parse_or(&var, "HOTSPOT_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?;
        if debounce_ms == 0 {
            return Err(TidewatchError::Config(
                "HOTSPOT_DEBOUNCE_MS must be greater than zero".to_string(),
            ));
        }

        let probe_secs: u64 = parse_or(&var, "CONNECTIVITY_PROBE_SECS", DEFAULT_PROBE_SECS)?;
        if probe_secs == 0 {
            return Err(TidewatchError::Config(
                "CONNECTIVITY_PROBE_SECS must be greater than zero".to_string(),
            ));
        }

        let refresh_secs: u64 = parse_or(&var, "REPORT_REFRESH_SECS", DEFAULT_REFRESH_SECS)?;
        if refresh_secs == 0 {
            return Err(TidewatchError::Config(
                "REPORT_REFRESH_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            classifier_model: var("CLASSIFIER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            classifier_timeout: Duration::from_secs(classifier_timeout_secs),
            classifier_requests_per_minute,
            ingest_url: var("INGEST_URL").unwrap_or_else(|| DEFAULT_INGEST_URL.to_string()),
            queue_db_path: var("QUEUE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_DB_PATH)),
            cluster_radius_km,
            hotspot_debounce: Duration::from_millis(debounce_ms),
            connectivity_probe_interval: Duration::from_secs(probe_secs),
            report_refresh_interval: Duration::from_secs(refresh_secs),
            health_port: parse_or(&var, "HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
        })
    }
}

/// Parse a variable if present, otherwise return the default.
fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| TidewatchError::Config(format!("invalid {}={:?}: {}", name, raw, e))),
        None => Ok(default),
    }
}
