//! Core data models for Tidewatch.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TidewatchError};

/// Kind of ocean hazard a field user reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HazardType {
    HighWaves,
    TsunamiSighting,
    CoastalFlooding,
    CoastalErosion,
    UnusualTide,
    Other,
}

impl HazardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighWaves => "high-waves",
            Self::TsunamiSighting => "tsunami-sighting",
            Self::CoastalFlooding => "coastal-flooding",
            Self::CoastalErosion => "coastal-erosion",
            Self::UnusualTide => "unusual-tide",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for HazardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// A geotagged hazard report.
///
/// Location and hazard type are fixed at creation. Severity and status only
/// change through [`Report::with_classification`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hazard_type: HazardType,
    pub description: Option<String>,
    pub severity_score: Option<u8>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub language: String,
}

impl Report {
    /// Build a pending report from a submission payload and a server-assigned id.
    pub fn from_payload(id: impl Into<String>, payload: &ReportPayload) -> Self {
        Self {
            id: id.into(),
            latitude: payload.latitude,
            longitude: payload.longitude,
            hazard_type: payload.hazard_type,
            description: payload.description.clone(),
            severity_score: Some(payload.severity.clamp(1, 10)),
            status: ReportStatus::Pending,
            created_at: Utc::now(),
            language: payload.language.clone(),
        }
    }

    /// Returns a copy with the classification outcome applied.
    ///
    /// Valid hazards become verified with the classifier's severity; anything
    /// else is rejected and keeps its submitted severity.
    pub fn with_classification(&self, result: &ClassificationResult) -> Self {
        let mut next = self.clone();
        if result.is_valid_hazard {
            next.severity_score = Some(result.severity_score);
            next.status = ReportStatus::Verified;
        } else {
            next.status = ReportStatus::Rejected;
        }
        next
    }
}

/// Fields accepted by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub hazard_type: HazardType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Submitter's own severity estimate.
    pub severity: u8,
    pub language: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ReportPayload {
    /// Reject payloads without a usable location.
    ///
    /// The hazard type is enforced by the type system; an unknown hazard string
    /// never deserializes into a payload in the first place.
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(TidewatchError::Validation(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(TidewatchError::Validation(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Normalized classifier verdict for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_valid_hazard: bool,
    /// Always within 1..=10.
    pub severity_score: u8,
    pub reasoning: String,
    pub keywords: BTreeSet<String>,
    pub language: String,
    /// Always within 0.0..=1.0.
    pub confidence: f32,
}

/// Coarse tone of a social post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Cheap keyword-only triage result for social content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialClassification {
    pub is_relevant: bool,
    pub hazard_type_guess: Option<HazardType>,
    pub sentiment: Sentiment,
    pub confidence: f32,
    pub keywords: BTreeSet<String>,
}

/// A social media post awaiting relevance analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: String,
    pub username: String,
    pub content: String,
    pub language: String,
    pub posted_at: DateTime<Utc>,
}

/// Result of batch social analysis for one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedPost {
    pub post_id: String,
    pub is_relevant: bool,
    pub sentiment: Sentiment,
    pub triage: SocialClassification,
    /// Whether the remote provider was consulted.
    pub remote_checked: bool,
}

/// A report held in the local offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub local_id: String,
    pub payload: ReportPayload,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

/// Sync lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Queued,
    Submitting,
    Synced,
}

/// A derived geographic cluster of at least three reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 0..=10.
    pub intensity: u8,
    /// Rendering hint in degrees.
    pub radius: f64,
    pub report_count: usize,
    pub avg_severity: f64,
    pub hazard_types: BTreeSet<HazardType>,
    pub report_ids: Vec<String>,
    pub last_updated: DateTime<Utc>,
}
