//! Hazard classification engine.
//!
//! Keyword scoring runs first and is always available. One remote request is
//! then attempted; any failure, including timeout, falls back to the keyword
//! result. There is no retry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::analyzer::{RemoteClassifier, RemoteVerdict};
use crate::lexicon::{KeywordMatch, KeywordScorer};
use crate::models::{ClassificationResult, HazardType, Sentiment, SocialClassification};

/// Descriptions shorter than this (after trimming) are not analyzed.
pub const MIN_DESCRIPTION_LEN: usize = 10;

/// Default bound on the remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Confidence reported for keyword-only results.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Confidence assumed when the provider omits one.
pub const DEFAULT_REMOTE_CONFIDENCE: f32 = 0.7;

pub const FALLBACK_REASONING: &str = "AI analysis failed, using keyword-based assessment.";

const TOO_SHORT_REASONING: &str =
    "No description provided or description too short for analysis.";

const DEFAULT_REMOTE_REASONING: &str = "AI analysis completed";

/// Combines keyword scoring with an optional remote classifier.
pub struct HazardClassifier {
    scorer: KeywordScorer,
    remote: Option<Arc<dyn RemoteClassifier>>,
    timeout: Duration,
}

impl HazardClassifier {
    pub fn new(scorer: KeywordScorer, remote: Option<Arc<dyn RemoteClassifier>>) -> Self {
        Self {
            scorer,
            remote,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Classifier that never calls a remote provider.
    pub fn keyword_only(scorer: KeywordScorer) -> Self {
        Self::new(scorer, None)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scorer(&self) -> &KeywordScorer {
        &self.scorer
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Classify a report description.
    ///
    /// Never fails: remote problems degrade to the keyword assessment.
    pub async fn classify(&self, description: Option<&str>, language: &str) -> ClassificationResult {
        let text = description.map(str::trim).unwrap_or_default();
        if text.chars().count() < MIN_DESCRIPTION_LEN {
            return ClassificationResult {
                is_valid_hazard: false,
                severity_score: 1,
                reasoning: TOO_SHORT_REASONING.to_string(),
                keywords: BTreeSet::new(),
                language: language.to_string(),
                confidence: 0.0,
            };
        }

        let local = self.scorer.score(text, language);

        let Some(remote) = &self.remote else {
            tracing::debug!(severity = local.severity, "No remote classifier configured");
            return fallback(local, language);
        };

        match tokio::time::timeout(self.timeout, remote.classify_report(text, language)).await {
            Ok(Ok(verdict)) => normalize(verdict, local, language),
            Ok(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    keyword_severity = local.severity,
                    "Remote classification failed, using keyword assessment"
                );
                fallback(local, language)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    keyword_severity = local.severity,
                    "Remote classification timed out, using keyword assessment"
                );
                fallback(local, language)
            }
        }
    }

    /// Cheap keyword-only triage for social content. Never calls the remote provider.
    pub fn classify_social_post(&self, text: &str, language: &str) -> SocialClassification {
        let KeywordMatch { keywords, severity } = self.scorer.score(text, language);

        let hazard_type_guess = if severity > 5 {
            Some(HazardType::HighWaves)
        } else if severity > 3 {
            Some(HazardType::UnusualTide)
        } else {
            None
        };

        let sentiment = if severity > 6 {
            Sentiment::Negative
        } else if severity > 3 {
            Sentiment::Neutral
        } else {
            Sentiment::Positive
        };

        SocialClassification {
            is_relevant: severity > 2,
            hazard_type_guess,
            sentiment,
            confidence: (f32::from(severity) / 10.0).min(1.0),
            keywords,
        }
    }
}

fn fallback(local: KeywordMatch, language: &str) -> ClassificationResult {
    ClassificationResult {
        is_valid_hazard: local.severity > 3,
        severity_score: local.severity,
        reasoning: FALLBACK_REASONING.to_string(),
        keywords: local.keywords,
        language: language.to_string(),
        confidence: FALLBACK_CONFIDENCE,
    }
}

/// Clamp and default every field of a remote verdict.
fn normalize(verdict: RemoteVerdict, local: KeywordMatch, language: &str) -> ClassificationResult {
    // A zero severity carries no information; use the keyword floor instead
    let severity = verdict
        .severity_score
        .filter(|s| *s != 0.0)
        .unwrap_or(f64::from(local.severity))
        .round()
        .clamp(1.0, 10.0) as u8;

    let confidence = verdict
        .confidence
        .map(|c| c as f32)
        .unwrap_or(DEFAULT_REMOTE_CONFIDENCE)
        .clamp(0.0, 1.0);

    ClassificationResult {
        is_valid_hazard: verdict.is_valid_hazard,
        severity_score: severity,
        reasoning: verdict
            .reasoning
            .unwrap_or_else(|| DEFAULT_REMOTE_REASONING.to_string()),
        keywords: verdict
            .keywords
            .map(|k| k.into_iter().collect())
            .unwrap_or(local.keywords),
        language: verdict.language.unwrap_or_else(|| language.to_string()),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::analyzer::{RemoteClassifier, RemoteVerdict, SocialVerdict};
    use crate::classifier::{HazardClassifier, FALLBACK_REASONING};
    use crate::error::{Result, TidewatchError};
    use crate::lexicon::KeywordScorer;
    use crate::models::{HazardType, Sentiment};

    enum Behaviour {
        Fail,
        Hang,
        Answer(RemoteVerdict),
    }

    struct StubRemote {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl StubRemote {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteClassifier for StubRemote {
        async fn classify_report(&self, _description: &str, _language: &str) -> Result<RemoteVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Fail => Err(TidewatchError::RemoteUnavailable("HTTP 503".to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(TidewatchError::RemoteUnavailable("unreachable".to_string()))
                }
                Behaviour::Answer(v) => Ok(v.clone()),
            }
        }

        async fn classify_social(&self, _content: &str) -> Result<SocialVerdict> {
            Err(TidewatchError::RemoteUnavailable("not used".to_string()))
        }
    }

    fn classifier_with(remote: Arc<StubRemote>) -> HazardClassifier {
        HazardClassifier::new(KeywordScorer::new().expect("lexicon"), Some(remote))
            .with_timeout(Duration::from_secs(2))
    }

    fn verdict() -> RemoteVerdict {
        RemoteVerdict {
            is_valid_hazard: true,
            severity_score: Some(6.0),
            reasoning: Some("Waves reported breaching sea wall".to_string()),
            keywords: Some(vec!["sea wall".to_string()]),
            language: Some("en".to_string()),
            confidence: Some(0.85),
        }
    }

    #[tokio::test]
    async fn empty_description_skips_remote() {
        let remote = StubRemote::new(Behaviour::Answer(verdict()));
        let classifier = classifier_with(remote.clone());

        let result = classifier.classify(Some(""), "en").await;

        assert!(!result.is_valid_hazard);
        assert_eq!(result.severity_score, 1);
        assert_eq!(result.confidence, 0.0);
        assert!(result.keywords.is_empty());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_or_short_description_skips_remote() {
        let remote = StubRemote::new(Behaviour::Answer(verdict()));
        let classifier = classifier_with(remote.clone());

        assert!(!classifier.classify(None, "en").await.is_valid_hazard);
        assert!(!classifier.classify(Some("  tsunami  "), "en").await.is_valid_hazard);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_keywords() {
        let remote = StubRemote::new(Behaviour::Fail);
        let classifier = classifier_with(remote.clone());

        let result = classifier
            .classify(Some("URGENT tsunami warning near the coast"), "en")
            .await;

        assert_eq!(result.severity_score, 8);
        assert!(result.is_valid_hazard);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.reasoning, FALLBACK_REASONING);
        assert!(result.keywords.contains("tsunami"));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn weak_keywords_fall_back_to_invalid() {
        let remote = StubRemote::new(Behaviour::Fail);
        let classifier = classifier_with(remote);

        let result = classifier
            .classify(Some("The tide looks a bit odd today"), "en")
            .await;

        assert_eq!(result.severity_score, 3);
        assert!(!result.is_valid_hazard);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_timeout_falls_back_once() {
        let remote = StubRemote::new(Behaviour::Hang);
        let classifier = classifier_with(remote.clone());

        let result = classifier
            .classify(Some("Flood water entering homes near the jetty"), "en")
            .await;

        assert_eq!(result.severity_score, 5);
        assert!(result.is_valid_hazard);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keyword_only_classifier() {
        let classifier = HazardClassifier::keyword_only(KeywordScorer::new().expect("lexicon"));
        assert!(!classifier.has_remote());

        let result = classifier
            .classify(Some("Please evacuate the beach now"), "en")
            .await;
        assert_eq!(result.severity_score, 8);
        assert_eq!(result.reasoning, FALLBACK_REASONING);
    }

    #[tokio::test]
    async fn remote_verdict_is_used() {
        let remote = StubRemote::new(Behaviour::Answer(verdict()));
        let classifier = classifier_with(remote);

        let result = classifier
            .classify(Some("Waves coming over the sea wall at high tide"), "en")
            .await;

        assert!(result.is_valid_hazard);
        assert_eq!(result.severity_score, 6);
        assert_eq!(result.confidence, 0.85);
        assert!(result.keywords.contains("sea wall"));
    }

    #[tokio::test]
    async fn remote_out_of_range_values_are_clamped() {
        let mut v = verdict();
        v.severity_score = Some(42.0);
        v.confidence = Some(-3.0);
        let classifier = classifier_with(StubRemote::new(Behaviour::Answer(v)));

        let result = classifier
            .classify(Some("Waves coming over the sea wall at high tide"), "en")
            .await;

        assert_eq!(result.severity_score, 10);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn remote_missing_fields_are_defaulted() {
        let v = RemoteVerdict {
            is_valid_hazard: true,
            severity_score: None,
            reasoning: None,
            keywords: None,
            language: None,
            confidence: None,
        };
        let classifier = classifier_with(StubRemote::new(Behaviour::Answer(v)));

        let result = classifier
            .classify(Some("चक्रवात के बाद बाढ़ का पानी"), "hi")
            .await;

        // keyword floor for बाढ़
        assert_eq!(result.severity_score, 5);
        assert_eq!(result.language, "hi");
        assert!(result.keywords.contains("बाढ़"));
        assert_eq!(result.confidence, 0.7);
        assert!(!result.reasoning.is_empty());
    }

    #[test]
    fn social_post_triage_high() {
        let classifier = HazardClassifier::keyword_only(KeywordScorer::new().expect("lexicon"));
        let result = classifier.classify_social_post(
            "Just got a tsunami alert on my phone, moving inland #Tsunami",
            "en",
        );

        assert!(result.is_relevant);
        assert_eq!(result.hazard_type_guess, Some(HazardType::HighWaves));
        assert_eq!(result.sentiment, Sentiment::Negative);
        assert!((result.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn social_post_triage_medium() {
        let classifier = HazardClassifier::keyword_only(KeywordScorer::new().expect("lexicon"));
        let result =
            classifier.classify_social_post("Reports of #CoastalFlooding in low-lying areas", "en");

        assert!(result.is_relevant);
        assert_eq!(result.hazard_type_guess, Some(HazardType::UnusualTide));
        assert_eq!(result.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn social_post_triage_spam() {
        let classifier = HazardClassifier::keyword_only(KeywordScorer::new().expect("lexicon"));
        let result =
            classifier.classify_social_post("Check out this great new crypto! Book now!", "en");

        assert!(!result.is_relevant);
        assert_eq!(result.hazard_type_guess, None);
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert!((result.confidence - 0.1).abs() < f32::EPSILON);
    }
}

#[cfg(test)]
mod property_tests {
    use crate::analyzer::RemoteVerdict;
    use crate::classifier::normalize;
    use crate::lexicon::KeywordScorer;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Normalized verdicts always stay in range, whatever the provider sent.
        #[test]
        fn prop_normalized_verdict_in_range(
            valid in any::<bool>(),
            severity in proptest::option::of(-1.0e6f64..1.0e6),
            confidence in proptest::option::of(-100.0f64..100.0),
            text in "[a-z ]{0,60}",
        ) {
            let scorer = KeywordScorer::new().expect("lexicon");
            let local = scorer.score(&text, "en");
            let verdict = RemoteVerdict {
                is_valid_hazard: valid,
                severity_score: severity,
                reasoning: None,
                keywords: None,
                language: None,
                confidence,
            };

            let result = normalize(verdict, local, "en");

            prop_assert!((1..=10).contains(&result.severity_score));
            prop_assert!((0.0..=1.0).contains(&result.confidence));
            prop_assert_eq!(result.is_valid_hazard, valid);
        }
    }
}
