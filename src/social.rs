//! Batch relevance analysis for social media posts.
//!
//! Posts are triaged with the keyword scorer first; only posts that look
//! relevant cost a remote call. A batch covers at most
//! [`SOCIAL_BATCH_LIMIT`] posts that have not been analyzed before.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::analyzer::{RemoteClassifier, SocialVerdict};
use crate::classifier::{HazardClassifier, DEFAULT_REMOTE_TIMEOUT};
use crate::error::{ErrorContext, TidewatchError};
use crate::models::{AnalyzedPost, Sentiment, SocialPost};

/// Maximum posts analyzed per batch.
pub const SOCIAL_BATCH_LIMIT: usize = 5;

pub struct SocialAnalyzer {
    classifier: Arc<HazardClassifier>,
    remote: Option<Arc<dyn RemoteClassifier>>,
    timeout: Duration,
    analyzed: DashMap<String, AnalyzedPost>,
}

impl SocialAnalyzer {
    pub fn new(
        classifier: Arc<HazardClassifier>,
        remote: Option<Arc<dyn RemoteClassifier>>,
    ) -> Self {
        Self {
            classifier,
            remote,
            timeout: DEFAULT_REMOTE_TIMEOUT,
            analyzed: DashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Previously computed result for a post.
    pub fn result(&self, post_id: &str) -> Option<AnalyzedPost> {
        self.analyzed.get(post_id).map(|entry| entry.value().clone())
    }

    pub fn analyzed_count(&self) -> usize {
        self.analyzed.len()
    }

    /// Analyze up to [`SOCIAL_BATCH_LIMIT`] posts not seen before, in input order.
    pub async fn analyze_batch(&self, posts: &[SocialPost]) -> Vec<AnalyzedPost> {
        let pending: Vec<&SocialPost> = posts
            .iter()
            .filter(|post| !self.analyzed.contains_key(&post.id))
            .take(SOCIAL_BATCH_LIMIT)
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for post in pending {
            let result = self.analyze_post(post).await;
            self.analyzed.insert(post.id.clone(), result.clone());
            results.push(result);
        }

        let relevant = results.iter().filter(|r| r.is_relevant).count();
        tracing::info!(
            analyzed = results.len(),
            relevant,
            "Social batch analyzed"
        );
        results
    }

    async fn analyze_post(&self, post: &SocialPost) -> AnalyzedPost {
        let triage = self
            .classifier
            .classify_social_post(&post.content, &post.language);

        let remote = match &self.remote {
            Some(remote) if triage.is_relevant => remote,
            _ => {
                return AnalyzedPost {
                    post_id: post.id.clone(),
                    is_relevant: triage.is_relevant,
                    sentiment: triage.sentiment,
                    triage,
                    remote_checked: false,
                };
            }
        };

        let verdict = match tokio::time::timeout(self.timeout, remote.classify_social(&post.content))
            .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                e.log_with_context(
                    &ErrorContext::new("classify_social").with_record_id(post.id.clone()),
                );
                conservative_default()
            }
            Err(_) => {
                TidewatchError::RemoteUnavailable(format!(
                    "social classification timed out after {:?}",
                    self.timeout
                ))
                .log_with_context(
                    &ErrorContext::new("classify_social").with_record_id(post.id.clone()),
                );
                conservative_default()
            }
        };

        AnalyzedPost {
            post_id: post.id.clone(),
            is_relevant: verdict.is_relevant,
            sentiment: verdict.sentiment,
            triage,
            remote_checked: true,
        }
    }
}

fn conservative_default() -> SocialVerdict {
    SocialVerdict {
        is_relevant: false,
        sentiment: Sentiment::Neutral,
    }
}
