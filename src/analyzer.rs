//! Remote AI classification through the OpenRouter chat-completions API.
//!
//! The provider is asked for a JSON verdict. Nothing in the verdict is
//! trusted as-is: [`RemoteVerdict`] keeps every optional field optional so the
//! classifier can default and clamp each one.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TidewatchError};
use crate::models::Sentiment;

/// OpenRouter API base URL.
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

/// Default model used for classification.
pub const DEFAULT_MODEL: &str = "mistralai/mistral-7b-instruct:free";

const REPORT_PROMPT: &str = r#"You are an analyst for a coastal disaster management agency.
Decide whether the field report below describes a real ocean hazard: tsunami sightings or warnings,
coastal flooding or inundation, high waves or swell surge, coastal erosion or damage, unusual tides,
or storm surge and cyclone impacts.

The report is written in the language with code "{LANGUAGE}".

Report: "{REPORT}"

Respond ONLY with a JSON object in this format:
{"is_valid_hazard": true, "severity_score": 7, "reasoning": "short explanation in English",
 "keywords": ["extracted", "keywords"], "language": "detected language code", "confidence": 0.8}

severity_score ranges from 1 (minor) to 10 (critical emergency); confidence ranges from 0 to 1."#;

const SOCIAL_PROMPT: &str = r#"You are a social media analyst for a coastal disaster management agency.
Decide whether the post below is about a real ocean hazard (tsunami, flooding, high waves, erosion,
unusual tides) or is spam, an advertisement, or irrelevant, and classify its sentiment.

Post: "{POST}"

Respond ONLY with a JSON object in this format:
{"is_relevant": true, "sentiment": "Negative"}

sentiment is one of "Positive", "Negative" or "Neutral"."#;

/// Rate limiter type alias.
type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A remote provider able to judge hazard reports and social posts.
///
/// Implementations make exactly one request per call and never retry.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn classify_report(&self, description: &str, language: &str) -> Result<RemoteVerdict>;

    async fn classify_social(&self, content: &str) -> Result<SocialVerdict>;
}

/// OpenRouter-backed classifier.
pub struct OpenRouterAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl OpenRouterAnalyzer {
    /// Create an analyzer with a request timeout.
    ///
    /// Rate limited to 60 requests per minute by default.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Self::with_rate_limit(api_key, model, timeout, 60)
    }

    pub fn with_rate_limit(
        api_key: String,
        model: String,
        timeout: Duration,
        requests_per_minute: u32,
    ) -> Result<Self> {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: OPENROUTER_API_URL.to_string(),
            rate_limiter: Arc::new(GovRateLimiter::direct(quota)),
        })
    }

    /// Point the analyzer at a different OpenRouter-compatible host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
            temperature: 0.3,
        }
    }

    /// Send one chat request and return the assistant's text.
    async fn complete(&self, prompt: String) -> Result<String> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(prompt);

        tracing::debug!(model = %self.model, "Sending classification request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(TidewatchError::RateLimited {
                retry_after_ms: retry_after.saturating_mul(1000),
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TidewatchError::RemoteUnavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TidewatchError::MalformedResponse("no choices in response".to_string()))
    }
}

#[async_trait]
impl RemoteClassifier for OpenRouterAnalyzer {
    async fn classify_report(&self, description: &str, language: &str) -> Result<RemoteVerdict> {
        let prompt = REPORT_PROMPT
            .replace("{LANGUAGE}", language)
            .replace("{REPORT}", description);
        let text = self.complete(prompt).await?;
        RemoteVerdict::from_json(extract_json(&text))
    }

    async fn classify_social(&self, content: &str) -> Result<SocialVerdict> {
        let prompt = SOCIAL_PROMPT.replace("{POST}", content);
        let text = self.complete(prompt).await?;
        SocialVerdict::from_json(extract_json(&text))
    }
}

/// Extract JSON from text that may be wrapped in markdown code blocks or prose.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    // Models sometimes add a sentence before or after the object
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

/// Accepts JSON numbers and numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn parse_object(json: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TidewatchError::MalformedResponse(format!(
            "expected JSON object, got {}",
            other
        ))),
        Err(e) => Err(TidewatchError::MalformedResponse(format!(
            "failed to parse verdict: {}",
            e
        ))),
    }
}

/// Verdict fields as the provider sent them, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVerdict {
    pub is_valid_hazard: bool,
    pub severity_score: Option<f64>,
    pub reasoning: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
}

impl RemoteVerdict {
    /// Parse a verdict. Only `is_valid_hazard` is required.
    pub fn from_json(json: &str) -> Result<Self> {
        let map = parse_object(json)?;

        let is_valid_hazard = match map.get("is_valid_hazard") {
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(TidewatchError::MalformedResponse(format!(
                    "is_valid_hazard is not a boolean: {}",
                    other
                )))
            }
            None => {
                return Err(TidewatchError::MalformedResponse(
                    "missing is_valid_hazard".to_string(),
                ))
            }
        };

        let keywords = match map.get("keywords") {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        };

        let non_empty_str = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            is_valid_hazard,
            severity_score: map.get("severity_score").and_then(as_number),
            reasoning: non_empty_str("reasoning"),
            keywords,
            language: non_empty_str("language"),
            confidence: map.get("confidence").and_then(as_number),
        })
    }
}

/// Relevance verdict for a social post.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialVerdict {
    pub is_relevant: bool,
    pub sentiment: Sentiment,
}

impl SocialVerdict {
    pub fn from_json(json: &str) -> Result<Self> {
        let map = parse_object(json)?;

        let is_relevant = map
            .get("is_relevant")
            .and_then(Value::as_bool)
            .ok_or_else(|| TidewatchError::MalformedResponse("missing is_relevant".to_string()))?;

        let sentiment = match map
            .get("sentiment")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("positive") => Sentiment::Positive,
            Some("negative") => Sentiment::Negative,
            _ => Sentiment::Neutral,
        };

        Ok(Self {
            is_relevant,
            sentiment,
        })
    }
}

// ============================================================================
// OpenRouter API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}
