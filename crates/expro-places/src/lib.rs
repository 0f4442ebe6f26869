//! Google Place Details client: fetches and normalizes customer reviews.
//!
//! This is the only component that talks to the outside world. Its public
//! boundary never fails: any network fault, non-success HTTP status, or
//! non-`OK` API status collapses to an empty batch plus a log line, and the
//! next scheduled cycle simply tries again.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use expro_core::{ReviewCandidate, DEFAULT_FETCH_CAP};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "expro-places";

pub const PLACE_DETAILS_URL: &str = "https://maps.googleapis.com/maps/api/place/details/json";

#[derive(Debug, Clone)]
pub struct PlacesConfig {
    pub api_key: String,
    pub place_id: String,
    pub endpoint: String,
    pub timeout: Duration,
    /// Candidates kept per fetch, in the order the source returned them.
    pub fetch_cap: usize,
}

impl PlacesConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("GOOGLE_API_KEY").unwrap_or_default(),
            place_id: std::env::var("GOOGLE_PLACE_ID").unwrap_or_default(),
            endpoint: PLACE_DETAILS_URL.to_string(),
            timeout: Duration::from_secs(
                std::env::var("REVIEWS_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8),
            ),
            fetch_cap: DEFAULT_FETCH_CAP,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("http status {0}")]
    Http(u16),
    #[error("places api status {0:?}")]
    ApiStatus(String),
}

/// Wire shape of the Place Details response, reduced to what the pipeline
/// reads. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct PlaceDetailsResponse {
    pub status: String,
    #[serde(default)]
    pub result: Option<PlaceResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaceResult {
    #[serde(default)]
    pub reviews: Vec<RawReview>,
}

/// One raw review entry. Every field is optional on the wire; which ones are
/// actually required is decided in [`normalize_reviews`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawReview {
    pub author_name: Option<String>,
    pub profile_photo_url: Option<String>,
    pub rating: Option<i64>,
    pub review_lang: Option<String>,
    pub text: Option<String>,
    pub time: Option<i64>,
}

/// Anything that can produce a batch of review candidates. The sync pipeline
/// depends on this seam so tests can drive cycles from a canned source.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Up to `fetch_cap` normalized candidates; empty on any fault.
    async fn fetch_reviews(&self) -> Vec<ReviewCandidate>;
}

pub struct PlacesClient {
    http: reqwest::Client,
    config: PlacesConfig,
}

impl PlacesClient {
    pub fn new(config: PlacesConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { http, config })
    }

    async fn try_fetch(&self) -> Result<Vec<ReviewCandidate>, FetchError> {
        let response = self
            .http
            .get(&self.config.endpoint)
            .query(&[
                ("place_id", self.config.place_id.as_str()),
                ("fields", "name,rating,reviews,user_ratings_total"),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await
            // The request URL carries the API key; strip it before the error
            // can reach a log line.
            .map_err(|err| FetchError::Request(err.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let body: PlaceDetailsResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Request(err.without_url()))?;

        if body.status != "OK" {
            return Err(FetchError::ApiStatus(body.status));
        }

        let raw = body.result.unwrap_or_default().reviews;
        Ok(normalize_reviews(raw, self.config.fetch_cap))
    }
}

#[async_trait]
impl ReviewSource for PlacesClient {
    async fn fetch_reviews(&self) -> Vec<ReviewCandidate> {
        match self.try_fetch().await {
            Ok(candidates) => {
                if candidates.is_empty() {
                    warn!("places api returned 0 usable reviews");
                }
                candidates
            }
            Err(err) => {
                warn!(%err, "review fetch failed; treating as empty batch");
                Vec::new()
            }
        }
    }
}

/// Map raw entries to [`ReviewCandidate`], keeping the source's own relevance
/// order and truncating to `cap`.
///
/// Missing optional fields default (`review_lang`, photo URL); a record
/// missing any of `author_name`, `rating`, or `text`, or carrying a rating
/// outside 1..=5, is skipped on its own while the rest of the batch proceeds.
pub fn normalize_reviews(raw: Vec<RawReview>, cap: usize) -> Vec<ReviewCandidate> {
    let mut out = Vec::new();
    for entry in raw {
        if out.len() == cap {
            break;
        }
        let (Some(author_name), Some(rating), Some(text)) =
            (entry.author_name, entry.rating, entry.text)
        else {
            debug!("skipping review entry with missing required fields");
            continue;
        };
        let Ok(rating @ 1..=5) = u8::try_from(rating) else {
            debug!(rating, "skipping review entry with out-of-range rating");
            continue;
        };
        out.push(ReviewCandidate {
            author_name,
            profile_photo_url: entry.profile_photo_url,
            rating,
            review_lang: entry.review_lang,
            text,
            time: entry.time,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(author: Option<&str>, rating: Option<i64>, text: Option<&str>) -> RawReview {
        RawReview {
            author_name: author.map(str::to_string),
            profile_photo_url: None,
            rating,
            review_lang: None,
            text: text.map(str::to_string),
            time: Some(1_700_000_000),
        }
    }

    #[test]
    fn response_parses_with_missing_result() {
        let body = r#"{"status": "ZERO_RESULTS"}"#;
        let parsed: PlaceDetailsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, "ZERO_RESULTS");
        assert!(parsed.result.is_none());
    }

    #[test]
    fn response_parses_real_shape_and_ignores_extras() {
        let body = r#"{
            "status": "OK",
            "result": {
                "name": "Expertise Pro",
                "rating": 4.8,
                "user_ratings_total": 31,
                "reviews": [
                    {
                        "author_name": "Jane",
                        "profile_photo_url": "https://example.com/p.jpg",
                        "rating": 5,
                        "review_lang": "en",
                        "text": "Great lessons",
                        "time": 1712000000,
                        "relative_time_description": "a month ago"
                    }
                ]
            }
        }"#;
        let parsed: PlaceDetailsResponse = serde_json::from_str(body).unwrap();
        let reviews = parsed.result.unwrap().reviews;
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].author_name.as_deref(), Some("Jane"));
        assert_eq!(reviews[0].rating, Some(5));
    }

    #[test]
    fn normalize_defaults_optional_fields_and_keeps_order() {
        let candidates = normalize_reviews(
            vec![
                raw(Some("A"), Some(5), Some("first")),
                raw(Some("B"), Some(4), Some("second")),
            ],
            10,
        );
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].text, "first");
        assert_eq!(candidates[1].text, "second");
        assert!(candidates[0].review_lang.is_none());
        assert!(candidates[0].profile_photo_url.is_none());
    }

    #[test]
    fn normalize_skips_incomplete_records_without_dropping_the_batch() {
        let candidates = normalize_reviews(
            vec![
                raw(None, Some(5), Some("no author")),
                raw(Some("A"), None, Some("no rating")),
                raw(Some("B"), Some(6), Some("bad rating")),
                raw(Some("C"), Some(0), Some("bad rating")),
                raw(Some("D"), Some(5), None),
                raw(Some("E"), Some(4), Some("kept")),
            ],
            10,
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].author_name, "E");
    }

    #[test]
    fn normalize_truncates_to_cap_in_source_order() {
        let entries: Vec<RawReview> = (0..15)
            .map(|i| raw(Some(&format!("author {i}")), Some(5), Some("text")))
            .collect();
        let candidates = normalize_reviews(entries, DEFAULT_FETCH_CAP);
        assert_eq!(candidates.len(), DEFAULT_FETCH_CAP);
        assert_eq!(candidates[0].author_name, "author 0");
        assert_eq!(candidates[9].author_name, "author 9");
    }

    #[tokio::test]
    async fn fetch_boundary_collapses_network_faults_to_empty() {
        let client = PlacesClient::new(PlacesConfig {
            api_key: "test-key".into(),
            place_id: "test-place".into(),
            // Nothing listens here; the connection is refused immediately.
            endpoint: "http://127.0.0.1:9/details".into(),
            timeout: Duration::from_millis(500),
            fetch_cap: DEFAULT_FETCH_CAP,
        })
        .unwrap();

        assert!(client.fetch_reviews().await.is_empty());
    }
}
