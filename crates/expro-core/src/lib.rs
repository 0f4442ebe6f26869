//! Core domain model for the Expertise Pro review pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "expro-core";

/// Maximum rows kept in the review store after a prune cycle.
pub const DEFAULT_RETENTION: u32 = 10;

/// Maximum reviews accepted from the external source per fetch.
pub const DEFAULT_FETCH_CAP: usize = 10;

/// Default row limit for the read path.
pub const DEFAULT_DISPLAY_LIMIT: u32 = 5;

/// Display-quality floor applied at read time.
pub const MIN_DISPLAY_RATING: u8 = 4;

/// Persisted review row. `id` and `retrieved_at` are assigned by the store;
/// the external source supplies neither a stable id nor an ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub author_name: String,
    pub profile_photo_url: Option<String>,
    pub rating: u8,
    pub review_lang: Option<String>,
    pub text: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Normalized external review record, pre-insertion. `time` is the source's
/// own unix timestamp when present; it is carried for logging but never
/// persisted or used for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCandidate {
    pub author_name: String,
    pub profile_photo_url: Option<String>,
    pub rating: u8,
    pub review_lang: Option<String>,
    pub text: String,
    pub time: Option<i64>,
}

impl ReviewCandidate {
    /// Duplicate identity used by the incremental sync policy: two reviews
    /// are the same iff author, rating, and body all match exactly.
    pub fn dedup_key(&self) -> (&str, u8, &str) {
        (&self.author_name, self.rating, &self.text)
    }
}
