//! SQLite-backed review store for the Expertise Pro site.
//!
//! Owns the `google_reviews` table. The sync pipeline is the only writer;
//! page controllers read through [`ReviewStore::fetch_recent_or_empty`],
//! which collapses storage faults to an empty list so a broken database
//! renders a page with no reviews instead of an error.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use expro_core::{Review, ReviewCandidate, MIN_DISPLAY_RATING};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::error;

pub const CRATE_NAME: &str = "expro-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored timestamp {0:?}")]
    Timestamp(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS google_reviews (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    author_name       TEXT    NOT NULL,
    profile_photo_url TEXT,
    rating            INTEGER NOT NULL,
    review_lang       TEXT,
    text              TEXT    NOT NULL,
    retrieved_at      TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_google_reviews_retrieved_at
    ON google_reviews (retrieved_at DESC);
"#;

#[derive(Debug, Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    /// Open a pooled connection and run the schema migration.
    ///
    /// A single connection is enough here: SQLite permits limited write
    /// concurrency anyway, and `sqlite::memory:` databases are per-connection,
    /// so a wider pool would hand tests a different empty database on every
    /// checkout.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rows with `rating >= 4`, newest first by `retrieved_at`, at most
    /// `limit`. Ties on `retrieved_at` fall back to insertion order.
    pub async fn fetch_recent(&self, limit: u32) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, author_name, profile_photo_url, rating, review_lang, text, retrieved_at
              FROM google_reviews
             WHERE rating >= ?
             ORDER BY retrieved_at DESC, id DESC
             LIMIT ?
            "#,
        )
        .bind(i64::from(MIN_DISPLAY_RATING))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(decode_review(&row)?);
        }
        Ok(out)
    }

    /// Read-path boundary: same as [`fetch_recent`](Self::fetch_recent) but a
    /// storage fault becomes an empty list plus a log entry. Page controllers
    /// never see database error types.
    pub async fn fetch_recent_or_empty(&self, limit: u32) -> Vec<Review> {
        match self.fetch_recent(limit).await {
            Ok(reviews) => reviews,
            Err(err) => {
                error!(%err, "review fetch failed; rendering without reviews");
                Vec::new()
            }
        }
    }

    /// Insert `candidate` unless a row with the same `(author_name, rating,
    /// text)` triple already exists. Returns whether a row was written.
    /// `retrieved_at` is assigned here from the store clock; a duplicate does
    /// not refresh it.
    ///
    /// The check-then-insert pair is not atomic; the scheduler's reentrancy
    /// guard keeps the sync pipeline the sole writer.
    pub async fn insert_if_not_exists(
        &self,
        candidate: &ReviewCandidate,
    ) -> Result<bool, StoreError> {
        let existing = sqlx::query(
            r#"
            SELECT id
              FROM google_reviews
             WHERE author_name = ? AND rating = ? AND text = ?
             LIMIT 1
            "#,
        )
        .bind(&candidate.author_name)
        .bind(i64::from(candidate.rating))
        .bind(&candidate.text)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO google_reviews
                (author_name, profile_photo_url, rating, review_lang, text, retrieved_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candidate.author_name)
        .bind(&candidate.profile_photo_url)
        .bind(i64::from(candidate.rating))
        .bind(&candidate.review_lang)
        .bind(&candidate.text)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    /// Delete every row not among the `keep` most recent. The keeper ids are
    /// materialized by the subquery before the delete runs, so a keeper can
    /// never be selected and deleted in the same pass. Returns rows deleted.
    pub async fn prune(&self, keep: u32) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM google_reviews
             WHERE id NOT IN (
                SELECT id
                  FROM google_reviews
                 ORDER BY retrieved_at DESC, id DESC
                 LIMIT ?
             )
            "#,
        )
        .bind(i64::from(keep))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Clear the table and bulk-insert `candidates` inside one transaction, so
    /// a concurrent reader observes either the old or the new contents, never
    /// a cleared-but-unfilled table. Returns rows inserted.
    pub async fn replace_all(&self, candidates: &[ReviewCandidate]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM google_reviews")
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0u64;
        for candidate in candidates {
            sqlx::query(
                r#"
                INSERT INTO google_reviews
                    (author_name, profile_photo_url, rating, review_lang, text, retrieved_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&candidate.author_name)
            .bind(&candidate.profile_photo_url)
            .bind(i64::from(candidate.rating))
            .bind(&candidate.review_lang)
            .bind(&candidate.text)
            .bind(encode_ts(Utc::now()))
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM google_reviews")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

/// RFC 3339 with fixed-width microseconds and a `Z` suffix, so the TEXT
/// column sorts chronologically under plain string comparison.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

fn decode_review(row: &sqlx::sqlite::SqliteRow) -> Result<Review, StoreError> {
    let rating: i64 = row.try_get("rating")?;
    let retrieved_at: String = row.try_get("retrieved_at")?;
    Ok(Review {
        id: row.try_get("id")?,
        author_name: row.try_get("author_name")?,
        profile_photo_url: row.try_get("profile_photo_url")?,
        rating: u8::try_from(rating).unwrap_or(0),
        review_lang: row.try_get("review_lang")?,
        text: row.try_get("text")?,
        retrieved_at: decode_ts(&retrieved_at)?,
    })
}
