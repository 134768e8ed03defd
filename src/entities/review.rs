// ⭐ Review Entity - one rating left by a party to a transaction
//
// Immutable once written; at most one per (author, transaction).

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub author_id: i64,
    pub subject_id: i64,
    pub transaction_id: i64,
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Review {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: String = row.get(6)?;
        Ok(Review {
            id: row.get(0)?,
            author_id: row.get(1)?,
            subject_id: row.get(2)?,
            transaction_id: row.get(3)?,
            rating: row.get(4)?,
            comment: row.get(5)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

/// Mean and count of everything an account has been rated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub mean: f64,
    pub count: i64,
}

const REVIEW_COLUMNS: &str =
    "id, author_id, subject_id, transaction_id, rating, comment, created_at";

pub struct ReviewStore<'c> {
    conn: &'c Connection,
}

impl<'c> ReviewStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        ReviewStore { conn }
    }

    pub fn insert(
        &self,
        author_id: i64,
        subject_id: i64,
        transaction_id: i64,
        rating: i64,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<Review> {
        self.conn.execute(
            "INSERT INTO reviews (author_id, subject_id, transaction_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![author_id, subject_id, transaction_id, rating, comment, format_timestamp(now)],
        )?;

        let id = self.conn.last_insert_rowid();
        let review = self.conn.query_row(
            &format!("SELECT {} FROM reviews WHERE id = ?1", REVIEW_COLUMNS),
            [id],
            Review::from_row,
        )?;
        Ok(review)
    }

    pub fn exists(&self, author_id: i64, transaction_id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM reviews WHERE author_id = ?1 AND transaction_id = ?2",
                [author_id, transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Full recomputation over every rating the subject ever received
    pub fn summary_for(&self, subject_id: i64) -> Result<RatingSummary> {
        let (mean, count): (Option<f64>, i64) = self.conn.query_row(
            "SELECT AVG(rating), COUNT(*) FROM reviews WHERE subject_id = ?1",
            [subject_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(RatingSummary {
            mean: mean.unwrap_or(0.0),
            count,
        })
    }

    pub fn for_subject(&self, subject_id: i64) -> Result<Vec<Review>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM reviews WHERE subject_id = ?1 ORDER BY created_at DESC, id DESC",
            REVIEW_COLUMNS
        ))?;

        let reviews = stmt
            .query_map([subject_id], Review::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reviews)
    }
}
