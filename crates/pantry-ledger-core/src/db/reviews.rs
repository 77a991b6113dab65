//! Review queue database operations.

use rusqlite::{params, Row};

use super::{Database, DbError, DbResult};
use crate::models::{ReviewItem, ReviewReason};

impl Database {
    /// Queue a line item for manual review.
    pub fn insert_review(&self, review: &ReviewItem) -> DbResult<()> {
        let candidates_json = serde_json::to_string(&review.candidates)?;

        self.conn.execute(
            r#"
            INSERT INTO review_queue (
                review_id, reason, receipt_id, line_index, establishment_id,
                raw_code, raw_name, product_id, candidates, resolved, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                review.review_id,
                review.reason.as_str(),
                review.receipt_id,
                review.line_index,
                review.establishment_id,
                review.raw_code,
                review.raw_name,
                review.product_id,
                candidates_json,
                review.resolved,
                review.created_at,
            ],
        )?;
        Ok(())
    }

    /// List unresolved reviews, oldest first.
    pub fn list_pending_reviews(&self) -> DbResult<Vec<ReviewItem>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT review_id, reason, receipt_id, line_index, establishment_id,
                   raw_code, raw_name, product_id, candidates, resolved, created_at
            FROM review_queue
            WHERE resolved = 0
            ORDER BY created_at, rowid
            "#,
        )?;

        let rows = stmt.query_map([], ReviewRow::from_row)?;

        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row?.try_into()?);
        }
        Ok(reviews)
    }

    /// Mark a review as handled.
    pub fn resolve_review(&self, review_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE review_queue SET resolved = 1 WHERE review_id = ? AND resolved = 0",
            [review_id],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct ReviewRow {
    review_id: String,
    reason: String,
    receipt_id: Option<String>,
    line_index: u32,
    establishment_id: String,
    raw_code: Option<String>,
    raw_name: String,
    product_id: Option<String>,
    candidates: String,
    resolved: bool,
    created_at: String,
}

impl ReviewRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            review_id: row.get(0)?,
            reason: row.get(1)?,
            receipt_id: row.get(2)?,
            line_index: row.get(3)?,
            establishment_id: row.get(4)?,
            raw_code: row.get(5)?,
            raw_name: row.get(6)?,
            product_id: row.get(7)?,
            candidates: row.get(8)?,
            resolved: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl TryFrom<ReviewRow> for ReviewItem {
    type Error = DbError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        let reason = ReviewReason::parse(&row.reason)
            .ok_or_else(|| DbError::Constraint(format!("Unknown review reason: {}", row.reason)))?;

        Ok(ReviewItem {
            review_id: row.review_id,
            reason,
            receipt_id: row.receipt_id,
            line_index: row.line_index,
            establishment_id: row.establishment_id,
            raw_code: row.raw_code,
            raw_name: row.raw_name,
            product_id: row.product_id,
            candidates: serde_json::from_str(&row.candidates)?,
            resolved: row.resolved,
            created_at: row.created_at,
        })
    }
}
