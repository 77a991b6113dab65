//! Learned correction database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{ClassifiedCode, CodeKind, CorrectionSource, LearnedCorrection};

const CORRECTION_COLUMNS: &str = r#"
    correction_id, code_key, code_kind, name_key, establishment_id, product_id, source, note,
    created_at
"#;

impl Database {
    /// Store a correction, replacing the target of an existing correction
    /// with the same keys.
    ///
    /// Returns the stored correction (with the surviving ID).
    pub fn upsert_correction(&self, correction: &LearnedCorrection) -> DbResult<LearnedCorrection> {
        let existing_id: Option<String> = self
            .conn
            .query_row(
                r#"
                SELECT correction_id FROM learned_corrections
                WHERE code_key IS ?1 AND code_kind IS ?2 AND name_key IS ?3
                  AND establishment_id IS ?4
                "#,
                params![
                    correction.code_key,
                    correction.code_kind.map(|k| k.as_str()),
                    correction.name_key,
                    correction.establishment_id,
                ],
                |row| row.get(0),
            )
            .optional()?;

        let mut stored = correction.clone();
        match existing_id {
            Some(id) => {
                self.conn.execute(
                    r#"
                    UPDATE learned_corrections
                    SET product_id = ?2, source = ?3, note = ?4, created_at = ?5
                    WHERE correction_id = ?1
                    "#,
                    params![
                        id,
                        correction.product_id,
                        correction.source.as_str(),
                        correction.note,
                        correction.created_at,
                    ],
                )?;
                stored.correction_id = id;
            }
            None => {
                self.conn.execute(
                    r#"
                    INSERT INTO learned_corrections (
                        correction_id, code_key, code_kind, name_key, establishment_id,
                        product_id, source, note, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        correction.correction_id,
                        correction.code_key,
                        correction.code_kind.map(|k| k.as_str()),
                        correction.name_key,
                        correction.establishment_id,
                        correction.product_id,
                        correction.source.as_str(),
                        correction.note,
                        correction.created_at,
                    ],
                )?;
            }
        }
        Ok(stored)
    }

    /// Find the most specific correction matching the given keys.
    ///
    /// A correction matches when every key it carries equals the input; a
    /// correction keyed on code and name needs both to match. Codes match on
    /// digits and kind. Ties go to the establishment-scoped, then most
    /// recent, correction.
    pub fn find_correction(
        &self,
        code: Option<&ClassifiedCode>,
        name_key: Option<&str>,
        establishment_id: &str,
    ) -> DbResult<Option<LearnedCorrection>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM learned_corrections
            WHERE (code_key IS NULL OR (code_key = ?1 AND code_kind = ?2))
              AND (name_key IS NULL OR name_key = ?3)
              AND (establishment_id IS NULL OR establishment_id = ?4)
            ORDER BY (code_key IS NOT NULL) + (name_key IS NOT NULL) DESC,
                     (establishment_id IS NOT NULL) DESC,
                     created_at DESC
            LIMIT 1
            "#,
            CORRECTION_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![
                    code.map(|c| c.code.as_str()),
                    code.map(|c| c.kind.as_str()),
                    name_key,
                    establishment_id,
                ],
                CorrectionRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all corrections, newest first.
    pub fn list_corrections(&self) -> DbResult<Vec<LearnedCorrection>> {
        let sql = format!(
            "SELECT {} FROM learned_corrections ORDER BY created_at DESC",
            CORRECTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], CorrectionRow::from_row)?;

        let mut corrections = Vec::new();
        for row in rows {
            corrections.push(row?.try_into()?);
        }
        Ok(corrections)
    }
}

/// Intermediate row struct for database mapping.
struct CorrectionRow {
    correction_id: String,
    code_key: Option<String>,
    code_kind: Option<String>,
    name_key: Option<String>,
    establishment_id: Option<String>,
    product_id: String,
    source: String,
    note: Option<String>,
    created_at: String,
}

impl CorrectionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            correction_id: row.get(0)?,
            code_key: row.get(1)?,
            code_kind: row.get(2)?,
            name_key: row.get(3)?,
            establishment_id: row.get(4)?,
            product_id: row.get(5)?,
            source: row.get(6)?,
            note: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl TryFrom<CorrectionRow> for LearnedCorrection {
    type Error = DbError;

    fn try_from(row: CorrectionRow) -> Result<Self, Self::Error> {
        let source = CorrectionSource::parse(&row.source)
            .ok_or_else(|| DbError::Constraint(format!("Unknown correction source: {}", row.source)))?;
        let code_kind = row
            .code_kind
            .map(|kind| {
                CodeKind::parse(&kind).ok_or_else(|| DbError::Constraint(format!("Unknown code kind: {}", kind)))
            })
            .transpose()?;

        Ok(LearnedCorrection {
            correction_id: row.correction_id,
            code_key: row.code_key,
            code_kind,
            name_key: row.name_key,
            establishment_id: row.establishment_id,
            product_id: row.product_id,
            source,
            note: row.note,
            created_at: row.created_at,
        })
    }
}
