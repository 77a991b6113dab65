//! Receipt line binding database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{ReceiptLineBinding, ResolutionOutcome};

const BINDING_COLUMNS: &str = r#"
    binding_id, receipt_id, line_index, establishment_id, raw_code, raw_name,
    price, quantity, product_id, variant_id, outcome, score, created_at
"#;

impl Database {
    /// Insert a binding. Bindings are never updated afterwards.
    pub fn insert_binding(&self, binding: &ReceiptLineBinding) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO receipt_line_bindings (
                binding_id, receipt_id, line_index, establishment_id, raw_code, raw_name,
                price, quantity, product_id, variant_id, outcome, score, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                binding.binding_id,
                binding.receipt_id,
                binding.line_index,
                binding.establishment_id,
                binding.raw_code,
                binding.raw_name,
                binding.price,
                binding.quantity,
                binding.product_id,
                binding.variant_id,
                binding.outcome.as_str(),
                binding.score,
                binding.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a binding by ID.
    pub fn get_binding(&self, binding_id: &str) -> DbResult<Option<ReceiptLineBinding>> {
        let sql = format!(
            "SELECT {} FROM receipt_line_bindings WHERE binding_id = ?",
            BINDING_COLUMNS
        );
        self.conn
            .query_row(&sql, [binding_id], BindingRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get the binding already written for a receipt line.
    pub fn find_binding_for_line(&self, receipt_id: &str, line_index: u32) -> DbResult<Option<ReceiptLineBinding>> {
        let sql = format!(
            "SELECT {} FROM receipt_line_bindings WHERE receipt_id = ? AND line_index = ?",
            BINDING_COLUMNS
        );
        self.conn
            .query_row(&sql, params![receipt_id, line_index], BindingRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List the bindings of a receipt in line order.
    pub fn list_bindings_for_receipt(&self, receipt_id: &str) -> DbResult<Vec<ReceiptLineBinding>> {
        let sql = format!(
            "SELECT {} FROM receipt_line_bindings WHERE receipt_id = ? ORDER BY line_index",
            BINDING_COLUMNS
        );
        self.query_bindings(&sql, receipt_id)
    }

    /// List every binding that points at a product.
    pub fn list_bindings_for_product(&self, product_id: &str) -> DbResult<Vec<ReceiptLineBinding>> {
        let sql = format!(
            "SELECT {} FROM receipt_line_bindings WHERE product_id = ? ORDER BY created_at",
            BINDING_COLUMNS
        );
        self.query_bindings(&sql, product_id)
    }

    fn query_bindings(&self, sql: &str, key: &str) -> DbResult<Vec<ReceiptLineBinding>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([key], BindingRow::from_row)?;

        let mut bindings = Vec::new();
        for row in rows {
            bindings.push(row?.try_into()?);
        }
        Ok(bindings)
    }
}

/// Intermediate row struct for database mapping.
struct BindingRow {
    binding_id: String,
    receipt_id: Option<String>,
    line_index: u32,
    establishment_id: String,
    raw_code: Option<String>,
    raw_name: String,
    price: Option<f64>,
    quantity: Option<f64>,
    product_id: Option<String>,
    variant_id: Option<String>,
    outcome: String,
    score: Option<f64>,
    created_at: String,
}

impl BindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            binding_id: row.get(0)?,
            receipt_id: row.get(1)?,
            line_index: row.get(2)?,
            establishment_id: row.get(3)?,
            raw_code: row.get(4)?,
            raw_name: row.get(5)?,
            price: row.get(6)?,
            quantity: row.get(7)?,
            product_id: row.get(8)?,
            variant_id: row.get(9)?,
            outcome: row.get(10)?,
            score: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl TryFrom<BindingRow> for ReceiptLineBinding {
    type Error = DbError;

    fn try_from(row: BindingRow) -> Result<Self, Self::Error> {
        let outcome = ResolutionOutcome::parse(&row.outcome)
            .ok_or_else(|| DbError::Constraint(format!("Unknown outcome: {}", row.outcome)))?;

        Ok(ReceiptLineBinding {
            binding_id: row.binding_id,
            receipt_id: row.receipt_id,
            line_index: row.line_index,
            establishment_id: row.establishment_id,
            raw_code: row.raw_code,
            raw_name: row.raw_name,
            price: row.price,
            quantity: row.quantity,
            product_id: row.product_id,
            variant_id: row.variant_id,
            outcome,
            score: row.score,
            created_at: row.created_at,
        })
    }
}
