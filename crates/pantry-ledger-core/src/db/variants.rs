//! Variant ledger database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{CodeKind, NameBinding, ProductVariant};

const VARIANT_COLUMNS: &str = r#"
    variant_id, product_id, code, code_kind, name_seen, establishment_id,
    observation_count, first_seen, last_seen
"#;

impl Database {
    /// Insert a first sighting of a code.
    ///
    /// Fails with a unique violation if the key (universal code, or
    /// establishment + store-local code) is already bound.
    pub fn insert_variant(&self, variant: &ProductVariant) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO product_variants (
                variant_id, product_id, code, code_kind, name_seen, establishment_id,
                observation_count, first_seen, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                variant.variant_id,
                variant.product_id,
                variant.code,
                variant.code_kind.as_str(),
                variant.name_seen,
                variant.establishment_id,
                variant.observation_count,
                variant.first_seen,
                variant.last_seen,
            ],
        )?;
        Ok(())
    }

    /// Get a variant by ID.
    pub fn get_variant(&self, variant_id: &str) -> DbResult<Option<ProductVariant>> {
        let sql = format!("SELECT {} FROM product_variants WHERE variant_id = ?", VARIANT_COLUMNS);
        self.conn
            .query_row(&sql, [variant_id], VariantRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Find the variant bound to a universal code, wherever it was seen.
    pub fn find_universal_variant(&self, code: &str) -> DbResult<Option<ProductVariant>> {
        let sql = format!(
            "SELECT {} FROM product_variants WHERE code_kind = 'universal' AND code = ?",
            VARIANT_COLUMNS
        );
        self.conn
            .query_row(&sql, [code], VariantRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Find the variant bound to a store-local code at one establishment.
    pub fn find_local_variant(&self, establishment_id: &str, code: &str) -> DbResult<Option<ProductVariant>> {
        let sql = format!(
            "SELECT {} FROM product_variants WHERE code_kind = 'store_local' AND establishment_id = ? AND code = ?",
            VARIANT_COLUMNS
        );
        self.conn
            .query_row(&sql, [establishment_id, code], VariantRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Record another observation of a variant.
    pub fn bump_variant(&self, variant_id: &str, seen_at: &str) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE product_variants
            SET observation_count = observation_count + 1, last_seen = ?2
            WHERE variant_id = ?1
            "#,
            params![variant_id, seen_at],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(variant_id.to_string()));
        }
        Ok(())
    }

    /// Move a variant to another product.
    pub(crate) fn rebind_variant(&self, variant_id: &str, product_id: &str) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE product_variants SET product_id = ?2 WHERE variant_id = ?1",
            params![variant_id, product_id],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(variant_id.to_string()));
        }
        Ok(())
    }

    /// List variants of a product, most observed first.
    pub fn list_variants_for_product(&self, product_id: &str) -> DbResult<Vec<ProductVariant>> {
        let sql = format!(
            "SELECT {} FROM product_variants WHERE product_id = ? ORDER BY observation_count DESC, first_seen",
            VARIANT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([product_id], VariantRow::from_row)?;

        let mut variants = Vec::new();
        for row in rows {
            variants.push(row?.try_into()?);
        }
        Ok(variants)
    }

    // =========================================================================
    // Name bindings (code-less sightings)
    // =========================================================================

    /// Find the product a code-less name is bound to at one establishment.
    pub fn find_name_binding(&self, establishment_id: &str, name_key: &str) -> DbResult<Option<NameBinding>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT establishment_id, name_key, product_id, observation_count, first_seen, last_seen
                FROM name_bindings
                WHERE establishment_id = ? AND name_key = ?
                "#,
                [establishment_id, name_key],
                name_binding_from_row,
            )
            .optional()?)
    }

    /// Insert a first code-less sighting.
    pub fn insert_name_binding(&self, binding: &NameBinding) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO name_bindings (
                establishment_id, name_key, product_id, observation_count, first_seen, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                binding.establishment_id,
                binding.name_key,
                binding.product_id,
                binding.observation_count,
                binding.first_seen,
                binding.last_seen,
            ],
        )?;
        Ok(())
    }

    /// Record another code-less sighting.
    pub fn bump_name_binding(&self, establishment_id: &str, name_key: &str, seen_at: &str) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE name_bindings
            SET observation_count = observation_count + 1, last_seen = ?3
            WHERE establishment_id = ?1 AND name_key = ?2
            "#,
            params![establishment_id, name_key, seen_at],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("{}/{}", establishment_id, name_key)));
        }
        Ok(())
    }

    /// Move code-less sightings of a name to another product, in every
    /// establishment or only one.
    pub(crate) fn rebind_name_bindings(
        &self,
        name_key: &str,
        establishment_id: Option<&str>,
        product_id: &str,
    ) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE name_bindings SET product_id = ?3
            WHERE name_key = ?1 AND (?2 IS NULL OR establishment_id = ?2)
            "#,
            params![name_key, establishment_id, product_id],
        )?;
        Ok(rows_affected)
    }
}

/// Intermediate row struct for database mapping.
struct VariantRow {
    variant_id: String,
    product_id: String,
    code: String,
    code_kind: String,
    name_seen: String,
    establishment_id: String,
    observation_count: u32,
    first_seen: String,
    last_seen: String,
}

impl VariantRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            variant_id: row.get(0)?,
            product_id: row.get(1)?,
            code: row.get(2)?,
            code_kind: row.get(3)?,
            name_seen: row.get(4)?,
            establishment_id: row.get(5)?,
            observation_count: row.get(6)?,
            first_seen: row.get(7)?,
            last_seen: row.get(8)?,
        })
    }
}

impl TryFrom<VariantRow> for ProductVariant {
    type Error = DbError;

    fn try_from(row: VariantRow) -> Result<Self, Self::Error> {
        let code_kind = CodeKind::parse(&row.code_kind)
            .ok_or_else(|| DbError::Constraint(format!("Unknown code kind: {}", row.code_kind)))?;

        Ok(ProductVariant {
            variant_id: row.variant_id,
            product_id: row.product_id,
            code: row.code,
            code_kind,
            name_seen: row.name_seen,
            establishment_id: row.establishment_id,
            observation_count: row.observation_count,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        })
    }
}

fn name_binding_from_row(row: &Row<'_>) -> rusqlite::Result<NameBinding> {
    Ok(NameBinding {
        establishment_id: row.get(0)?,
        name_key: row.get(1)?,
        product_id: row.get(2)?,
        observation_count: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalProduct;

    fn setup_db() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let carrot = CanonicalProduct::new("Zanahoria".into(), "zanahoria".into());
        let onion = CanonicalProduct::new("Cebolla Cabezona".into(), "cebolla cabezona".into());
        db.insert_product(&carrot).unwrap();
        db.insert_product(&onion).unwrap();
        (db, carrot.product_id, onion.product_id)
    }

    #[test]
    fn test_insert_and_find_local() {
        let (db, carrot, onion) = setup_db();

        let a = ProductVariant::new(carrot.clone(), "2001".into(), CodeKind::StoreLocal, "ZANAHORIA".into(), "store-a".into());
        let b = ProductVariant::new(onion.clone(), "2001".into(), CodeKind::StoreLocal, "CEBOLLA".into(), "store-b".into());
        db.insert_variant(&a).unwrap();
        db.insert_variant(&b).unwrap();

        // Same PLU, different stores, different products
        assert_eq!(db.find_local_variant("store-a", "2001").unwrap().unwrap().product_id, carrot);
        assert_eq!(db.find_local_variant("store-b", "2001").unwrap().unwrap().product_id, onion);
        assert!(db.find_local_variant("store-c", "2001").unwrap().is_none());

        // Local codes are not universal codes
        assert!(db.find_universal_variant("2001").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_key_is_conflict() {
        let (db, carrot, onion) = setup_db();

        let first = ProductVariant::new(carrot, "7702000112311".into(), CodeKind::Universal, "X".into(), "store-a".into());
        db.insert_variant(&first).unwrap();

        let second = ProductVariant::new(onion, "7702000112311".into(), CodeKind::Universal, "Y".into(), "store-b".into());
        let err = db.insert_variant(&second).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_bump_variant() {
        let (db, carrot, _) = setup_db();
        let variant = ProductVariant::new(carrot, "1045".into(), CodeKind::StoreLocal, "ZANAH".into(), "store-a".into());
        db.insert_variant(&variant).unwrap();

        db.bump_variant(&variant.variant_id, "2026-01-02T00:00:00+00:00").unwrap();

        let fetched = db.get_variant(&variant.variant_id).unwrap().unwrap();
        assert_eq!(fetched.observation_count, 2);
        assert_eq!(fetched.last_seen, "2026-01-02T00:00:00+00:00");
        assert_eq!(fetched.first_seen, variant.first_seen);

        assert!(matches!(db.bump_variant("missing", "now"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_rebind_variant_moves_count() {
        let (db, carrot, onion) = setup_db();
        let variant = ProductVariant::new(carrot.clone(), "1045".into(), CodeKind::StoreLocal, "X".into(), "store-a".into());
        db.insert_variant(&variant).unwrap();

        db.rebind_variant(&variant.variant_id, &onion).unwrap();

        assert_eq!(db.get_product(&carrot).unwrap().unwrap().variant_count, 0);
        assert_eq!(db.get_product(&onion).unwrap().unwrap().variant_count, 1);
        assert_eq!(db.list_variants_for_product(&onion).unwrap().len(), 1);
    }

    #[test]
    fn test_name_bindings() {
        let (db, carrot, onion) = setup_db();
        let now = chrono::Utc::now().to_rfc3339();
        let binding = NameBinding {
            establishment_id: "store-a".into(),
            name_key: "zanahoria".into(),
            product_id: carrot.clone(),
            observation_count: 1,
            first_seen: now.clone(),
            last_seen: now,
        };
        db.insert_name_binding(&binding).unwrap();
        assert!(db.insert_name_binding(&binding).unwrap_err().is_conflict());

        db.bump_name_binding("store-a", "zanahoria", "later").unwrap();
        let fetched = db.find_name_binding("store-a", "zanahoria").unwrap().unwrap();
        assert_eq!(fetched.observation_count, 2);
        assert!(db.find_name_binding("store-b", "zanahoria").unwrap().is_none());

        assert_eq!(db.rebind_name_bindings("zanahoria", None, &onion).unwrap(), 1);
        assert_eq!(db.find_name_binding("store-a", "zanahoria").unwrap().unwrap().product_id, onion);
    }
}
