//! Canonical product database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{CanonicalProduct, ProductKind};

const PRODUCT_COLUMNS: &str = r#"
    p.product_id, p.name, p.normalized_name, p.brand, p.category,
    p.universal_code, p.variant_count, p.created_at
"#;

impl Database {
    /// Insert a new canonical product.
    ///
    /// Fails with a unique violation if another product already owns the
    /// universal code.
    pub fn insert_product(&self, product: &CanonicalProduct) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO canonical_products (
                product_id, name, normalized_name, brand, category,
                universal_code, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                product.product_id,
                product.name,
                product.normalized_name,
                product.brand,
                product.category,
                product.universal_code,
                product.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a product by ID.
    pub fn get_product(&self, product_id: &str) -> DbResult<Option<CanonicalProduct>> {
        let sql = format!(
            "SELECT {} FROM canonical_products p WHERE p.product_id = ?",
            PRODUCT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, [product_id], product_from_row)
            .optional()?)
    }

    /// Check that a product exists.
    pub fn product_exists(&self, product_id: &str) -> DbResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM canonical_products WHERE product_id = ?)",
            [product_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Get the product that owns a universal code as its principal code.
    pub fn get_product_by_universal_code(&self, code: &str) -> DbResult<Option<CanonicalProduct>> {
        let sql = format!(
            "SELECT {} FROM canonical_products p WHERE p.universal_code = ?",
            PRODUCT_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [code], product_from_row).optional()?)
    }

    /// Set the principal universal code if the product has none yet.
    pub fn set_universal_code_if_missing(&self, product_id: &str, code: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE canonical_products
            SET universal_code = ?2, updated_at = datetime('now')
            WHERE product_id = ?1 AND universal_code IS NULL
            "#,
            params![product_id, code],
        )?;
        Ok(rows_affected > 0)
    }

    /// Make `product_id` the principal owner of a universal code.
    ///
    /// Any other product loses the code first. The target keeps a different
    /// principal code it already has. Returns whether the target now owns it.
    pub fn move_universal_code(&self, code: &str, product_id: &str) -> DbResult<bool> {
        self.conn.execute(
            r#"
            UPDATE canonical_products
            SET universal_code = NULL, updated_at = datetime('now')
            WHERE universal_code = ?1 AND product_id != ?2
            "#,
            params![code, product_id],
        )?;
        self.set_universal_code_if_missing(product_id, code)?;
        let owner = self.get_product_by_universal_code(code)?;
        Ok(owner.is_some_and(|p| p.product_id == product_id))
    }

    /// Update descriptive fields of a product.
    pub fn update_product_details(
        &self,
        product_id: &str,
        name: &str,
        brand: Option<&str>,
        category: Option<&str>,
    ) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE canonical_products
            SET name = ?2, brand = ?3, category = ?4, updated_at = datetime('now')
            WHERE product_id = ?1
            "#,
            params![product_id, name, brand, category],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(product_id.to_string()));
        }
        Ok(())
    }

    /// List all products ordered by name.
    pub fn list_products(&self) -> DbResult<Vec<CanonicalProduct>> {
        let sql = format!(
            "SELECT {} FROM canonical_products p ORDER BY p.normalized_name, p.created_at",
            PRODUCT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], product_from_row)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?);
        }
        Ok(products)
    }

    /// Search products by name prefix (all tokens must match, BM25 ranking).
    pub fn search_products(&self, query: &str, limit: usize) -> DbResult<Vec<CanonicalProduct>> {
        let fts_query = fts_query(query, " ");
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        self.query_fts(&fts_query, limit)
    }

    /// Retrieve fuzzy-match candidates: products sharing any name token prefix.
    pub fn product_candidates(&self, normalized_name: &str, limit: usize) -> DbResult<Vec<CanonicalProduct>> {
        let fts_query = fts_query(normalized_name, " OR ");
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        self.query_fts(&fts_query, limit)
    }

    fn query_fts(&self, fts_query: &str, limit: usize) -> DbResult<Vec<CanonicalProduct>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM canonical_products p
            JOIN canonical_products_fts fts ON p.rowid = fts.rowid
            WHERE canonical_products_fts MATCH ?
            ORDER BY bm25(canonical_products_fts)
            LIMIT ?
            "#,
            PRODUCT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fts_query, limit as i64], product_from_row)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?);
        }
        Ok(products)
    }

    /// Products already seen at an establishment (through codes or names).
    pub fn products_seen_at(&self, establishment_id: &str) -> DbResult<Vec<CanonicalProduct>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM canonical_products p
            WHERE p.product_id IN (
                SELECT product_id FROM product_variants WHERE establishment_id = ?1
                UNION
                SELECT product_id FROM name_bindings WHERE establishment_id = ?1
            )
            ORDER BY p.created_at
            "#,
            PRODUCT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([establishment_id], product_from_row)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?);
        }
        Ok(products)
    }

    /// Code kind of a product, derived from its principal code and variants.
    pub fn product_kind(&self, product_id: &str) -> DbResult<ProductKind> {
        let (has_universal, has_local): (bool, bool) = self.conn.query_row(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM canonical_products WHERE product_id = ?1 AND universal_code IS NOT NULL)
                OR EXISTS(SELECT 1 FROM product_variants WHERE product_id = ?1 AND code_kind = 'universal'),
                EXISTS(SELECT 1 FROM product_variants WHERE product_id = ?1 AND code_kind = 'store_local')
            "#,
            [product_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(if has_universal {
            ProductKind::Universal
        } else if has_local {
            ProductKind::StoreLocal
        } else {
            ProductKind::Unknown
        })
    }

    /// Count canonical products.
    pub fn count_products(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM canonical_products", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<CanonicalProduct> {
    Ok(CanonicalProduct {
        product_id: row.get(0)?,
        name: row.get(1)?,
        normalized_name: row.get(2)?,
        brand: row.get(3)?,
        category: row.get(4)?,
        universal_code: row.get(5)?,
        variant_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Build an FTS5 prefix query from free text.
///
/// Non-alphanumerics split tokens the same way the unicode61 tokenizer does.
fn fts_query(text: &str, joiner: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("{}*", word))
        .collect::<Vec<_>>()
        .join(joiner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();

        let mut milk = CanonicalProduct::new("Leche Entera 1L".into(), "leche entera 1l".into());
        milk.universal_code = Some("7702000112311".into());
        db.insert_product(&milk).unwrap();

        let flour = CanonicalProduct::new("Harina Haz de Oro".into(), "harina haz de oro".into());
        db.insert_product(&flour).unwrap();

        let carrot = CanonicalProduct::new("Zanahoria".into(), "zanahoria".into());
        db.insert_product(&carrot).unwrap();

        db
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let milk = db.get_product_by_universal_code("7702000112311").unwrap().unwrap();
        assert_eq!(milk.name, "Leche Entera 1L");
        assert_eq!(milk.variant_count, 0);

        let fetched = db.get_product(&milk.product_id).unwrap().unwrap();
        assert_eq!(fetched, milk);
        assert!(db.get_product("missing").unwrap().is_none());
    }

    #[test]
    fn test_universal_code_owned_once() {
        let db = setup_db();
        let mut dup = CanonicalProduct::new("Otra Leche".into(), "otra leche".into());
        dup.universal_code = Some("7702000112311".into());

        let err = db.insert_product(&dup).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_search_products() {
        let db = setup_db();

        let results = db.search_products("harina", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Harina Haz de Oro");

        // Prefix search, all tokens required
        assert_eq!(db.search_products("har oro", 10).unwrap().len(), 1);
        assert_eq!(db.search_products("har leche", 10).unwrap().len(), 0);
        assert!(db.search_products("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_candidates_match_any_token() {
        let db = setup_db();

        // "marina" misses but "haz" hits
        let results = db.product_candidates("marina haz o", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].normalized_name, "harina haz de oro");
    }

    #[test]
    fn test_set_universal_code_if_missing() {
        let db = setup_db();
        let carrot = &db.search_products("zanahoria", 1).unwrap()[0];

        assert!(db.set_universal_code_if_missing(&carrot.product_id, "7701234567890").unwrap());
        assert!(!db.set_universal_code_if_missing(&carrot.product_id, "7709999999999").unwrap());

        let fetched = db.get_product(&carrot.product_id).unwrap().unwrap();
        assert_eq!(fetched.universal_code.as_deref(), Some("7701234567890"));
    }

    #[test]
    fn test_product_kind() {
        let db = setup_db();
        let milk = db.get_product_by_universal_code("7702000112311").unwrap().unwrap();
        let carrot = &db.search_products("zanahoria", 1).unwrap()[0];

        assert_eq!(db.product_kind(&milk.product_id).unwrap(), ProductKind::Universal);
        assert_eq!(db.product_kind(&carrot.product_id).unwrap(), ProductKind::Unknown);
    }

    #[test]
    fn test_update_details() {
        let db = setup_db();
        let carrot = db.search_products("zanahoria", 1).unwrap().remove(0);

        db.update_product_details(&carrot.product_id, "Zanahoria a granel", None, Some("fruver"))
            .unwrap();
        let fetched = db.get_product(&carrot.product_id).unwrap().unwrap();
        assert_eq!(fetched.category.as_deref(), Some("fruver"));

        let result = db.update_product_details("missing", "x", None, None);
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_fts_query_escaping() {
        assert_eq!(fts_query("Leche \"entera\" 1.5l", " "), "leche* entera* 1* 5l*");
        assert_eq!(fts_query("a OR b", " OR "), "a* OR or* OR b*");
    }
}
