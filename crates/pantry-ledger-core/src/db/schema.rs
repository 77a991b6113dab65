//! SQLite schema definition.

/// Complete database schema for pantry-ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Canonical Products
-- ============================================================================

CREATE TABLE IF NOT EXISTS canonical_products (
    product_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    brand TEXT,
    category TEXT,
    universal_code TEXT UNIQUE,                   -- NULL for fresh/bulk products
    variant_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- FTS5 virtual table for candidate retrieval
CREATE VIRTUAL TABLE IF NOT EXISTS canonical_products_fts USING fts5(
    normalized_name,
    content='canonical_products',
    content_rowid='rowid'
);

-- Triggers to keep FTS5 in sync with main table
CREATE TRIGGER IF NOT EXISTS canonical_products_ai AFTER INSERT ON canonical_products BEGIN
    INSERT INTO canonical_products_fts(rowid, normalized_name)
    VALUES (new.rowid, new.normalized_name);
END;

CREATE TRIGGER IF NOT EXISTS canonical_products_ad AFTER DELETE ON canonical_products BEGIN
    INSERT INTO canonical_products_fts(canonical_products_fts, rowid, normalized_name)
    VALUES ('delete', old.rowid, old.normalized_name);
END;

CREATE TRIGGER IF NOT EXISTS canonical_products_au AFTER UPDATE OF normalized_name ON canonical_products BEGIN
    INSERT INTO canonical_products_fts(canonical_products_fts, rowid, normalized_name)
    VALUES ('delete', old.rowid, old.normalized_name);
    INSERT INTO canonical_products_fts(rowid, normalized_name)
    VALUES (new.rowid, new.normalized_name);
END;

-- ============================================================================
-- Variant Ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS product_variants (
    variant_id TEXT PRIMARY KEY,
    product_id TEXT NOT NULL REFERENCES canonical_products(product_id),
    code TEXT NOT NULL,                           -- normalized code
    code_kind TEXT NOT NULL CHECK (code_kind IN ('universal', 'store_local')),
    name_seen TEXT NOT NULL,
    establishment_id TEXT NOT NULL,
    observation_count INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

-- One owner per universal code, one owner per (establishment, code) for PLUs
CREATE UNIQUE INDEX IF NOT EXISTS ux_variants_universal
    ON product_variants(code) WHERE code_kind = 'universal';
CREATE UNIQUE INDEX IF NOT EXISTS ux_variants_store_local
    ON product_variants(establishment_id, code) WHERE code_kind = 'store_local';
CREATE INDEX IF NOT EXISTS idx_variants_product ON product_variants(product_id);
CREATE INDEX IF NOT EXISTS idx_variants_establishment ON product_variants(establishment_id);

-- Keep variant_count in step with the ledger
CREATE TRIGGER IF NOT EXISTS product_variants_ai AFTER INSERT ON product_variants BEGIN
    UPDATE canonical_products SET variant_count = variant_count + 1
    WHERE product_id = new.product_id;
END;

CREATE TRIGGER IF NOT EXISTS product_variants_au AFTER UPDATE OF product_id ON product_variants
WHEN old.product_id != new.product_id
BEGIN
    UPDATE canonical_products SET variant_count = variant_count - 1
    WHERE product_id = old.product_id;
    UPDATE canonical_products SET variant_count = variant_count + 1
    WHERE product_id = new.product_id;
END;

-- Code-less sightings: (establishment, normalized name) -> product
CREATE TABLE IF NOT EXISTS name_bindings (
    establishment_id TEXT NOT NULL,
    name_key TEXT NOT NULL,
    product_id TEXT NOT NULL REFERENCES canonical_products(product_id),
    observation_count INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (establishment_id, name_key)
);

CREATE INDEX IF NOT EXISTS idx_name_bindings_product ON name_bindings(product_id);

-- ============================================================================
-- Learning Store
-- ============================================================================

CREATE TABLE IF NOT EXISTS learned_corrections (
    correction_id TEXT PRIMARY KEY,
    code_key TEXT,
    code_kind TEXT CHECK (code_kind IN ('universal', 'store_local')),
    name_key TEXT,
    establishment_id TEXT,
    product_id TEXT NOT NULL REFERENCES canonical_products(product_id),
    source TEXT NOT NULL CHECK (source IN ('human', 'validator')),
    note TEXT,
    created_at TEXT NOT NULL,
    CHECK (code_key IS NOT NULL OR name_key IS NOT NULL),
    CHECK ((code_key IS NULL) = (code_kind IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_corrections_key ON learned_corrections(
    COALESCE(code_key, ''), COALESCE(code_kind, ''), COALESCE(name_key, ''),
    COALESCE(establishment_id, '')
);
CREATE INDEX IF NOT EXISTS idx_corrections_code ON learned_corrections(code_key);
CREATE INDEX IF NOT EXISTS idx_corrections_name ON learned_corrections(name_key);

-- ============================================================================
-- Receipt Line Bindings (Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS receipt_line_bindings (
    binding_id TEXT PRIMARY KEY,
    receipt_id TEXT,
    line_index INTEGER NOT NULL DEFAULT 0,
    establishment_id TEXT NOT NULL,
    raw_code TEXT,
    raw_name TEXT NOT NULL,
    price REAL,
    quantity REAL,
    product_id TEXT REFERENCES canonical_products(product_id),
    variant_id TEXT REFERENCES product_variants(variant_id),
    outcome TEXT NOT NULL,
    score REAL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_bindings_receipt_line
    ON receipt_line_bindings(receipt_id, line_index) WHERE receipt_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_bindings_product ON receipt_line_bindings(product_id);

CREATE TRIGGER IF NOT EXISTS receipt_line_bindings_immutable BEFORE UPDATE ON receipt_line_bindings
BEGIN
    SELECT RAISE(ABORT, 'Receipt line bindings are immutable');
END;

-- ============================================================================
-- Review Queue
-- ============================================================================

CREATE TABLE IF NOT EXISTS review_queue (
    review_id TEXT PRIMARY KEY,
    reason TEXT NOT NULL CHECK (reason IN ('unresolvable', 'ambiguous_fuzzy_match', 'candidate_duplicate')),
    receipt_id TEXT,
    line_index INTEGER NOT NULL DEFAULT 0,
    establishment_id TEXT NOT NULL,
    raw_code TEXT,
    raw_name TEXT NOT NULL,
    product_id TEXT REFERENCES canonical_products(product_id),
    candidates TEXT NOT NULL DEFAULT '[]',        -- JSON array of ScoredCandidate
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_review_pending ON review_queue(resolved, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO canonical_products (product_id, name, normalized_name) VALUES ('p1', 'Leche Entera', 'leche entera')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO canonical_products (product_id, name, normalized_name) VALUES ('p2', 'Zanahoria', 'zanahoria')",
            [],
        )
        .unwrap();
        conn
    }

    fn insert_variant(conn: &Connection, id: &str, product: &str, code: &str, kind: &str, est: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO product_variants (variant_id, product_id, code, code_kind, name_seen, establishment_id, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, 'seen', ?5, 'now', 'now')",
            [id, product, code, kind, est],
        )
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);

        // Idempotent re-application
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_fts_trigger() {
        let conn = setup();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM canonical_products_fts WHERE canonical_products_fts MATCH 'lech*'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_universal_code_unique_across_establishments() {
        let conn = setup();
        insert_variant(&conn, "v1", "p1", "7702000112311", "universal", "a").unwrap();
        assert!(insert_variant(&conn, "v2", "p2", "7702000112311", "universal", "b").is_err());
    }

    #[test]
    fn test_store_local_code_unique_per_establishment() {
        let conn = setup();
        insert_variant(&conn, "v1", "p2", "2001", "store_local", "a").unwrap();
        // Same PLU at another store is an independent key
        insert_variant(&conn, "v2", "p1", "2001", "store_local", "b").unwrap();
        assert!(insert_variant(&conn, "v3", "p1", "2001", "store_local", "a").is_err());
    }

    #[test]
    fn test_variant_count_trigger() {
        let conn = setup();
        insert_variant(&conn, "v1", "p2", "2001", "store_local", "a").unwrap();
        insert_variant(&conn, "v2", "p2", "2001", "store_local", "b").unwrap();

        conn.execute("UPDATE product_variants SET product_id = 'p1' WHERE variant_id = 'v2'", [])
            .unwrap();

        let counts: Vec<i64> = conn
            .prepare("SELECT variant_count FROM canonical_products ORDER BY product_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(counts, vec![1, 1]);
    }

    #[test]
    fn test_bindings_are_immutable() {
        let conn = setup();
        conn.execute(
            "INSERT INTO receipt_line_bindings (binding_id, establishment_id, raw_name, outcome, created_at)
             VALUES ('b1', 'a', 'LECHE', 'new_identity', 'now')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "UPDATE receipt_line_bindings SET product_id = 'p1' WHERE binding_id = 'b1'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_correction_requires_a_key() {
        let conn = setup();
        let result = conn.execute(
            "INSERT INTO learned_corrections (correction_id, product_id, source, created_at) VALUES ('c1', 'p1', 'human', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_product_cannot_be_deleted_while_referenced() {
        let conn = setup();
        insert_variant(&conn, "v1", "p1", "7702000112311", "universal", "a").unwrap();
        let result = conn.execute("DELETE FROM canonical_products WHERE product_id = 'p1'", []);
        assert!(result.is_err());
    }
}
