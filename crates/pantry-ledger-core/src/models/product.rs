//! Canonical product and variant models.

use serde::{Deserialize, Serialize};

/// Kind of a scanned product code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// Universal barcode (EAN/UPC/GTIN), unique across stores
    Universal,
    /// Store-assigned code (PLU), meaningful only within one establishment
    StoreLocal,
}

impl CodeKind {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::Universal => "universal",
            CodeKind::StoreLocal => "store_local",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "universal" => Some(CodeKind::Universal),
            "store_local" => Some(CodeKind::StoreLocal),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The deduplicated, cross-store identity of a real product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalProduct {
    /// Stable product ID
    pub product_id: String,
    /// Official display name
    pub name: String,
    /// Normalized name used for matching
    pub normalized_name: String,
    /// Brand, when known
    pub brand: Option<String>,
    /// Category, when known
    pub category: Option<String>,
    /// Principal universal code (fresh/bulk products have none)
    pub universal_code: Option<String>,
    /// Number of variants bound to this product
    pub variant_count: u32,
    /// Creation timestamp
    pub created_at: String,
}

impl CanonicalProduct {
    /// Create a new canonical product with a fresh ID.
    pub fn new(name: String, normalized_name: String) -> Self {
        Self {
            product_id: uuid::Uuid::new_v4().to_string(),
            name,
            normalized_name,
            brand: None,
            category: None,
            universal_code: None,
            variant_count: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One observed (code, establishment) binding pointing to a canonical product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductVariant {
    pub variant_id: String,
    pub product_id: String,
    /// Normalized code (ledger key)
    pub code: String,
    pub code_kind: CodeKind,
    /// Raw name as read off the receipt
    pub name_seen: String,
    /// Establishment where the code was first seen (the key for store-local codes)
    pub establishment_id: String,
    pub observation_count: u32,
    pub first_seen: String,
    pub last_seen: String,
}

impl ProductVariant {
    /// Create a first sighting of a code bound to `product_id`.
    pub fn new(
        product_id: String,
        code: String,
        code_kind: CodeKind,
        name_seen: String,
        establishment_id: String,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            variant_id: uuid::Uuid::new_v4().to_string(),
            product_id,
            code,
            code_kind,
            name_seen,
            establishment_id,
            observation_count: 1,
            first_seen: now.clone(),
            last_seen: now,
        }
    }
}

/// A code-less sighting: (establishment, normalized name) bound to a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NameBinding {
    pub establishment_id: String,
    pub name_key: String,
    pub product_id: String,
    pub observation_count: u32,
    pub first_seen: String,
    pub last_seen: String,
}

/// Code kind of an existing product, as seen by the fuzzy matcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProductKind {
    /// Owns a universal code
    Universal,
    /// Only store-local variants
    StoreLocal,
    /// No code-bearing variants yet (name-only sightings)
    Unknown,
}

impl ProductKind {
    /// Whether an input with code kind `input` may fuzzy-bind to a product of this kind.
    ///
    /// A universal input reaching the fuzzy stage has a code the ledger does
    /// not know, so it never binds to a product that already owns a different
    /// universal code.
    pub fn is_compatible(&self, input: Option<CodeKind>) -> bool {
        match (self, input) {
            (ProductKind::Unknown, _) | (_, None) => true,
            (ProductKind::StoreLocal, Some(CodeKind::StoreLocal)) => true,
            _ => false,
        }
    }
}
