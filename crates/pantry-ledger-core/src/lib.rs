//! Pantry Ledger Core Library
//!
//! Local-first product identity resolution for photographed receipts.
//!
//! # Architecture
//!
//! ```text
//! OCR line item (code?, name, establishment)
//!          │
//!          ├── Code Classifier ──── universal (EAN/UPC) | store-local (PLU)
//!          └── Name Normalizer ──── canonical comparable name
//!                    │
//!     ┌──────────────▼──────────────┐
//!     │  BEGIN IMMEDIATE            │
//!     │  1. Learned override        │
//!     │  2. Universal code ledger   │
//!     │  3. Store-local ledger      │
//!     │  4. Fuzzy name fallback     │
//!     │  5. New canonical product   │
//!     │  + receipt line binding     │
//!     │  COMMIT                     │
//!     └──────────────┬──────────────┘
//!                    │
//!      Review queue (unresolvable, ambiguous, look-alikes)
//! ```
//!
//! # Core Principle
//!
//! **Never split one product, never merge two.** Universal codes bind
//! globally, store-local codes only within their establishment, and a fuzzy
//! name match alone never joins two different universal codes.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer with FTS5 search
//! - [`models`]: Domain types (CanonicalProduct, ProductVariant, LineItem, etc.)
//! - [`resolver`]: Classifier, normalizer, similarity engine, ledger, learning store
//! - [`config`]: Resolver thresholds and dictionary extensions

pub mod config;
pub mod db;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use config::{ConfigError, ResolverConfig};
pub use db::Database;
pub use models::{
    CanonicalProduct, ClassifiedCode, CodeKind, CorrectionSource, DuplicatePair, LearnedCorrection,
    LineItem, ProductVariant, ReceiptLineBinding, ResolutionOutcome, ResolutionResult, ReviewItem,
    ReviewReason, ScoredCandidate,
};
pub use resolver::{classify, Normalizer, Resolver, ResolverError};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};
use std::time::Duration;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum PantryLedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for PantryLedgerError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(id) => PantryLedgerError::NotFound(id),
            e if e.is_conflict() => PantryLedgerError::Conflict(e.to_string()),
            e => PantryLedgerError::DatabaseError(e.to_string()),
        }
    }
}

impl From<ConfigError> for PantryLedgerError {
    fn from(e: ConfigError) -> Self {
        PantryLedgerError::ConfigError(e.to_string())
    }
}

impl From<ResolverError> for PantryLedgerError {
    fn from(e: ResolverError) -> Self {
        match e {
            ResolverError::Database(e) => e.into(),
            ResolverError::Config(e) => e.into(),
            ResolverError::UnknownProduct(id) => PantryLedgerError::NotFound(id),
            ResolverError::ConflictingBinding(msg) => PantryLedgerError::Conflict(msg),
            e @ (ResolverError::InvalidCorrection(_)
            | ResolverError::UnresolvableInput(_)
            | ResolverError::AmbiguousFuzzyMatch(_)) => PantryLedgerError::InvalidInput(e.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PantryLedgerError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        PantryLedgerError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<PantryLedgerCore>, PantryLedgerError> {
    PantryLedgerCore::open(&path, ResolverConfig::default())
}

/// Open or create a database with a TOML resolver configuration.
#[uniffi::export]
pub fn open_database_with_config(
    path: String,
    config_toml: String,
) -> Result<Arc<PantryLedgerCore>, PantryLedgerError> {
    let config = ResolverConfig::from_toml_str(&config_toml)?;
    PantryLedgerCore::open(&path, config)
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<PantryLedgerCore>, PantryLedgerError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(PantryLedgerCore {
        db: Arc::new(Mutex::new(db)),
        config: ResolverConfig::default(),
    }))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct PantryLedgerCore {
    db: Arc<Mutex<Database>>,
    config: ResolverConfig,
}

impl PantryLedgerCore {
    fn open(path: &str, config: ResolverConfig) -> Result<Arc<Self>, PantryLedgerError> {
        config.validate()?;
        // Reject bad dictionary entries before touching the file
        Normalizer::with_config(&config)?;

        let db = Database::open_with_timeout(path, Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            config,
        }))
    }
}

#[uniffi::export]
impl PantryLedgerCore {
    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a single line item that is not part of a stored receipt.
    pub fn resolve_line_item(&self, item: FfiLineItem) -> Result<FfiResolutionResult, PantryLedgerError> {
        let db = self.db.lock()?;
        let resolver = Resolver::with_config(&db, self.config.clone())?;
        let result = resolver.resolve(&item.into())?;
        Ok(result.into())
    }

    /// Resolve every line of a receipt, in order.
    pub fn resolve_receipt(
        &self,
        receipt_id: String,
        items: Vec<FfiLineItem>,
    ) -> Result<Vec<FfiResolutionResult>, PantryLedgerError> {
        let db = self.db.lock()?;
        let resolver = Resolver::with_config(&db, self.config.clone())?;
        let items: Vec<LineItem> = items.into_iter().map(|i| i.into()).collect();
        let results = resolver.resolve_receipt(&receipt_id, &items);
        Ok(results.into_iter().map(|r| r.into()).collect())
    }

    /// Bindings written for a receipt, in line order.
    pub fn list_receipt_bindings(&self, receipt_id: String) -> Result<Vec<FfiReceiptLineBinding>, PantryLedgerError> {
        let db = self.db.lock()?;
        let bindings = db.list_bindings_for_receipt(&receipt_id)?;
        Ok(bindings.into_iter().map(|b| b.into()).collect())
    }

    /// Every receipt line bound to a product, oldest first.
    pub fn list_product_bindings(&self, product_id: String) -> Result<Vec<FfiReceiptLineBinding>, PantryLedgerError> {
        let db = self.db.lock()?;
        let bindings = db.list_bindings_for_product(&product_id)?;
        Ok(bindings.into_iter().map(|b| b.into()).collect())
    }

    // =========================================================================
    // Corrections
    // =========================================================================

    /// Record a confirmed correction. `source` is "human" or "validator".
    pub fn record_correction(
        &self,
        raw_code: Option<String>,
        raw_name: Option<String>,
        establishment_id: Option<String>,
        product_id: String,
        source: String,
        note: Option<String>,
    ) -> Result<FfiCorrection, PantryLedgerError> {
        let source = CorrectionSource::parse(&source)
            .ok_or_else(|| PantryLedgerError::InvalidInput(format!("Unknown correction source: {}", source)))?;

        let db = self.db.lock()?;
        let resolver = Resolver::with_config(&db, self.config.clone())?;
        let correction = resolver.record_correction(
            raw_code.as_deref(),
            raw_name.as_deref(),
            establishment_id.as_deref(),
            &product_id,
            source,
            note.as_deref(),
        )?;
        Ok(correction.into())
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Get a canonical product by ID.
    pub fn get_product(&self, product_id: String) -> Result<Option<FfiProduct>, PantryLedgerError> {
        let db = self.db.lock()?;
        let product = db.get_product(&product_id)?;
        Ok(product.map(|p| p.into()))
    }

    /// Search canonical products by name.
    pub fn search_products(&self, query: String, limit: u32) -> Result<Vec<FfiProduct>, PantryLedgerError> {
        let db = self.db.lock()?;
        let products = db.search_products(&query, limit as usize)?;
        Ok(products.into_iter().map(|p| p.into()).collect())
    }

    /// Set a product's display name, brand and category.
    ///
    /// The normalized name used for matching is left as minted.
    pub fn update_product(
        &self,
        product_id: String,
        name: String,
        brand: Option<String>,
        category: Option<String>,
    ) -> Result<FfiProduct, PantryLedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PantryLedgerError::InvalidInput("Product name must not be empty".into()));
        }
        let db = self.db.lock()?;
        db.update_product_details(&product_id, name, brand.as_deref(), category.as_deref())?;
        let product = db
            .get_product(&product_id)?
            .ok_or_else(|| PantryLedgerError::NotFound(product_id.clone()))?;
        Ok(product.into())
    }

    /// List the codes bound to a product.
    pub fn list_variants(&self, product_id: String) -> Result<Vec<FfiVariant>, PantryLedgerError> {
        let db = self.db.lock()?;
        let variants = db.list_variants_for_product(&product_id)?;
        Ok(variants.into_iter().map(|v| v.into()).collect())
    }

    /// Report look-alike products. Nothing is merged.
    pub fn find_duplicate_products(&self) -> Result<Vec<FfiDuplicatePair>, PantryLedgerError> {
        let db = self.db.lock()?;
        let resolver = Resolver::with_config(&db, self.config.clone())?;
        let pairs = resolver.find_duplicate_products()?;
        Ok(pairs.into_iter().map(|p| p.into()).collect())
    }

    // =========================================================================
    // Review Queue
    // =========================================================================

    /// Get line items waiting for review, oldest first.
    pub fn list_pending_reviews(&self) -> Result<Vec<FfiReviewItem>, PantryLedgerError> {
        let db = self.db.lock()?;
        let reviews = db.list_pending_reviews()?;
        Ok(reviews.into_iter().map(|r| r.into()).collect())
    }

    /// Mark a review as handled. Returns false if it was already handled.
    pub fn dismiss_review(&self, review_id: String) -> Result<bool, PantryLedgerError> {
        let db = self.db.lock()?;
        Ok(db.resolve_review(&review_id)?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe receipt line item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLineItem {
    pub raw_code: Option<String>,
    pub raw_name: String,
    pub establishment_id: String,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub line_index: u32,
}

impl From<FfiLineItem> for LineItem {
    fn from(item: FfiLineItem) -> Self {
        LineItem {
            raw_code: item.raw_code,
            raw_name: item.raw_name,
            establishment_id: item.establishment_id,
            price: item.price,
            quantity: item.quantity,
            line_index: item.line_index,
        }
    }
}

/// FFI-safe resolution result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiResolutionResult {
    pub outcome: String,
    pub canonical_product_id: Option<String>,
    pub variant_id: Option<String>,
    pub binding_id: Option<String>,
    pub score: Option<f64>,
    pub normalized_name: String,
    pub code: Option<String>,
    pub code_kind: Option<String>,
    pub duplicate_candidates: Vec<FfiScoredCandidate>,
}

impl From<ResolutionResult> for FfiResolutionResult {
    fn from(result: ResolutionResult) -> Self {
        let (code, code_kind) = match result.code {
            Some(c) => (Some(c.code), Some(c.kind.as_str().to_string())),
            None => (None, None),
        };
        Self {
            outcome: result.outcome.as_str().to_string(),
            canonical_product_id: result.canonical_product_id,
            variant_id: result.variant_id,
            binding_id: result.binding_id,
            score: result.score,
            normalized_name: result.normalized_name,
            code,
            code_kind,
            duplicate_candidates: result.duplicate_candidates.into_iter().map(|c| c.into()).collect(),
        }
    }
}

/// FFI-safe scored candidate.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiScoredCandidate {
    pub product_id: String,
    pub normalized_name: String,
    pub score: f64,
    pub same_establishment: bool,
}

impl From<ScoredCandidate> for FfiScoredCandidate {
    fn from(candidate: ScoredCandidate) -> Self {
        Self {
            product_id: candidate.product_id,
            normalized_name: candidate.normalized_name,
            score: candidate.score,
            same_establishment: candidate.same_establishment,
        }
    }
}

/// FFI-safe canonical product.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProduct {
    pub product_id: String,
    pub name: String,
    pub normalized_name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub universal_code: Option<String>,
    pub variant_count: u32,
    pub created_at: String,
}

impl From<CanonicalProduct> for FfiProduct {
    fn from(product: CanonicalProduct) -> Self {
        Self {
            product_id: product.product_id,
            name: product.name,
            normalized_name: product.normalized_name,
            brand: product.brand,
            category: product.category,
            universal_code: product.universal_code,
            variant_count: product.variant_count,
            created_at: product.created_at,
        }
    }
}

/// FFI-safe product variant.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiVariant {
    pub variant_id: String,
    pub product_id: String,
    pub code: String,
    pub code_kind: String,
    pub name_seen: String,
    pub establishment_id: String,
    pub observation_count: u32,
    pub first_seen: String,
    pub last_seen: String,
}

impl From<ProductVariant> for FfiVariant {
    fn from(variant: ProductVariant) -> Self {
        Self {
            variant_id: variant.variant_id,
            product_id: variant.product_id,
            code: variant.code,
            code_kind: variant.code_kind.as_str().to_string(),
            name_seen: variant.name_seen,
            establishment_id: variant.establishment_id,
            observation_count: variant.observation_count,
            first_seen: variant.first_seen,
            last_seen: variant.last_seen,
        }
    }
}

/// FFI-safe receipt line binding.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReceiptLineBinding {
    pub binding_id: String,
    pub receipt_id: Option<String>,
    pub line_index: u32,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub outcome: String,
    pub score: Option<f64>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
}

impl From<ReceiptLineBinding> for FfiReceiptLineBinding {
    fn from(binding: ReceiptLineBinding) -> Self {
        Self {
            binding_id: binding.binding_id,
            receipt_id: binding.receipt_id,
            line_index: binding.line_index,
            product_id: binding.product_id,
            variant_id: binding.variant_id,
            outcome: binding.outcome.as_str().to_string(),
            score: binding.score,
            price: binding.price,
            quantity: binding.quantity,
        }
    }
}

/// FFI-safe learned correction.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCorrection {
    pub correction_id: String,
    pub code_key: Option<String>,
    pub code_kind: Option<String>,
    pub name_key: Option<String>,
    pub establishment_id: Option<String>,
    pub product_id: String,
    pub source: String,
    pub note: Option<String>,
}

impl From<LearnedCorrection> for FfiCorrection {
    fn from(correction: LearnedCorrection) -> Self {
        Self {
            correction_id: correction.correction_id,
            code_key: correction.code_key,
            code_kind: correction.code_kind.map(|k| k.as_str().to_string()),
            name_key: correction.name_key,
            establishment_id: correction.establishment_id,
            product_id: correction.product_id,
            source: correction.source.as_str().to_string(),
            note: correction.note,
        }
    }
}

/// FFI-safe review queue entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReviewItem {
    pub review_id: String,
    pub reason: String,
    pub receipt_id: Option<String>,
    pub line_index: u32,
    pub establishment_id: String,
    pub raw_code: Option<String>,
    pub raw_name: String,
    pub product_id: Option<String>,
    pub candidates: Vec<FfiScoredCandidate>,
}

impl From<ReviewItem> for FfiReviewItem {
    fn from(review: ReviewItem) -> Self {
        Self {
            review_id: review.review_id,
            reason: review.reason.as_str().to_string(),
            receipt_id: review.receipt_id,
            line_index: review.line_index,
            establishment_id: review.establishment_id,
            raw_code: review.raw_code,
            raw_name: review.raw_name,
            product_id: review.product_id,
            candidates: review.candidates.into_iter().map(|c| c.into()).collect(),
        }
    }
}

/// FFI-safe duplicate report entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDuplicatePair {
    pub first_product_id: String,
    pub first_name: String,
    pub second_product_id: String,
    pub second_name: String,
    pub score: f64,
    pub conflicting_codes: bool,
}

impl From<DuplicatePair> for FfiDuplicatePair {
    fn from(pair: DuplicatePair) -> Self {
        Self {
            first_product_id: pair.first_product_id,
            first_name: pair.first_name,
            second_product_id: pair.second_product_id,
            second_name: pair.second_name,
            score: pair.score,
            conflicting_codes: pair.conflicting_codes,
        }
    }
}
