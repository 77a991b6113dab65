//! Product identity resolver.
//!
//! Pipeline per line item, first success wins:
//! Learned override → Universal code → Store-local code (or name) → Fuzzy name → New identity
//!
//! Each line is resolved inside one IMMEDIATE transaction that covers the
//! lookups, any product/variant creation and the receipt binding.

mod classifier;
mod fuzzy;
mod learning;
mod ledger;
mod normalizer;

pub use classifier::*;
pub use fuzzy::*;
pub use learning::*;
pub use ledger::*;
pub use normalizer::*;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ResolverConfig};
use crate::db::{Database, DbError};
use crate::models::{
    CanonicalProduct, ClassifiedCode, CodeKind, CorrectionSource, DuplicatePair, LearnedCorrection,
    LineItem, ReceiptLineBinding, ResolutionOutcome, ResolutionResult, ReviewItem, ReviewReason,
    ScoredCandidate,
};

/// Resolver errors.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unresolvable input: {0}")]
    UnresolvableInput(String),

    #[error("Conflicting binding: {0}")]
    ConflictingBinding(String),

    #[error("Ambiguous fuzzy match: {0}")]
    AmbiguousFuzzyMatch(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Invalid correction: {0}")]
    InvalidCorrection(String),
}

impl ResolverError {
    /// Whether retrying after a re-read can succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            ResolverError::ConflictingBinding(_) => true,
            ResolverError::Database(err) => err.is_conflict(),
            _ => false,
        }
    }
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// A product picked by one of the stages.
struct Match {
    outcome: ResolutionOutcome,
    product_id: String,
    variant_id: Option<String>,
    score: Option<f64>,
}

/// Main resolver that coordinates the stages.
pub struct Resolver<'a> {
    db: &'a Database,
    config: ResolverConfig,
    normalizer: Normalizer,
}

impl<'a> Resolver<'a> {
    /// Create a resolver with default configuration.
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: ResolverConfig::default(),
            normalizer: Normalizer::new(),
        }
    }

    /// Create a resolver with custom thresholds and dictionary entries.
    pub fn with_config(db: &'a Database, config: ResolverConfig) -> ResolverResult<Self> {
        config.validate()?;

        let normalizer = Normalizer::with_config(&config)?;

        Ok(Self {
            db,
            config,
            normalizer,
        })
    }

    /// Resolve a line item that does not belong to a stored receipt.
    pub fn resolve(&self, item: &LineItem) -> ResolverResult<ResolutionResult> {
        self.resolve_line(None, item)
    }

    /// Resolve one line item and write its binding.
    ///
    /// A line already bound under `(receipt_id, line_index)` returns the
    /// stored binding. Lines with nothing usable are queued for review and
    /// come back as [`ResolutionOutcome::Unresolvable`].
    pub fn resolve_line(&self, receipt_id: Option<&str>, item: &LineItem) -> ResolverResult<ResolutionResult> {
        let code = classify(item.raw_code.as_deref());
        let name = self.normalizer.normalize(&item.raw_name);

        debug!(
            establishment_id = %item.establishment_id,
            raw_code = ?item.raw_code,
            code = ?code,
            normalized_name = %name,
            "Resolving line item"
        );

        let mut attempt = 0;
        loop {
            let result = self
                .db
                .write_transaction(|_| self.resolve_once(receipt_id, item, code.as_ref(), &name));

            match result {
                Ok(resolution) => return Ok(resolution),
                Err(ResolverError::UnresolvableInput(reason)) => {
                    return self.record_unresolvable(receipt_id, item, code, name, &reason);
                }
                Err(err) if err.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, establishment_id = %item.establishment_id, "Binding conflict, retrying");
                }
                Err(err) if err.is_conflict() => {
                    warn!(attempts = attempt + 1, error = %err, "Giving up after repeated binding conflicts");
                    return Err(match err {
                        ResolverError::Database(db_err) => ResolverError::ConflictingBinding(db_err.to_string()),
                        other => other,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Resolve every line of a receipt, in order.
    ///
    /// Errors degrade to an unresolvable result for that line.
    pub fn resolve_receipt(&self, receipt_id: &str, items: &[LineItem]) -> Vec<ResolutionResult> {
        items
            .iter()
            .map(|item| match self.resolve_line(Some(receipt_id), item) {
                Ok(result) => result,
                Err(err) => {
                    warn!(receipt_id, line_index = item.line_index, error = %err, "Line item failed to resolve");
                    ResolutionResult::unresolvable(
                        self.normalizer.normalize(&item.raw_name),
                        classify(item.raw_code.as_deref()),
                    )
                }
            })
            .collect()
    }

    /// Record a correction for future resolutions.
    pub fn record_correction(
        &self,
        raw_code: Option<&str>,
        raw_name: Option<&str>,
        establishment_id: Option<&str>,
        product_id: &str,
        source: CorrectionSource,
        note: Option<&str>,
    ) -> ResolverResult<LearnedCorrection> {
        self.learning()
            .record_correction(raw_code, raw_name, establishment_id, product_id, source, note)
    }

    /// Report look-alike products above the duplicate threshold.
    pub fn find_duplicate_products(&self) -> ResolverResult<Vec<DuplicatePair>> {
        self.similarity()
            .find_duplicate_products(self.config.duplicate_threshold)
    }

    /// Get the normalizer for direct access.
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn ledger(&self) -> VariantLedger<'a> {
        VariantLedger::new(self.db)
    }

    pub fn learning(&self) -> LearningStore<'_> {
        LearningStore::new(self.db, &self.normalizer)
    }

    pub fn similarity(&self) -> SimilarityEngine<'a> {
        SimilarityEngine::new(self.db, &self.config)
    }

    /// One attempt; runs inside the write transaction.
    fn resolve_once(
        &self,
        receipt_id: Option<&str>,
        item: &LineItem,
        code: Option<&ClassifiedCode>,
        name: &str,
    ) -> ResolverResult<ResolutionResult> {
        if let Some(existing) = self.existing_binding(receipt_id, item)? {
            debug!(binding_id = %existing.binding_id, "Line already bound");
            return Ok(result_from_binding(existing, name, code));
        }

        if name.is_empty() && code.is_none() {
            return Err(ResolverError::UnresolvableInput("empty name and no code".into()));
        }

        if let Some(matched) = self.match_override(item, code, name)? {
            return self.finish(receipt_id, item, code, name, matched, Vec::new());
        }
        if let Some(matched) = self.match_ledger(item, code, name)? {
            return self.finish(receipt_id, item, code, name, matched, Vec::new());
        }

        if name.is_empty() {
            return Err(ResolverError::UnresolvableInput(
                "unknown code with an empty name".into(),
            ));
        }

        let decision = self
            .similarity()
            .find_candidates(name, &item.establishment_id, code.map(|c| c.kind))?;
        let (reason, duplicates) = match decision {
            FuzzyDecision::Accept(candidate) => {
                let matched = self.bind_fuzzy(item, code, name, candidate)?;
                return self.finish(receipt_id, item, code, name, matched, Vec::new());
            }
            FuzzyDecision::Ambiguous(candidates) => {
                let err = ResolverError::AmbiguousFuzzyMatch(name.to_string());
                warn!(
                    error = %err,
                    candidates = candidates.len(),
                    establishment_id = %item.establishment_id,
                    "Not guessing between near-equal candidates"
                );
                (ReviewReason::AmbiguousFuzzyMatch, candidates)
            }
            FuzzyDecision::NoMatch { duplicates } => (ReviewReason::CandidateDuplicate, duplicates),
        };

        let matched = self.mint(item, code, name)?;
        if !duplicates.is_empty() {
            self.queue_review(reason, receipt_id, item, Some(matched.product_id.as_str()), duplicates.clone())?;
        }
        self.finish(receipt_id, item, code, name, matched, duplicates)
    }

    /// Stage 1: a recorded correction for these keys.
    fn match_override(
        &self,
        item: &LineItem,
        code: Option<&ClassifiedCode>,
        name: &str,
    ) -> ResolverResult<Option<Match>> {
        let Some(correction) = self
            .learning()
            .find_override(code, name, &item.establishment_id)?
        else {
            return Ok(None);
        };

        if !self.db.product_exists(&correction.product_id)? {
            warn!(correction_id = %correction.correction_id, product_id = %correction.product_id, "Correction points at a missing product");
            return Ok(None);
        }

        let ledger = self.ledger();
        let product_id = correction.product_id;
        let establishment_id = item.establishment_id.as_str();

        // Record the sighting unless the key belongs to another product;
        // moving keys is the correction's job, not the resolver's.
        let variant_id = match code {
            Some(code) => match ledger.lookup_code(establishment_id, code)? {
                None => {
                    let variant = ledger.bind(&product_id, code, &item.raw_name, establishment_id)?;
                    if code.kind == CodeKind::Universal {
                        self.claim_universal_code(&product_id, &code.code)?;
                    }
                    Some(variant.variant_id)
                }
                Some(variant) if variant.product_id == product_id => {
                    ledger.bump(&variant)?;
                    Some(variant.variant_id)
                }
                Some(_) => None,
            },
            None => {
                match ledger.lookup_name(establishment_id, name)? {
                    None => {
                        ledger.bind_name(&product_id, name, establishment_id)?;
                    }
                    Some(binding) if binding.product_id == product_id => ledger.bump_name(&binding)?,
                    Some(_) => {}
                }
                None
            }
        };

        debug!(correction_id = %correction.correction_id, product_id = %product_id, "Learned override");
        Ok(Some(Match {
            outcome: ResolutionOutcome::LearnedOverride,
            product_id,
            variant_id,
            score: None,
        }))
    }

    /// Stages 2 and 3: the code (or, without a code, the name) is already
    /// in the ledger.
    fn match_ledger(&self, item: &LineItem, code: Option<&ClassifiedCode>, name: &str) -> ResolverResult<Option<Match>> {
        let ledger = self.ledger();
        let establishment_id = item.establishment_id.as_str();

        match code {
            Some(code) if code.kind == CodeKind::Universal => {
                if let Some(variant) = ledger.lookup_universal(&code.code)? {
                    ledger.bump(&variant)?;
                    debug!(variant_id = %variant.variant_id, product_id = %variant.product_id, "Universal code match");
                    return Ok(Some(Match {
                        outcome: ResolutionOutcome::UniversalMatch,
                        product_id: variant.product_id,
                        variant_id: Some(variant.variant_id),
                        score: None,
                    }));
                }
                // Principal code registered without any sighting yet
                if let Some(product) = self.db.get_product_by_universal_code(&code.code)? {
                    let variant = ledger.bind(&product.product_id, code, &item.raw_name, establishment_id)?;
                    debug!(product_id = %product.product_id, "Universal code match on principal code");
                    return Ok(Some(Match {
                        outcome: ResolutionOutcome::UniversalMatch,
                        product_id: product.product_id,
                        variant_id: Some(variant.variant_id),
                        score: None,
                    }));
                }
                Ok(None)
            }
            Some(code) => {
                let Some(variant) = ledger.lookup(establishment_id, &code.code)? else {
                    return Ok(None);
                };
                ledger.bump(&variant)?;
                debug!(variant_id = %variant.variant_id, product_id = %variant.product_id, "Store-local code match");
                Ok(Some(Match {
                    outcome: ResolutionOutcome::LocalMatch,
                    product_id: variant.product_id,
                    variant_id: Some(variant.variant_id),
                    score: None,
                }))
            }
            None => {
                let Some(binding) = ledger.lookup_name(establishment_id, name)? else {
                    return Ok(None);
                };
                ledger.bump_name(&binding)?;
                debug!(product_id = %binding.product_id, "Store-local name match");
                Ok(Some(Match {
                    outcome: ResolutionOutcome::LocalMatch,
                    product_id: binding.product_id,
                    variant_id: None,
                    score: None,
                }))
            }
        }
    }

    /// Stage 4: bind the line's code (or name) to an accepted fuzzy candidate.
    fn bind_fuzzy(
        &self,
        item: &LineItem,
        code: Option<&ClassifiedCode>,
        name: &str,
        candidate: ScoredCandidate,
    ) -> ResolverResult<Match> {
        let ledger = self.ledger();
        let establishment_id = item.establishment_id.as_str();

        let variant_id = match code {
            Some(code) => {
                let variant = ledger.bind(&candidate.product_id, code, &item.raw_name, establishment_id)?;
                if code.kind == CodeKind::Universal {
                    self.claim_universal_code(&candidate.product_id, &code.code)?;
                }
                Some(variant.variant_id)
            }
            None => {
                ledger.bind_name(&candidate.product_id, name, establishment_id)?;
                None
            }
        };

        debug!(
            product_id = %candidate.product_id,
            score = candidate.score,
            matched_name = %candidate.normalized_name,
            "Fuzzy match"
        );
        Ok(Match {
            outcome: ResolutionOutcome::FuzzyMatch,
            product_id: candidate.product_id,
            variant_id,
            score: Some(candidate.score),
        })
    }

    /// Stage 5: mint a new canonical product.
    fn mint(&self, item: &LineItem, code: Option<&ClassifiedCode>, name: &str) -> ResolverResult<Match> {
        let display_name = item.raw_name.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut product = CanonicalProduct::new(display_name, name.to_string());
        product.universal_code = code
            .filter(|c| c.kind == CodeKind::Universal)
            .map(|c| c.code.clone());
        self.db.insert_product(&product)?;

        let ledger = self.ledger();
        let establishment_id = item.establishment_id.as_str();
        let variant_id = match code {
            Some(code) => Some(
                ledger
                    .bind(&product.product_id, code, &item.raw_name, establishment_id)?
                    .variant_id,
            ),
            None => {
                ledger.bind_name(&product.product_id, name, establishment_id)?;
                None
            }
        };

        info!(
            product_id = %product.product_id,
            normalized_name = %product.normalized_name,
            code = ?code.map(|c| &c.code),
            establishment_id,
            "Minted new canonical product"
        );
        Ok(Match {
            outcome: ResolutionOutcome::NewIdentity,
            product_id: product.product_id,
            variant_id,
            score: None,
        })
    }

    /// Make `code` the product's principal code unless another product
    /// already has it.
    fn claim_universal_code(&self, product_id: &str, code: &str) -> ResolverResult<()> {
        if self.db.get_product_by_universal_code(code)?.is_none() {
            self.db.set_universal_code_if_missing(product_id, code)?;
        }
        Ok(())
    }

    /// Write the receipt binding and build the result.
    fn finish(
        &self,
        receipt_id: Option<&str>,
        item: &LineItem,
        code: Option<&ClassifiedCode>,
        name: &str,
        matched: Match,
        duplicates: Vec<ScoredCandidate>,
    ) -> ResolverResult<ResolutionResult> {
        let mut binding = ReceiptLineBinding::new(receipt_id, item, matched.outcome);
        binding.product_id = Some(matched.product_id.clone());
        binding.variant_id = matched.variant_id.clone();
        binding.score = matched.score;
        self.db.insert_binding(&binding)?;

        Ok(ResolutionResult {
            outcome: matched.outcome,
            canonical_product_id: Some(matched.product_id),
            variant_id: matched.variant_id,
            binding_id: Some(binding.binding_id),
            score: matched.score,
            normalized_name: name.to_string(),
            code: code.cloned(),
            duplicate_candidates: duplicates,
        })
    }

    /// Queue the line for review and write an unbound binding.
    fn record_unresolvable(
        &self,
        receipt_id: Option<&str>,
        item: &LineItem,
        code: Option<ClassifiedCode>,
        name: String,
        reason: &str,
    ) -> ResolverResult<ResolutionResult> {
        warn!(
            establishment_id = %item.establishment_id,
            raw_code = ?item.raw_code,
            raw_name = %item.raw_name,
            reason,
            "Unresolvable line item"
        );

        self.db.write_transaction(|db| -> ResolverResult<ResolutionResult> {
            if let Some(existing) = self.existing_binding(receipt_id, item)? {
                return Ok(result_from_binding(existing, &name, code.as_ref()));
            }

            self.queue_review(ReviewReason::Unresolvable, receipt_id, item, None, Vec::new())?;
            let binding = ReceiptLineBinding::new(receipt_id, item, ResolutionOutcome::Unresolvable);
            db.insert_binding(&binding)?;

            let mut result = ResolutionResult::unresolvable(name.clone(), code.clone());
            result.binding_id = Some(binding.binding_id);
            Ok(result)
        })
    }

    fn queue_review(
        &self,
        reason: ReviewReason,
        receipt_id: Option<&str>,
        item: &LineItem,
        product_id: Option<&str>,
        candidates: Vec<ScoredCandidate>,
    ) -> ResolverResult<()> {
        let review = ReviewItem {
            review_id: uuid::Uuid::new_v4().to_string(),
            reason,
            receipt_id: receipt_id.map(str::to_string),
            line_index: item.line_index,
            establishment_id: item.establishment_id.clone(),
            raw_code: item.raw_code.clone(),
            raw_name: item.raw_name.clone(),
            product_id: product_id.map(str::to_string),
            candidates,
            resolved: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.db.insert_review(&review)?;
        debug!(review_id = %review.review_id, reason = reason.as_str(), "Queued for review");
        Ok(())
    }

    fn existing_binding(&self, receipt_id: Option<&str>, item: &LineItem) -> ResolverResult<Option<ReceiptLineBinding>> {
        match receipt_id {
            Some(receipt_id) => Ok(self.db.find_binding_for_line(receipt_id, item.line_index)?),
            None => Ok(None),
        }
    }
}

fn result_from_binding(binding: ReceiptLineBinding, name: &str, code: Option<&ClassifiedCode>) -> ResolutionResult {
    ResolutionResult {
        outcome: binding.outcome,
        canonical_product_id: binding.product_id,
        variant_id: binding.variant_id,
        binding_id: Some(binding.binding_id),
        score: binding.score,
        normalized_name: name.to_string(),
        code: code.cloned(),
        duplicate_candidates: Vec::new(),
    }
}
