//! Learning store: confirmed corrections used as overrides.

use tracing::info;

use crate::db::Database;
use crate::models::{ClassifiedCode, CodeKind, CorrectionSource, LearnedCorrection};

use super::classifier::classify;
use super::ledger::VariantLedger;
use super::normalizer::Normalizer;
use super::{ResolverError, ResolverResult};

/// Corrections keyed on classified codes and normalized names.
pub struct LearningStore<'a> {
    db: &'a Database,
    normalizer: &'a Normalizer,
}

impl<'a> LearningStore<'a> {
    pub fn new(db: &'a Database, normalizer: &'a Normalizer) -> Self {
        Self { db, normalizer }
    }

    /// Record that `(raw_code, raw_name)` at `establishment_id` is `product_id`.
    ///
    /// Recording the same keys again replaces the target. Past receipt
    /// bindings are never touched. A code-keyed correction also moves the
    /// ledger entry for that code, and a name-only correction moves the
    /// matching code-less name bindings.
    pub fn record_correction(
        &self,
        raw_code: Option<&str>,
        raw_name: Option<&str>,
        establishment_id: Option<&str>,
        product_id: &str,
        source: CorrectionSource,
        note: Option<&str>,
    ) -> ResolverResult<LearnedCorrection> {
        let code = classify(raw_code);
        let name_key = raw_name.map(|name| self.normalizer.normalize(name)).filter(|n| !n.is_empty());

        if code.is_none() && name_key.is_none() {
            return Err(ResolverError::InvalidCorrection(
                "a correction needs a usable code or name".into(),
            ));
        }
        if code.as_ref().is_some_and(|c| c.kind == CodeKind::StoreLocal) && establishment_id.is_none() {
            return Err(ResolverError::InvalidCorrection(
                "store-local codes need an establishment".into(),
            ));
        }

        let mut correction = LearnedCorrection::new(
            code.as_ref(),
            name_key.clone(),
            establishment_id.map(str::to_string),
            product_id.to_string(),
            source,
        );
        correction.note = note.map(str::to_string);

        let stored = self.db.write_transaction(|db| -> ResolverResult<LearnedCorrection> {
            if !db.product_exists(product_id)? {
                return Err(ResolverError::UnknownProduct(product_id.to_string()));
            }
            let stored = db.upsert_correction(&correction)?;

            let ledger = VariantLedger::new(db);
            match (&code, establishment_id) {
                (Some(code), est) => rebind_code(db, &ledger, code, est, product_id)?,
                (None, est) => {
                    if let Some(name_key) = &name_key {
                        ledger.rebind_name(name_key, est, product_id)?;
                    }
                }
            }
            Ok(stored)
        })?;

        info!(
            correction_id = %stored.correction_id,
            code_key = ?stored.code_key,
            code_kind = ?stored.code_kind,
            name_key = ?stored.name_key,
            establishment_id = ?stored.establishment_id,
            product_id = %stored.product_id,
            source = stored.source.as_str(),
            "Recorded correction"
        );
        Ok(stored)
    }

    /// Most specific correction for raw inputs seen at `establishment_id`.
    pub fn lookup_override(
        &self,
        raw_code: Option<&str>,
        raw_name: Option<&str>,
        establishment_id: &str,
    ) -> ResolverResult<Option<LearnedCorrection>> {
        let code = classify(raw_code);
        let name_key = raw_name.map(|name| self.normalizer.normalize(name)).unwrap_or_default();
        self.find_override(code.as_ref(), &name_key, establishment_id)
    }

    /// Most specific correction for already classified/normalized keys.
    pub fn find_override(
        &self,
        code: Option<&ClassifiedCode>,
        name_key: &str,
        establishment_id: &str,
    ) -> ResolverResult<Option<LearnedCorrection>> {
        let name_key = Some(name_key).filter(|n| !n.is_empty());
        if code.is_none() && name_key.is_none() {
            return Ok(None);
        }
        Ok(self.db.find_correction(code, name_key, establishment_id)?)
    }

    /// All corrections, newest first.
    pub fn list_corrections(&self) -> ResolverResult<Vec<LearnedCorrection>> {
        Ok(self.db.list_corrections()?)
    }
}

/// Point a corrected code at its new product: the ledger entry and, for
/// universal codes, the principal code.
fn rebind_code(
    db: &Database,
    ledger: &VariantLedger<'_>,
    code: &ClassifiedCode,
    establishment_id: Option<&str>,
    product_id: &str,
) -> ResolverResult<()> {
    let variant = match (code.kind, establishment_id) {
        (CodeKind::Universal, _) => ledger.lookup_universal(&code.code)?,
        (CodeKind::StoreLocal, Some(est)) => ledger.lookup(est, &code.code)?,
        (CodeKind::StoreLocal, None) => None,
    };
    if let Some(variant) = variant.filter(|v| v.product_id != product_id) {
        ledger.rebind(&variant, product_id)?;
    }
    if code.kind == CodeKind::Universal {
        db.move_universal_code(&code.code, product_id)?;
    }
    Ok(())
}
