//! Variant ledger: who owns each code.
//!
//! Universal codes have one owner everywhere. Store-local codes have one owner
//! per establishment and are never looked up across establishments. Code-less
//! items are tracked by `(establishment, normalized name)` the same way.

use tracing::debug;

use crate::db::Database;
use crate::models::{ClassifiedCode, CodeKind, NameBinding, ProductVariant};

use super::{ResolverError, ResolverResult};

/// Ledger view over the database.
pub struct VariantLedger<'a> {
    db: &'a Database,
}

impl<'a> VariantLedger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Store-local code at one establishment.
    pub fn lookup(&self, establishment_id: &str, code: &str) -> ResolverResult<Option<ProductVariant>> {
        Ok(self.db.find_local_variant(establishment_id, code)?)
    }

    /// Universal code, wherever it was seen.
    pub fn lookup_universal(&self, code: &str) -> ResolverResult<Option<ProductVariant>> {
        Ok(self.db.find_universal_variant(code)?)
    }

    /// Look up a classified code with the scope its kind requires.
    pub fn lookup_code(&self, establishment_id: &str, code: &ClassifiedCode) -> ResolverResult<Option<ProductVariant>> {
        match code.kind {
            CodeKind::Universal => self.lookup_universal(&code.code),
            CodeKind::StoreLocal => self.lookup(establishment_id, &code.code),
        }
    }

    /// Bind a code to a product.
    ///
    /// Binding a key to the product that already owns it counts as another
    /// observation. A key owned by a different product is a conflict.
    pub fn bind(
        &self,
        product_id: &str,
        code: &ClassifiedCode,
        name_seen: &str,
        establishment_id: &str,
    ) -> ResolverResult<ProductVariant> {
        if let Some(existing) = self.lookup_code(establishment_id, code)? {
            if existing.product_id != product_id {
                return Err(ResolverError::ConflictingBinding(format!(
                    "{} code {} is bound to {}",
                    code.kind, code.code, existing.product_id
                )));
            }
            self.bump(&existing)?;
            return Ok(existing);
        }

        let variant = ProductVariant::new(
            product_id.to_string(),
            code.code.clone(),
            code.kind,
            name_seen.to_string(),
            establishment_id.to_string(),
        );
        self.db.insert_variant(&variant).map_err(|err| {
            if err.is_conflict() {
                ResolverError::ConflictingBinding(format!("{} code {}", code.kind, code.code))
            } else {
                err.into()
            }
        })?;

        debug!(
            variant_id = %variant.variant_id,
            product_id,
            code = %code.code,
            kind = %code.kind,
            establishment_id,
            "Bound code"
        );
        Ok(variant)
    }

    /// Record another observation of a variant.
    pub fn bump(&self, variant: &ProductVariant) -> ResolverResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.db.bump_variant(&variant.variant_id, &now)?;
        Ok(())
    }

    /// Product bound to a code-less name at one establishment.
    pub fn lookup_name(&self, establishment_id: &str, name_key: &str) -> ResolverResult<Option<NameBinding>> {
        Ok(self.db.find_name_binding(establishment_id, name_key)?)
    }

    /// Bind a code-less name to a product, with the same ownership rules as
    /// [`VariantLedger::bind`].
    pub fn bind_name(&self, product_id: &str, name_key: &str, establishment_id: &str) -> ResolverResult<NameBinding> {
        if let Some(existing) = self.lookup_name(establishment_id, name_key)? {
            if existing.product_id != product_id {
                return Err(ResolverError::ConflictingBinding(format!(
                    "name '{}' at {} is bound to {}",
                    name_key, establishment_id, existing.product_id
                )));
            }
            self.bump_name(&existing)?;
            return Ok(existing);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let binding = NameBinding {
            establishment_id: establishment_id.to_string(),
            name_key: name_key.to_string(),
            product_id: product_id.to_string(),
            observation_count: 1,
            first_seen: now.clone(),
            last_seen: now,
        };
        self.db.insert_name_binding(&binding).map_err(|err| {
            if err.is_conflict() {
                ResolverError::ConflictingBinding(format!("name '{}' at {}", name_key, establishment_id))
            } else {
                err.into()
            }
        })?;
        Ok(binding)
    }

    /// Record another code-less observation.
    pub fn bump_name(&self, binding: &NameBinding) -> ResolverResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .bump_name_binding(&binding.establishment_id, &binding.name_key, &now)?;
        Ok(())
    }

    /// Move a code to another product. Only corrections do this.
    pub(crate) fn rebind(&self, variant: &ProductVariant, product_id: &str) -> ResolverResult<()> {
        self.db.rebind_variant(&variant.variant_id, product_id)?;
        debug!(
            variant_id = %variant.variant_id,
            from = %variant.product_id,
            to = product_id,
            "Rebound code"
        );
        Ok(())
    }

    /// Move code-less sightings of a name to another product.
    pub(crate) fn rebind_name(
        &self,
        name_key: &str,
        establishment_id: Option<&str>,
        product_id: &str,
    ) -> ResolverResult<usize> {
        Ok(self
            .db
            .rebind_name_bindings(name_key, establishment_id, product_id)?)
    }

    /// Every code bound to a product, most observed first.
    pub fn variants_for_product(&self, product_id: &str) -> ResolverResult<Vec<ProductVariant>> {
        Ok(self.db.list_variants_for_product(product_id)?)
    }
}
