//! Fuzzy name similarity and candidate search.
//!
//! Scores are Ratcliff/Obershelp ratios over characters: `2 * M / T`, where
//! `M` counts characters matched by repeatedly taking the longest common
//! substring and `T` is the combined length. Prefix agreement (Jaro-Winkler)
//! only breaks ties between equal scores.

use std::cmp::Ordering;
use std::collections::HashSet;

use strsim::jaro_winkler;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::db::Database;
use crate::models::{CanonicalProduct, CodeKind, DuplicatePair, ScoredCandidate};

use super::ResolverResult;

/// Similarity between two normalized names, in `[0, 1]`.
///
/// Symmetric and reflexive. Two empty names are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    // Matching picks the first longest block; fix the argument order so
    // the result does not depend on it.
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * matching_chars(&a, &b)) as f64 / total as f64
}

/// Characters matched by recursive longest-common-substring.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Longest common substring as `(start_in_a, start_in_b, len)`.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        for j in 0..b.len() {
            cur[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            let run = cur[j + 1];
            if run > best.2 {
                best = (i + 1 - run, j + 1 - run, run);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

/// Outcome of the fuzzy fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzyDecision {
    /// One compatible product clearly at or above the accept threshold
    Accept(ScoredCandidate),
    /// Several products above the accept threshold with near-equal scores
    Ambiguous(Vec<ScoredCandidate>),
    /// Nothing acceptable; look-alikes above the duplicate threshold
    NoMatch { duplicates: Vec<ScoredCandidate> },
}

/// Finds existing products whose names resemble a normalized name.
pub struct SimilarityEngine<'a> {
    db: &'a Database,
    duplicate_threshold: f64,
    accept_threshold: f64,
    ambiguity_margin: f64,
    candidate_limit: usize,
}

impl<'a> SimilarityEngine<'a> {
    /// Create an engine with the thresholds of `config`.
    pub fn new(db: &'a Database, config: &ResolverConfig) -> Self {
        Self {
            db,
            duplicate_threshold: config.duplicate_threshold,
            accept_threshold: config.accept_threshold,
            ambiguity_margin: config.ambiguity_margin,
            candidate_limit: config.fts_candidate_limit,
        }
    }

    /// Score known products against `normalized_name`.
    ///
    /// Products already seen at the establishment are scored first, then a
    /// global candidate set from the name index. Only products whose code
    /// kind is compatible with `input_kind` can be accepted; incompatible
    /// look-alikes are still reported as duplicates.
    pub fn find_candidates(
        &self,
        normalized_name: &str,
        establishment_id: &str,
        input_kind: Option<CodeKind>,
    ) -> ResolverResult<FuzzyDecision> {
        if normalized_name.is_empty() {
            return Ok(FuzzyDecision::NoMatch { duplicates: Vec::new() });
        }

        let local = self.db.products_seen_at(establishment_id)?;
        let global = self
            .db
            .product_candidates(normalized_name, self.candidate_limit)?;

        let mut seen = HashSet::new();
        let mut scored = Vec::new();
        for (product, same_establishment) in local
            .into_iter()
            .map(|p| (p, true))
            .chain(global.into_iter().map(|p| (p, false)))
        {
            if !seen.insert(product.product_id.clone()) {
                continue;
            }
            let score = similarity(normalized_name, &product.normalized_name);
            if score > self.duplicate_threshold {
                scored.push(ScoredCandidate {
                    product_id: product.product_id,
                    normalized_name: product.normalized_name,
                    score,
                    same_establishment,
                });
            }
        }

        rank(&mut scored, normalized_name);

        let mut accepted = Vec::new();
        for candidate in scored.iter().filter(|c| c.score >= self.accept_threshold) {
            let kind = self.db.product_kind(&candidate.product_id)?;
            if kind.is_compatible(input_kind) {
                accepted.push(candidate.clone());
            } else {
                debug!(
                    product_id = %candidate.product_id,
                    score = candidate.score,
                    ?kind,
                    "Skipping candidate with incompatible code kind"
                );
            }
        }

        let mut accepted = accepted.into_iter();
        let Some(top) = accepted.next() else {
            return Ok(FuzzyDecision::NoMatch { duplicates: scored });
        };

        let rivals: Vec<ScoredCandidate> = accepted
            .filter(|c| top.score - c.score < self.ambiguity_margin)
            .collect();
        if rivals.is_empty() {
            Ok(FuzzyDecision::Accept(top))
        } else {
            let mut tied = vec![top];
            tied.extend(rivals);
            Ok(FuzzyDecision::Ambiguous(tied))
        }
    }

    /// Report pairs of existing products whose names score at or above
    /// `threshold`. Nothing is merged.
    pub fn find_duplicate_products(&self, threshold: f64) -> ResolverResult<Vec<DuplicatePair>> {
        let products = self.db.list_products()?;

        let mut pairs = Vec::new();
        for (i, first) in products.iter().enumerate() {
            for second in &products[i + 1..] {
                let score = similarity(&first.normalized_name, &second.normalized_name);
                if score > threshold {
                    pairs.push(duplicate_pair(first, second, score));
                }
            }
        }

        pairs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(pairs)
    }

    /// Duplicate threshold this engine reports with.
    pub fn duplicate_threshold(&self) -> f64 {
        self.duplicate_threshold
    }
}

/// Best first: score, then the establishment's own history, then prefix
/// agreement, then product ID for a stable order.
fn rank(candidates: &mut [ScoredCandidate], query: &str) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.same_establishment.cmp(&a.same_establishment))
            .then_with(|| {
                jaro_winkler(query, &b.normalized_name)
                    .partial_cmp(&jaro_winkler(query, &a.normalized_name))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
}

fn duplicate_pair(first: &CanonicalProduct, second: &CanonicalProduct, score: f64) -> DuplicatePair {
    let conflicting_codes = matches!(
        (&first.universal_code, &second.universal_code),
        (Some(a), Some(b)) if a != b
    );
    DuplicatePair {
        first_product_id: first.product_id.clone(),
        first_name: first.normalized_name.clone(),
        second_product_id: second.product_id.clone(),
        second_name: second.normalized_name.clone(),
        score,
        conflicting_codes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductVariant;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_pair() {
        let score = similarity("harina haz de oro", "marina haz o");
        assert!(approx(score, 22.0 / 29.0), "score was {}", score);
        assert!(score > 0.70 && score < 0.85);
    }

    #[test]
    fn test_identical_and_disjoint() {
        assert_eq!(similarity("leche alpina", "leche alpina"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            ("arroz diana 500g", "arroz roa 500g"),
            ("abcd", "bcda"),
            ("leche entera 1l", "leche entera 400ml"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
    }

    #[test]
    fn test_small_typos_score_high() {
        assert!(similarity("arroz diana 500g", "arroz dlana 500g") >= 0.85);
        assert!(similarity("leche entera 1l", "leche entera 400ml") < 0.85);
    }

    fn insert(db: &Database, name: &str) -> String {
        let product = CanonicalProduct::new(name.into(), name.into());
        db.insert_product(&product).unwrap();
        product.product_id
    }

    fn insert_with_code(db: &Database, name: &str, code: &str, kind: CodeKind, est: &str) -> String {
        let id = insert(db, name);
        if kind == CodeKind::Universal {
            db.set_universal_code_if_missing(&id, code).unwrap();
        }
        db.insert_variant(&ProductVariant::new(id.clone(), code.into(), kind, name.into(), est.into()))
            .unwrap();
        id
    }

    #[test]
    fn test_accepts_close_match() {
        let db = Database::open_in_memory().unwrap();
        let id = insert(&db, "arroz diana 500g");
        insert(&db, "frijol cargamanto 500g");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        match engine.find_candidates("arroz dlana 500g", "store-a", None).unwrap() {
            FuzzyDecision::Accept(candidate) => assert_eq!(candidate.product_id, id),
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_pair_is_duplicate_not_match() {
        let db = Database::open_in_memory().unwrap();
        let id = insert(&db, "harina haz de oro");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        match engine.find_candidates("marina haz o", "store-a", None).unwrap() {
            FuzzyDecision::NoMatch { duplicates } => {
                assert_eq!(duplicates.len(), 1);
                assert_eq!(duplicates[0].product_id, id);
            }
            other => panic!("expected no match, got {:?}", other),
        }
    }

    #[test]
    fn test_near_equal_candidates_are_ambiguous() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "galletas noel ducales 2");
        insert(&db, "galletas noel ducales 3");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        match engine.find_candidates("galletas noel ducales", "store-a", None).unwrap() {
            FuzzyDecision::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_universal_input_never_binds_to_other_universal_product() {
        let db = Database::open_in_memory().unwrap();
        insert_with_code(&db, "arroz diana 500g", "7702511000014", CodeKind::Universal, "store-a");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        let decision = engine
            .find_candidates("arroz diana 500g", "store-a", Some(CodeKind::Universal))
            .unwrap();
        assert!(matches!(decision, FuzzyDecision::NoMatch { ref duplicates } if duplicates.len() == 1));

        // Code-less input may still bind to it
        let decision = engine.find_candidates("arroz diana 500g", "store-a", None).unwrap();
        assert!(matches!(decision, FuzzyDecision::Accept(_)));
    }

    #[test]
    fn test_store_local_kinds_do_not_cross() {
        let db = Database::open_in_memory().unwrap();
        insert_with_code(&db, "tomate chonto", "2001", CodeKind::StoreLocal, "store-a");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        let universal = engine
            .find_candidates("tomate chonto", "store-b", Some(CodeKind::Universal))
            .unwrap();
        assert!(matches!(universal, FuzzyDecision::NoMatch { .. }));

        let local = engine
            .find_candidates("tomate chonto", "store-b", Some(CodeKind::StoreLocal))
            .unwrap();
        assert!(matches!(local, FuzzyDecision::Accept(_)));
    }

    #[test]
    fn test_establishment_history_ranks_first() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "queso campesino");
        let local = insert_with_code(&db, "queso campesino", "3003", CodeKind::StoreLocal, "store-a");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        match engine.find_candidates("queso campesino", "store-a", None).unwrap() {
            FuzzyDecision::Ambiguous(candidates) => {
                assert_eq!(candidates[0].product_id, local);
                assert!(candidates[0].same_establishment);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_find_duplicate_products() {
        let db = Database::open_in_memory().unwrap();
        insert_with_code(&db, "arroz diana 500g", "7702511000014", CodeKind::Universal, "store-a");
        insert_with_code(&db, "arroz dlana 500g", "7702511000021", CodeKind::Universal, "store-a");
        insert(&db, "detergente fab 1kg");

        let engine = SimilarityEngine::new(&db, &ResolverConfig::default());
        let pairs = engine.find_duplicate_products(engine.duplicate_threshold()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].conflicting_codes);
        assert_eq!(db.count_products().unwrap(), 3);
    }
}
