//! Resolution models for the identity resolver.

use serde::{Deserialize, Serialize};

use super::product::CodeKind;

/// A code after classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClassifiedCode {
    pub kind: CodeKind,
    /// Normalized code (separators removed, leading zeros stripped)
    pub code: String,
}

/// Which resolution stage produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A recorded correction matched the raw inputs
    LearnedOverride,
    /// The universal code is already in the ledger
    UniversalMatch,
    /// The store-scoped code (or name, for code-less items) is already bound
    LocalMatch,
    /// Fuzzy name fallback found an acceptable existing product
    FuzzyMatch,
    /// A new canonical product was minted
    NewIdentity,
    /// Nothing usable to resolve; flagged for manual review
    Unresolvable,
}

impl ResolutionOutcome {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionOutcome::LearnedOverride => "learned_override",
            ResolutionOutcome::UniversalMatch => "universal_match",
            ResolutionOutcome::LocalMatch => "local_match",
            ResolutionOutcome::FuzzyMatch => "fuzzy_match",
            ResolutionOutcome::NewIdentity => "new_identity",
            ResolutionOutcome::Unresolvable => "unresolvable",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learned_override" => Some(ResolutionOutcome::LearnedOverride),
            "universal_match" => Some(ResolutionOutcome::UniversalMatch),
            "local_match" => Some(ResolutionOutcome::LocalMatch),
            "fuzzy_match" => Some(ResolutionOutcome::FuzzyMatch),
            "new_identity" => Some(ResolutionOutcome::NewIdentity),
            "unresolvable" => Some(ResolutionOutcome::Unresolvable),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing product scored against a normalized name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub product_id: String,
    /// The product's normalized name
    pub normalized_name: String,
    /// Similarity score (0.0 - 1.0)
    pub score: f64,
    /// Whether the candidate came from the establishment's own history
    pub same_establishment: bool,
}

/// Two canonical products whose names look alike.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicatePair {
    pub first_product_id: String,
    pub first_name: String,
    pub second_product_id: String,
    pub second_name: String,
    pub score: f64,
    /// Both products own a universal code, and the codes differ
    pub conflicting_codes: bool,
}

/// Result of resolving one line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionResult {
    pub outcome: ResolutionOutcome,
    pub canonical_product_id: Option<String>,
    pub variant_id: Option<String>,
    /// Binding written for the line, if any
    pub binding_id: Option<String>,
    /// Fuzzy score, for fuzzy matches
    pub score: Option<f64>,
    pub normalized_name: String,
    pub code: Option<ClassifiedCode>,
    /// Candidate duplicates surfaced for review (above the duplicate threshold,
    /// below the accept threshold)
    pub duplicate_candidates: Vec<ScoredCandidate>,
}

impl ResolutionResult {
    /// An unresolvable result.
    pub fn unresolvable(normalized_name: String, code: Option<ClassifiedCode>) -> Self {
        Self {
            outcome: ResolutionOutcome::Unresolvable,
            canonical_product_id: None,
            variant_id: None,
            binding_id: None,
            score: None,
            normalized_name,
            code,
            duplicate_candidates: Vec::new(),
        }
    }

    /// Check if the line should be looked at by a human.
    pub fn needs_review(&self) -> bool {
        matches!(self.outcome, ResolutionOutcome::Unresolvable)
            || !self.duplicate_candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        for outcome in [
            ResolutionOutcome::LearnedOverride,
            ResolutionOutcome::UniversalMatch,
            ResolutionOutcome::LocalMatch,
            ResolutionOutcome::FuzzyMatch,
            ResolutionOutcome::NewIdentity,
            ResolutionOutcome::Unresolvable,
        ] {
            assert_eq!(ResolutionOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(ResolutionOutcome::parse("approved"), None);
    }

    #[test]
    fn test_unresolvable_needs_review() {
        let result = ResolutionResult::unresolvable(String::new(), None);
        assert!(result.canonical_product_id.is_none());
        assert!(result.needs_review());
    }

    #[test]
    fn test_duplicates_need_review() {
        let mut result = ResolutionResult::unresolvable("arroz".into(), None);
        result.outcome = ResolutionOutcome::NewIdentity;
        result.canonical_product_id = Some("p1".into());
        assert!(!result.needs_review());

        result.duplicate_candidates.push(ScoredCandidate {
            product_id: "p0".into(),
            normalized_name: "arroz diana".into(),
            score: 0.74,
            same_establishment: false,
        });
        assert!(result.needs_review());
    }
}
