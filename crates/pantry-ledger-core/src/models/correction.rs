//! Learned corrections and the manual review queue.

use serde::{Deserialize, Serialize};

use super::product::CodeKind;
use super::resolution::{ClassifiedCode, ScoredCandidate};

/// Who confirmed a correction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionSource {
    /// A person fixed the binding
    Human,
    /// An automated validator flagged the binding
    Validator,
}

impl CorrectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionSource::Human => "human",
            CorrectionSource::Validator => "validator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(CorrectionSource::Human),
            "validator" => Some(CorrectionSource::Validator),
            _ => None,
        }
    }
}

/// A confirmed (raw code and/or raw name) → product override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedCorrection {
    pub correction_id: String,
    /// Classified code the correction applies to
    pub code_key: Option<String>,
    /// Kind of `code_key`; equal digits of different kinds are different keys
    pub code_kind: Option<CodeKind>,
    /// Normalized name the correction applies to
    pub name_key: Option<String>,
    /// Restricts the correction to one store
    pub establishment_id: Option<String>,
    /// The correct canonical product
    pub product_id: String,
    pub source: CorrectionSource,
    pub note: Option<String>,
    pub created_at: String,
}

impl LearnedCorrection {
    /// Create a correction. At least one key must be present.
    pub fn new(
        code: Option<&ClassifiedCode>,
        name_key: Option<String>,
        establishment_id: Option<String>,
        product_id: String,
        source: CorrectionSource,
    ) -> Self {
        Self {
            correction_id: uuid::Uuid::new_v4().to_string(),
            code_key: code.map(|c| c.code.clone()),
            code_kind: code.map(|c| c.kind),
            name_key,
            establishment_id,
            product_id,
            source,
            note: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Why a line item landed in the review queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Empty name and no code
    Unresolvable,
    /// Several products matched above the accept threshold with close scores
    AmbiguousFuzzyMatch,
    /// Minted a product that looks like an existing one
    CandidateDuplicate,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::Unresolvable => "unresolvable",
            ReviewReason::AmbiguousFuzzyMatch => "ambiguous_fuzzy_match",
            ReviewReason::CandidateDuplicate => "candidate_duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unresolvable" => Some(ReviewReason::Unresolvable),
            "ambiguous_fuzzy_match" => Some(ReviewReason::AmbiguousFuzzyMatch),
            "candidate_duplicate" => Some(ReviewReason::CandidateDuplicate),
            _ => None,
        }
    }
}

/// A line item waiting for a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewItem {
    pub review_id: String,
    pub reason: ReviewReason,
    pub receipt_id: Option<String>,
    pub line_index: u32,
    pub establishment_id: String,
    pub raw_code: Option<String>,
    pub raw_name: String,
    /// Product the line was bound to, if any
    pub product_id: Option<String>,
    pub candidates: Vec<ScoredCandidate>,
    pub resolved: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_keeps_code_kind() {
        let code = ClassifiedCode {
            kind: CodeKind::StoreLocal,
            code: "2001".into(),
        };
        let correction = LearnedCorrection::new(
            Some(&code),
            Some("zanahoria".into()),
            Some("store-a".into()),
            "p1".into(),
            CorrectionSource::Validator,
        );
        assert_eq!(correction.code_key.as_deref(), Some("2001"));
        assert_eq!(correction.code_kind, Some(CodeKind::StoreLocal));

        let by_name = LearnedCorrection::new(None, Some("arroz".into()), None, "p1".into(), CorrectionSource::Human);
        assert!(by_name.code_key.is_none() && by_name.code_kind.is_none());
    }

    #[test]
    fn test_reason_strings() {
        for reason in [
            ReviewReason::Unresolvable,
            ReviewReason::AmbiguousFuzzyMatch,
            ReviewReason::CandidateDuplicate,
        ] {
            assert_eq!(ReviewReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(CorrectionSource::parse("human"), Some(CorrectionSource::Human));
        assert_eq!(CorrectionSource::parse("robot"), None);
    }
}
