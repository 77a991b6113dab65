//! Property tests for normalization, similarity and classification.

use proptest::prelude::*;

use pantry_ledger_core::models::CodeKind;
use pantry_ledger_core::resolver::{classify, similarity, Normalizer};

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(raw in "\\PC{0,40}") {
        let normalizer = Normalizer::new();
        let once = normalizer.normalize(&raw);
        prop_assert_eq!(normalizer.normalize(&once), once);
    }

    #[test]
    fn prop_normalized_names_are_plain(raw in "\\PC{0,40}") {
        let normalized = Normalizer::new().normalize(&raw);
        prop_assert_eq!(normalized.trim(), normalized.as_str());
        prop_assert!(!normalized.contains("  "));
    }

    #[test]
    fn prop_similarity_is_symmetric(a in "[a-z0-9 ]{0,30}", b in "[a-z0-9 ]{0,30}") {
        prop_assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn prop_similarity_is_bounded(a in "[a-z0-9 ]{0,30}", b in "[a-z0-9 ]{0,30}") {
        let score = similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn prop_similarity_is_reflexive(a in "[a-z0-9 ]{0,30}") {
        prop_assert_eq!(similarity(&a, &a), 1.0);
    }

    #[test]
    fn prop_leading_zeros_keep_universal_key(digits in "[1-9][0-9]{7,12}", zeros in 0usize..3) {
        let padded = format!("{}{}", "0".repeat(zeros), digits);
        let code = classify(Some(padded.as_str())).unwrap();
        prop_assert_eq!(code.kind, CodeKind::Universal);
        prop_assert_eq!(code.code, digits);
    }

    #[test]
    fn prop_short_codes_are_store_local(digits in "[1-9][0-9]{0,5}") {
        let code = classify(Some(digits.as_str())).unwrap();
        prop_assert_eq!(code.kind, CodeKind::StoreLocal);
    }
}
