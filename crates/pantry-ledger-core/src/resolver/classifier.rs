//! Scanned code classification.
//!
//! Decides whether a code read off a receipt is a universal barcode (EAN/UPC,
//! globally unique) or a store-assigned PLU (meaningful only at one store).

use crate::models::{ClassifiedCode, CodeKind};

/// Minimum significant digits for a universal code.
pub const MIN_UNIVERSAL_DIGITS: usize = 8;

/// GTIN widths (EAN-8, UPC-A, EAN-13, GTIN-14). Zero-padded codes of these
/// widths are universal even when fewer digits are significant.
const GTIN_WIDTHS: [usize; 4] = [8, 12, 13, 14];

/// Classify a raw code.
///
/// Returns `None` for absent, empty, or all-zero codes; such items resolve by
/// name only.
pub fn classify(raw: Option<&str>) -> Option<ClassifiedCode> {
    let raw = raw?;

    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '/'))
        .flat_map(|c| c.to_uppercase())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        // Alphanumeric codes are always store-assigned
        return Some(ClassifiedCode {
            kind: CodeKind::StoreLocal,
            code: cleaned,
        });
    }

    let significant = cleaned.trim_start_matches('0');
    if significant.is_empty() {
        return None;
    }

    let kind = if significant.len() >= MIN_UNIVERSAL_DIGITS || GTIN_WIDTHS.contains(&cleaned.len()) {
        CodeKind::Universal
    } else {
        CodeKind::StoreLocal
    };

    Some(ClassifiedCode {
        kind,
        code: significant.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(raw: &str) -> Option<CodeKind> {
        classify(Some(raw)).map(|c| c.kind)
    }

    #[test]
    fn test_ean13_is_universal() {
        let code = classify(Some("7702000112311")).unwrap();
        assert_eq!(code.kind, CodeKind::Universal);
        assert_eq!(code.code, "7702000112311");
    }

    #[test]
    fn test_short_code_is_store_local() {
        let code = classify(Some("1045")).unwrap();
        assert_eq!(code.kind, CodeKind::StoreLocal);
        assert_eq!(code.code, "1045");
    }

    #[test]
    fn test_zero_padded_gtin8_is_universal() {
        let code = classify(Some("01234567")).unwrap();
        assert_eq!(code.kind, CodeKind::Universal);
        assert_eq!(code.code, "1234567");
    }

    #[test]
    fn test_ocr_padded_plu_stays_local() {
        let code = classify(Some("0001045")).unwrap();
        assert_eq!(code.kind, CodeKind::StoreLocal);
        assert_eq!(code.code, "1045");
    }

    #[test]
    fn test_padding_does_not_change_key() {
        // UPC-A carried in EAN-13 form keeps the same ledger key
        assert_eq!(classify(Some("0012345678905")), classify(Some("12345678905")));
    }

    #[test]
    fn test_separators_removed() {
        let code = classify(Some(" 770 2000-112311 ")).unwrap();
        assert_eq!(code.code, "7702000112311");
        assert_eq!(code.kind, CodeKind::Universal);
    }

    #[test]
    fn test_alphanumeric_is_local() {
        let code = classify(Some("ab12")).unwrap();
        assert_eq!(code.kind, CodeKind::StoreLocal);
        assert_eq!(code.code, "AB12");
    }

    #[test]
    fn test_empty_codes_defer_to_name() {
        assert_eq!(classify(None), None);
        assert_eq!(classify(Some("")), None);
        assert_eq!(classify(Some("   ")), None);
        assert_eq!(classify(Some("0000")), None);
    }

    #[test]
    fn test_length_boundaries() {
        assert_eq!(kind_of("1234567"), Some(CodeKind::StoreLocal));
        assert_eq!(kind_of("12345678"), Some(CodeKind::Universal));
        assert_eq!(kind_of("123456789"), Some(CodeKind::Universal));
    }
}
