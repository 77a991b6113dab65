//! Product name normalizer.
//!
//! Handles:
//! - Case and diacritic folding (LECHE ÁLPINA → leche alpina)
//! - OCR digit/letter confusion inside words (AC3ITE stays, ACE1TE → acelte, AZ0CAR → azocar)
//! - Abbreviation expansion (lech → leche, desl → deslactosada)
//! - Filler removal (oferta, promo, und, x)
//! - Quantity canonicalization (500 GR → 500g, 1,5 LT → 1.5l)
//!
//! The output is idempotent: normalizing a normalized name returns it
//! unchanged. Custom dictionary entries are checked against that.

use std::collections::{HashMap, HashSet};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::{ConfigError, ResolverConfig};

/// Normalizer for product names read off receipts.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Abbreviation map: truncated token → expansion
    abbreviations: HashMap<String, String>,
    /// Tokens that never carry identity
    filler_words: HashSet<String>,
    /// Unit spellings: spelling → canonical unit
    units: HashMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Create a new normalizer with default mappings.
    pub fn new() -> Self {
        Self {
            abbreviations: Self::default_abbreviations(),
            filler_words: Self::default_filler_words(),
            units: Self::default_units(),
        }
    }

    /// Create a normalizer with the extra dictionary entries of `config`.
    pub fn with_config(config: &ResolverConfig) -> Result<Self, ConfigError> {
        let mut normalizer = Self::new();
        // Sorted so a rejected entry is reported the same way every time
        let mut abbreviations: Vec<_> = config.abbreviations.iter().collect();
        abbreviations.sort();
        for (abbreviation, expansion) in abbreviations {
            normalizer.add_abbreviation(abbreviation, expansion)?;
        }
        for word in &config.filler_words {
            normalizer.add_filler_word(word)?;
        }
        Ok(normalizer)
    }

    /// Normalize a raw product name.
    ///
    /// Returns an empty string when nothing usable is left.
    pub fn normalize(&self, raw: &str) -> String {
        let folded = fold(raw);

        let expanded: Vec<String> = folded
            .split_whitespace()
            .map(repair_ocr_token)
            .flat_map(|token| match self.abbreviations.get(&token) {
                Some(expansion) => expansion.split_whitespace().map(str::to_string).collect(),
                None => vec![token],
            })
            .filter(|token| !self.filler_words.contains(token))
            .collect();

        self.merge_quantities(expanded).join(" ")
    }

    /// Expand a single abbreviation, if known.
    pub fn expand_abbreviation(&self, token: &str) -> Option<&str> {
        self.abbreviations.get(token).map(String::as_str)
    }

    /// Canonical unit for a unit spelling, if known.
    pub fn canonical_unit(&self, unit: &str) -> Option<&str> {
        self.units.get(unit).map(String::as_str)
    }

    /// Check whether a token is dropped as filler.
    pub fn is_filler(&self, token: &str) -> bool {
        self.filler_words.contains(token)
    }

    /// Add a custom abbreviation.
    ///
    /// Rejected when the entry would make normalization non-idempotent: the
    /// abbreviation must be a single clean token that is not a unit or filler
    /// word, and the expansion must be clean words that are neither
    /// abbreviations, units, nor filler.
    pub fn add_abbreviation(&mut self, abbreviation: &str, expansion: &str) -> Result<(), ConfigError> {
        let key = fold(abbreviation);
        let value = fold(expansion);

        if key.is_empty() || key.contains(' ') || repair_ocr_token(&key) != key {
            return Err(ConfigError::Invalid(format!(
                "abbreviation '{}' must be a single word",
                abbreviation
            )));
        }
        // Digits make a key look like a quantity once units are glued on
        if key.chars().any(|c| c.is_numeric()) {
            return Err(ConfigError::Invalid(format!(
                "abbreviation '{}' must not contain digits",
                abbreviation
            )));
        }
        if self.units.contains_key(&key) || self.filler_words.contains(&key) {
            return Err(ConfigError::Invalid(format!(
                "abbreviation '{}' collides with a unit or filler word",
                abbreviation
            )));
        }
        if self
            .abbreviations
            .values()
            .any(|existing| existing.split_whitespace().any(|word| word == key))
        {
            return Err(ConfigError::Invalid(format!(
                "abbreviation '{}' is already an expansion word",
                abbreviation
            )));
        }
        if value.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "expansion for '{}' is empty",
                abbreviation
            )));
        }
        for word in value.split_whitespace() {
            let clean = word.chars().all(|c| c.is_alphabetic());
            if !clean
                || word == key
                || self.abbreviations.contains_key(word)
                || self.units.contains_key(word)
                || self.filler_words.contains(word)
            {
                return Err(ConfigError::Invalid(format!(
                    "expansion word '{}' for '{}' is not stable",
                    word, abbreviation
                )));
            }
        }

        self.abbreviations.insert(key, value);
        Ok(())
    }

    /// Add a custom filler word.
    pub fn add_filler_word(&mut self, word: &str) -> Result<(), ConfigError> {
        let word = fold(word);
        if word.is_empty() || word.contains(' ') || word.chars().any(|c| c.is_numeric()) {
            return Err(ConfigError::Invalid(format!(
                "filler word '{}' must be a single word without digits",
                word
            )));
        }
        if self.abbreviations.contains_key(&word) {
            return Err(ConfigError::Invalid(format!(
                "filler word '{}' is an abbreviation",
                word
            )));
        }
        self.filler_words.insert(word);
        Ok(())
    }

    /// Glue numbers to the unit that follows them and canonicalize glued
    /// quantities.
    fn merge_quantities(&self, tokens: Vec<String>) -> Vec<String> {
        let mut merged = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            if is_number(&token) {
                let unit = iter.peek().and_then(|next| self.units.get(next)).cloned();
                if let Some(unit) = unit {
                    iter.next();
                    merged.push(format!("{}{}", token, unit));
                    continue;
                }
                merged.push(token);
            } else if let Some(quantity) = self.canonical_quantity(&token) {
                merged.push(quantity);
            } else {
                merged.push(token);
            }
        }
        merged
    }

    /// Canonicalize a glued quantity like `500grs`.
    fn canonical_quantity(&self, token: &str) -> Option<String> {
        let split = token.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        let (number, unit) = token.split_at(split);
        if !is_number(number) {
            return None;
        }
        self.units
            .get(unit)
            .map(|canonical| format!("{}{}", number, canonical))
    }

    /// Default retail abbreviations.
    fn default_abbreviations() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Dairy
        map.insert("lech".into(), "leche".into());
        map.insert("desl".into(), "deslactosada".into());
        map.insert("deslac".into(), "deslactosada".into());
        map.insert("ent".into(), "entera".into());
        map.insert("semid".into(), "semidescremada".into());
        map.insert("qso".into(), "queso".into());
        map.insert("yog".into(), "yogurt".into());
        map.insert("mant".into(), "mantequilla".into());
        map.insert("marg".into(), "margarina".into());
        map.insert("crem".into(), "crema".into());

        // Pantry
        map.insert("arr".into(), "arroz".into());
        map.insert("ac".into(), "aceite".into());
        map.insert("acte".into(), "aceite".into());
        map.insert("azuc".into(), "azucar".into());
        map.insert("harin".into(), "harina".into());
        map.insert("gall".into(), "galletas".into());
        map.insert("choc".into(), "chocolate".into());
        map.insert("chocol".into(), "chocolate".into());
        map.insert("spag".into(), "spaghetti".into());
        map.insert("huev".into(), "huevos".into());

        // Meat and produce
        map.insert("poll".into(), "pollo".into());
        map.insert("salch".into(), "salchicha".into());
        map.insert("jam".into(), "jamon".into());
        map.insert("tom".into(), "tomate".into());
        map.insert("zanah".into(), "zanahoria".into());
        map.insert("ceb".into(), "cebolla".into());

        // Drinks
        map.insert("beb".into(), "bebida".into());
        map.insert("gaseo".into(), "gaseosa".into());
        map.insert("cerv".into(), "cerveza".into());

        // Household
        map.insert("det".into(), "detergente".into());
        map.insert("deterg".into(), "detergente".into());
        map.insert("hig".into(), "higienico".into());
        map.insert("jab".into(), "jabon".into());
        map.insert("suav".into(), "suavizante".into());
        map.insert("blanq".into(), "blanqueador".into());
        map.insert("desod".into(), "desodorante".into());

        // Truncated brands
        map.insert("alp".into(), "alpina".into());
        map.insert("colomb".into(), "colombina".into());
        map.insert("nestl".into(), "nestle".into());

        map
    }

    /// Default filler words (promotions and packaging noise).
    fn default_filler_words() -> HashSet<String> {
        [
            "x", "und", "unid", "unidad", "unidades", "un", "oferta", "promo",
            "promocion", "precio", "especial", "gratis", "lleve", "pague",
            "desc", "descuento", "ahorro", "nuevo", "nueva",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    /// Default unit spellings.
    fn default_units() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Mass
        for spelling in ["g", "gr", "grs", "grm", "gramo", "gramos"] {
            map.insert(spelling.into(), "g".into());
        }
        for spelling in ["kg", "kgs", "kilo", "kilos", "kilogramo", "kilogramos"] {
            map.insert(spelling.into(), "kg".into());
        }
        map.insert("mg".into(), "mg".into());
        for spelling in ["lb", "lbs", "libra", "libras"] {
            map.insert(spelling.into(), "lb".into());
        }
        map.insert("oz".into(), "oz".into());

        // Volume
        for spelling in ["ml", "mls", "cc", "mililitro", "mililitros"] {
            map.insert(spelling.into(), "ml".into());
        }
        for spelling in ["l", "lt", "lts", "ltr", "litro", "litros"] {
            map.insert(spelling.into(), "l".into());
        }

        // Length (paper rolls, foil)
        for spelling in ["m", "mt", "mts", "metro", "metros"] {
            map.insert(spelling.into(), "m".into());
        }

        map
    }
}

/// Lowercase, strip diacritics, and replace everything that is not a letter,
/// digit, or decimal separator with spaces.
fn fold(raw: &str) -> String {
    let lowered: String = raw.nfd().flat_map(char::to_lowercase).collect();
    let chars: Vec<char> = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();

    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if matches!(c, '.' | ',')
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
        {
            out.push('.');
        } else {
            out.push(' ');
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace OCR digit/letter confusions: a 0, 1 or 5 between two letters.
fn repair_ocr_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if !chars.iter().any(|c| matches!(c, '0' | '1' | '5')) {
        return token.to_string();
    }

    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let between_letters = i > 0
                && chars[i - 1].is_alphabetic()
                && chars.get(i + 1).is_some_and(|n| n.is_alphabetic());
            match c {
                '0' if between_letters => 'o',
                '1' if between_letters => 'l',
                '5' if between_letters => 's',
                other => other,
            }
        })
        .collect()
}

/// A plain number, optionally with decimal points between digits.
fn is_number(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_diacritics() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("AZÚCAR Manuelita"), "azucar manuelita");
        assert_eq!(normalizer.normalize("Piñitas"), "pinitas");
        assert_eq!(normalizer.normalize("  JABÓN   REY  "), "jabon rey");
    }

    #[test]
    fn test_punctuation_becomes_space() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("GALLETA*SALTINAS/NOEL"), "galleta saltinas noel");
        assert_eq!(normalizer.normalize("***"), "");
    }

    #[test]
    fn test_ocr_repair() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("AZ0CAR"), "azocar");
        assert_eq!(normalizer.normalize("ACE1TE"), "acelte");
        assert_eq!(normalizer.normalize("MAN5O"), "manso");
        // Digits next to digits or at word edges are left alone
        assert_eq!(normalizer.normalize("COCA 1500"), "coca 1500");
        assert_eq!(normalizer.normalize("A1"), "a1");
    }

    #[test]
    fn test_abbreviation_expansion() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("LECH ENT ALP"), "leche entera alpina");
        assert_eq!(normalizer.normalize("ARR DIANA"), "arroz diana");
        assert_eq!(normalizer.expand_abbreviation("desl"), Some("deslactosada"));
        assert_eq!(normalizer.expand_abbreviation("leche"), None);
    }

    #[test]
    fn test_filler_dropped() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("OFERTA ARROZ DIANA X 3 UND"), "arroz diana 3");
        assert!(normalizer.is_filler("promo"));
    }

    #[test]
    fn test_quantities_preserved_and_canonical() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("PAN TAJADO 550 GR"), "pan tajado 550g");
        assert_eq!(normalizer.normalize("PAN TAJADO 550GRS"), "pan tajado 550g");
        assert_eq!(normalizer.normalize("ACEITE 1,5 LT"), "aceite 1.5l");
        assert_eq!(normalizer.normalize("LECHE 1100ML"), "leche 1100ml");
        assert_eq!(normalizer.canonical_unit("kilos"), Some("kg"));
    }

    #[test]
    fn test_pack_sizes_disambiguate() {
        let normalizer = Normalizer::new();
        assert_ne!(
            normalizer.normalize("LECHE ENTERA 1 LT"),
            normalizer.normalize("LECHE ENTERA 400 ML")
        );
    }

    #[test]
    fn test_idempotent_examples() {
        let normalizer = Normalizer::new();
        for raw in [
            "LECH DESL ALP 1,1 LT",
            "harina haz de oro",
            "5 x l",
            "ACE1TE 0LEO 3000 CC",
            "Té Hindú 20 und",
            "1..5 kg",
        ] {
            let once = normalizer.normalize(raw);
            assert_eq!(normalizer.normalize(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_custom_abbreviation() {
        let mut normalizer = Normalizer::new();
        normalizer.add_abbreviation("pnl", "panela").unwrap();
        assert_eq!(normalizer.normalize("PNL LA PREFERIDA"), "panela la preferida");
    }

    #[test]
    fn test_unstable_abbreviations_rejected() {
        let mut normalizer = Normalizer::new();
        // Key already an expansion word
        assert!(normalizer.add_abbreviation("leche", "leche entera").is_err());
        // Expansion word is itself an abbreviation
        assert!(normalizer.add_abbreviation("lc", "lech").is_err());
        // Collides with a unit
        assert!(normalizer.add_abbreviation("lt", "litro").is_err());
        // Expansion contains a unit or filler
        assert!(normalizer.add_abbreviation("pk", "pack x").is_err());
        assert!(normalizer.add_abbreviation("", "vacio").is_err());
        assert!(normalizer.add_abbreviation("two words", "x").is_err());
        // Looks like a quantity after a first pass
        assert!(normalizer.add_abbreviation("500g", "medio").is_err());
        assert!(normalizer.add_abbreviation("500", "medio").is_err());
        assert!(normalizer.add_abbreviation("x2", "doble").is_err());
        assert_eq!(normalizer.normalize("ARROZ 500 GR"), "arroz 500g");
        assert_eq!(normalizer.normalize("arroz 500g"), "arroz 500g");
    }

    #[test]
    fn test_custom_filler() {
        let mut normalizer = Normalizer::new();
        normalizer.add_filler_word("combo").unwrap();
        assert_eq!(normalizer.normalize("COMBO ARROZ"), "arroz");
        assert!(normalizer.add_filler_word("lech").is_err());
        assert!(normalizer.add_filler_word("500g").is_err());
        assert_eq!(normalizer.normalize("ARROZ 500 GR"), "arroz 500g");
    }
}
