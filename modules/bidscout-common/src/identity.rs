//! Canonical search identity derivation.
//!
//! Two listings describing the same real-world product must normalize to the
//! same identity — this string is the only key used for caching and
//! cross-listing aggregation anywhere downstream. Splitting one logical
//! product into two identities silently splits its market in half.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BidscoutError;

/// "2. Generation", "(2.Gen)" — German dotted notation.
static GEN_DOTTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\s*\b(\d+)\s*\.\s*gen(?:eration)?\b\s*\)?").unwrap());
/// "2nd Gen", "3rd generation".
static GEN_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\s*(?:st|nd|rd|th)[\s.\-]*gen(?:eration)?\b").unwrap());
/// "Gen 2", "Generation 2" — also matches the canonical "gen2", keeping
/// the rewrite idempotent.
static GEN_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgen(?:eration)?[\s.]*(\d+)\b").unwrap());

/// "64GB", "1TB" storage variant tokens.
static STORAGE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:gb|tb|mb)$").unwrap());

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Condition qualifiers, colors and filler words that vary between listings
/// of the same product. German and English — the source marketplace mixes both.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // condition
        "new", "neu", "neuwertig", "used", "gebraucht", "refurbished", "defekt", "defect",
        "broken", "mint", "sealed", "ovp", "boxed", "top", "zustand", "guter", "gut", "sehr",
        "original", "originalverpackt",
        // filler
        "mit", "inkl", "incl", "inklusive", "und", "and", "the", "for", "für", "von", "plus",
        "rechnung", "garantie", "versand", "abholung", "angebot", "rar", "selten",
        // colors
        "black", "schwarz", "white", "weiss", "weiß", "blue", "blau", "red", "rot", "gray",
        "grey", "grau", "spacegrau", "silver", "silber", "gold", "green", "grün", "gruen",
        "pink", "rosa", "purple", "lila", "yellow", "gelb", "midnight", "starlight",
        "mitternacht", "polarstern",
    ]
    .into_iter()
    .collect()
});

/// Canonical, noise-resistant product identity. The sole aggregation and
/// caching key (see the cache layer and price resolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchIdentity(String);

impl SearchIdentity {
    /// Derive the canonical identity from a raw listing title.
    ///
    /// Deterministic, pure, idempotent: `derive(derive(x)) == derive(x)`.
    pub fn derive(raw_title: &str) -> Result<Self, BidscoutError> {
        let lower = raw_title.to_lowercase();

        // Multi-word condition phrases go first, before tokenization splits them.
        let lower = lower
            .replace("like new", " ")
            .replace("like-new", " ")
            .replace("wie neu", " ");

        // Unify generation notation into a single canonical token.
        let unified = GEN_DOTTED.replace_all(&lower, " gen$1 ");
        let unified = GEN_ORDINAL.replace_all(&unified, " gen$1 ");
        let unified = GEN_PREFIX.replace_all(&unified, " gen$1 ");

        let spaced = NON_WORD.replace_all(&unified, " ");

        let tokens: Vec<&str> = spaced
            .split_whitespace()
            .filter(|t| !STOPWORDS.contains(t))
            .filter(|t| !STORAGE_TOKEN.is_match(t))
            .collect();

        let canonical = tokens.join(" ");
        if canonical.len() < 3 {
            return Err(BidscoutError::IdentityAmbiguous(raw_title.to_string()));
        }

        Ok(Self(canonical))
    }

    /// Fallback identity for titles that would not normalize. Keyed by the
    /// listing id so it can never merge with another listing's market.
    pub fn singleton(listing_id: &str) -> Self {
        Self(format!("listing:{listing_id}"))
    }

    /// Derive, falling back to a singleton identity on ambiguity.
    pub fn derive_or_singleton(raw_title: &str, listing_id: &str) -> Self {
        Self::derive(raw_title).unwrap_or_else(|_| Self::singleton(listing_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SearchIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let titles = [
            "Apple AirPods Pro 2nd Gen — NEU & OVP!",
            "Sony WH-1000XM4, schwarz, wie neu",
            "Nintendo Switch OLED weiß + 3 Spiele",
            "iPad Air (4. Generation) 64GB Spacegrau",
        ];
        for title in titles {
            let once = SearchIdentity::derive(title).unwrap();
            let twice = SearchIdentity::derive(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {title:?}");
        }
    }

    #[test]
    fn generation_notations_unify() {
        let a = SearchIdentity::derive("AirPods Pro 2nd Gen").unwrap();
        let b = SearchIdentity::derive("AirPods Pro (2. Generation)").unwrap();
        let c = SearchIdentity::derive("airpods pro gen 2").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "airpods pro gen2");
    }

    #[test]
    fn condition_and_color_variants_unify() {
        let a = SearchIdentity::derive("Sony WH-1000XM4 NEU schwarz OVP").unwrap();
        let b = SearchIdentity::derive("sony wh-1000xm4 gebraucht, silber").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn storage_variants_unify() {
        let a = SearchIdentity::derive("iPhone 13 128GB").unwrap();
        let b = SearchIdentity::derive("iPhone 13 256GB").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn brand_and_model_tokens_survive() {
        let id = SearchIdentity::derive("Bosch GSR 12V-15 Akkuschrauber").unwrap();
        assert!(id.as_str().contains("bosch"));
        assert!(id.as_str().contains("gsr"));
        assert!(id.as_str().contains("12v"));
    }

    #[test]
    fn empty_or_noise_only_title_is_ambiguous() {
        assert!(SearchIdentity::derive("").is_err());
        assert!(SearchIdentity::derive("NEU OVP TOP!!!").is_err());
    }

    #[test]
    fn singleton_fallback_is_listing_scoped() {
        let id = SearchIdentity::derive_or_singleton("!!", "abc-123");
        assert_eq!(id.as_str(), "listing:abc-123");
    }
}
