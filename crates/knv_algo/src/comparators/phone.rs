//! Phone comparator: digits only, canonicalized to E.164 with a US
//! default, exact on the canonical form. Values that do not reach ten
//! digits canonicalize to nothing and are treated as missing.

use super::exact_outcome;
use crate::ComparatorOutcome;

/// Canonical E.164 form, or `None` for values with fewer than ten digits.
pub fn canonicalize(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        Some(format!("+{digits}"))
    } else if digits.len() == 10 {
        Some(format!("+1{digits}"))
    } else if digits.len() > 10 {
        Some(format!("+{digits}"))
    } else {
        None
    }
}

pub fn compare(a: &str, b: &str) -> Option<ComparatorOutcome> {
    let (ca, cb) = (canonicalize(a)?, canonicalize(b)?);
    Some(exact_outcome(ca == cb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::spec::AgreementLevel;

    #[test]
    fn us_defaults_and_punctuation() {
        assert_eq!(canonicalize("(415) 555-0199").as_deref(), Some("+14155550199"));
        assert_eq!(canonicalize("1-415-555-0199").as_deref(), Some("+14155550199"));
        assert_eq!(canonicalize("+44 20 7946 0958").as_deref(), Some("+442079460958"));
    }

    #[test]
    fn short_values_canonicalize_to_nothing() {
        assert_eq!(canonicalize("555-0199"), None);
        assert!(compare("555-0199", "415-555-0199").is_none());
    }

    #[test]
    fn formats_converge_to_exact() {
        let out = compare("(415) 555-0199", "14155550199").unwrap();
        assert_eq!(out.level, AgreementLevel::Exact);
    }
}
