//! Email comparator.
//!
//! Normalization: lowercase; strip `+tag` addressing; map domain aliases
//! (googlemail -> gmail, hotmail.co.uk -> hotmail, live -> outlook);
//! collapse the gmail dot-trick (gmail.com only, after alias mapping).
//! Exact on normalized local+domain; equal local parts across different
//! domains surface as a near-match.

use super::exact_outcome;
use crate::ComparatorOutcome;
use knv_core::spec::AgreementLevel;

/// Domain aliases folded before comparison. Fixed table of the engine.
const DOMAIN_ALIASES: [(&str, &str); 3] = [
    ("googlemail.com", "gmail.com"),
    ("hotmail.co.uk", "hotmail.com"),
    ("live.com", "outlook.com"),
];

/// Score granted when only the local parts agree.
const LOCAL_ONLY_SCORE: f64 = 0.8;

/// Normalize to `local@domain`, or `None` for values without an `@`.
pub fn normalize(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    let local = local.split('+').next().unwrap_or(local);
    let domain = DOMAIN_ALIASES
        .iter()
        .find(|(from, _)| *from == domain)
        .map(|(_, to)| *to)
        .unwrap_or(domain);
    let local = if domain == "gmail.com" {
        local.replace('.', "")
    } else {
        local.to_string()
    };
    if local.is_empty() {
        return None;
    }
    Some(format!("{local}@{domain}"))
}

pub fn compare(a: &str, b: &str) -> Option<ComparatorOutcome> {
    let (na, nb) = (normalize(a)?, normalize(b)?);
    if na == nb {
        return Some(exact_outcome(true));
    }
    let local_a = na.rsplit_once('@').map(|(l, _)| l);
    let local_b = nb.rsplit_once('@').map(|(l, _)| l);
    if local_a.is_some() && local_a == local_b {
        return Some(ComparatorOutcome { score: LOCAL_ONLY_SCORE, level: AgreementLevel::Near });
    }
    Some(exact_outcome(false))
}
