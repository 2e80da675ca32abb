//! Personal-name comparator: lowercase/trim, resolve nicknames to their
//! canonical form, then Jaro-Winkler.
//!
//! The nickname table is an immutable part of the engine.

use crate::ComparatorOutcome;
use knv_core::spec::LevelThresholds;

/// nickname -> canonical given name.
const NICKNAMES: [(&str, &str); 55] = [
    ("bob", "robert"),
    ("rob", "robert"),
    ("robbie", "robert"),
    ("bill", "william"),
    ("will", "william"),
    ("willy", "william"),
    ("dick", "richard"),
    ("rick", "richard"),
    ("rich", "richard"),
    ("jim", "james"),
    ("jimmy", "james"),
    ("jamie", "james"),
    ("mike", "michael"),
    ("mikey", "michael"),
    ("jen", "jennifer"),
    ("jenny", "jennifer"),
    ("liz", "elizabeth"),
    ("beth", "elizabeth"),
    ("betty", "elizabeth"),
    ("pat", "patricia"),
    ("patty", "patricia"),
    ("chris", "christopher"),
    ("kate", "katherine"),
    ("kathy", "katherine"),
    ("katie", "katherine"),
    ("ben", "benjamin"),
    ("nick", "nicholas"),
    ("tom", "thomas"),
    ("tommy", "thomas"),
    ("dan", "daniel"),
    ("danny", "daniel"),
    ("dave", "david"),
    ("steve", "steven"),
    ("stephen", "steven"),
    ("joe", "joseph"),
    ("joey", "joseph"),
    ("tony", "anthony"),
    ("ed", "edward"),
    ("eddie", "edward"),
    ("sam", "samuel"),
    ("sammy", "samuel"),
    ("matt", "matthew"),
    ("andy", "andrew"),
    ("drew", "andrew"),
    ("alex", "alexander"),
    ("charlie", "charles"),
    ("chuck", "charles"),
    ("harry", "henry"),
    ("jack", "john"),
    ("johnny", "john"),
    ("larry", "lawrence"),
    ("jerry", "gerald"),
    ("terry", "terrence"),
    ("ray", "raymond"),
    ("al", "alan"),
];

/// Lowercase, trim, resolve through the nickname table.
pub fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    NICKNAMES
        .iter()
        .find(|(nick, _)| *nick == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

pub fn compare(a: &str, b: &str, thresholds: &LevelThresholds) -> ComparatorOutcome {
    let (na, nb) = (normalize(a), normalize(b));
    let score = strsim::jaro_winkler(&na, &nb);
    ComparatorOutcome { score, level: thresholds.bin(score) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::spec::AgreementLevel;

    #[test]
    fn nicknames_resolve_to_canonical() {
        assert_eq!(normalize("Bob"), "robert");
        assert_eq!(normalize("LIZ"), "elizabeth");
        assert_eq!(normalize("Robert"), "robert");
        assert_eq!(normalize("zelda"), "zelda");
    }

    #[test]
    fn nickname_vs_canonical_is_exact() {
        let out = compare("Bob", "Robert", &LevelThresholds::default());
        assert_eq!(out.score, 1.0);
        assert_eq!(out.level, AgreementLevel::Exact);
    }

    #[test]
    fn typo_lands_near() {
        let out = compare("katherine", "katharine", &LevelThresholds::default());
        assert!(out.score >= 0.92, "jw similarity was {}", out.score);
        assert_eq!(out.level, AgreementLevel::Exact);
    }
}
