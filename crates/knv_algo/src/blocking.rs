//! Blocking: candidate-pair generation.
//!
//! For each configured key, records are grouped by the transformed key
//! value; every unordered pair inside a non-singleton group is emitted.
//! Pairs found under several keys are deduplicated, keeping the
//! shared-key count as a diagnostic (telemetry only — never an input to
//! the match decision).
//!
//! Blocking never errors; an empty candidate set is a valid outcome.

use std::collections::BTreeMap;

use knv_core::records::{CandidatePair, NormalizedRecord, RecordId};
use knv_core::spec::{BlockingKey, KeyTransform};

/// One deduplicated candidate pair with its co-hash count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockedPair {
    pub pair: CandidatePair,
    pub shared_keys: u32,
}

/// Blocking result plus the counters telemetry wants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockingOutcome {
    /// Canonical order: ascending by pair ids.
    pub pairs: Vec<BlockedPair>,
    pub group_count: u64,
    /// `key<index>:<value>` tokens for groups over the skew limit.
    pub skewed_groups: Vec<String>,
}

/// Apply a key transform. `None` means the value yields no key.
fn apply_transform(transform: Option<&KeyTransform>, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match transform {
        None => Some(value.to_string()),
        Some(KeyTransform::Lowercase) => Some(value.to_lowercase()),
        Some(KeyTransform::FirstChars(n)) => {
            Some(value.to_lowercase().chars().take(*n).collect())
        }
        Some(KeyTransform::Email) => crate::comparators::email::normalize(value),
        Some(KeyTransform::EmailDomain) => {
            let (_, domain) = value.rsplit_once('@')?;
            if domain.is_empty() {
                None
            } else {
                Some(domain.to_lowercase())
            }
        }
        Some(KeyTransform::DigitsOnly) => {
            let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                None
            } else {
                Some(digits)
            }
        }
    }
}

/// Key value of one record under one blocking key. All component fields
/// must be present; a missing component yields no key.
fn key_value(record: &NormalizedRecord, key: &BlockingKey) -> Option<String> {
    let mut parts = Vec::with_capacity(key.fields.len());
    for field in &key.fields {
        let raw = record.value(field)?;
        parts.push(apply_transform(key.transform.as_ref(), raw)?);
    }
    Some(parts.join("\u{1f}"))
}

/// Generate candidate pairs. Records are iterated in id order, so the
/// output is canonical regardless of input order.
pub fn block(
    records: &[NormalizedRecord],
    keys: &[BlockingKey],
    skew_limit: usize,
) -> BlockingOutcome {
    let mut ordered: Vec<&NormalizedRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.id);

    let mut pair_counts: BTreeMap<CandidatePair, u32> = BTreeMap::new();
    let mut group_count: u64 = 0;
    let mut skewed_groups: Vec<String> = Vec::new();

    for (key_index, key) in keys.iter().enumerate() {
        let mut groups: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for record in &ordered {
            if let Some(value) = key_value(record, key) {
                groups.entry(value).or_default().push(record.id);
            }
        }
        for (value, members) in &groups {
            if members.len() < 2 {
                continue;
            }
            group_count += 1;
            if members.len() > skew_limit {
                skewed_groups.push(format!("key{key_index}:{value}"));
            }
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    if let Some(pair) = CandidatePair::new(a, b) {
                        *pair_counts.entry(pair).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let pairs = pair_counts
        .into_iter()
        .map(|(pair, shared_keys)| BlockedPair { pair, shared_keys })
        .collect();

    BlockingOutcome { pairs, group_count, skewed_groups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record(n: u8, fields: &[(&str, &str)]) -> NormalizedRecord {
        let mut data = BTreeMap::new();
        for (k, v) in fields {
            data.insert(k.to_string(), v.to_string());
        }
        NormalizedRecord {
            id: RecordId::from_hash_bytes([n; 16]),
            source_name: "src".into(),
            external_id: format!("e{n}"),
            entity_type: "person".into(),
            data,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn email_key() -> BlockingKey {
        BlockingKey { fields: vec!["email".into()], transform: Some(KeyTransform::Lowercase) }
    }

    #[test]
    fn records_sharing_a_key_become_a_pair() {
        let records = vec![
            record(1, &[("email", "A@x.com")]),
            record(2, &[("email", "a@x.com")]),
            record(3, &[("email", "b@y.com")]),
        ];
        let out = block(&records, &[email_key()], 1000);
        assert_eq!(out.pairs.len(), 1);
        assert_eq!(out.group_count, 1);
        assert_eq!(out.pairs[0].shared_keys, 1);
    }

    #[test]
    fn missing_values_yield_no_key() {
        let records = vec![
            record(1, &[("email", "")]),
            record(2, &[("email", "  ")]),
            record(3, &[("email", "a@x.com")]),
        ];
        let out = block(&records, &[email_key()], 1000);
        assert!(out.pairs.is_empty());
        assert_eq!(out.group_count, 0);
    }

    #[test]
    fn shared_keys_counts_co_hashing_keys() {
        let phone_key = BlockingKey {
            fields: vec!["phone".into()],
            transform: Some(KeyTransform::DigitsOnly),
        };
        let records = vec![
            record(1, &[("email", "a@x.com"), ("phone", "415-555-0100")]),
            record(2, &[("email", "a@x.com"), ("phone", "(415) 555 0100")]),
        ];
        let out = block(&records, &[email_key(), phone_key], 1000);
        assert_eq!(out.pairs.len(), 1);
        assert_eq!(out.pairs[0].shared_keys, 2);
    }

    #[test]
    fn multi_field_key_requires_all_components() {
        let key = BlockingKey {
            fields: vec!["last".into(), "first".into()],
            transform: Some(KeyTransform::Lowercase),
        };
        let records = vec![
            record(1, &[("first", "Ann"), ("last", "Lee")]),
            record(2, &[("first", "ann"), ("last", "LEE")]),
            record(3, &[("first", ""), ("last", "Lee")]),
        ];
        let out = block(&records, &[key], 1000);
        assert_eq!(out.pairs.len(), 1);
    }

    #[test]
    fn skewed_groups_are_flagged_but_still_emitted() {
        let records: Vec<_> =
            (1..=4).map(|n| record(n, &[("email", "same@x.com")])).collect();
        let out = block(&records, &[email_key()], 3);
        assert_eq!(out.pairs.len(), 6); // C(4,2)
        assert_eq!(out.skewed_groups, vec!["key0:same@x.com".to_string()]);
    }

    #[test]
    fn email_transform_co_hashes_alias_variants() {
        let key = BlockingKey {
            fields: vec!["email".into()],
            transform: Some(KeyTransform::Email),
        };
        let records = vec![
            record(1, &[("email", "JOHN.Q+promo@GoogleMail.com")]),
            record(2, &[("email", "johnq@gmail.com")]),
        ];
        let out = block(&records, &[key], 1000);
        assert_eq!(out.pairs.len(), 1);
    }

    #[test]
    fn email_domain_transform_groups_by_domain() {
        let key = BlockingKey {
            fields: vec!["email".into()],
            transform: Some(KeyTransform::EmailDomain),
        };
        let records = vec![
            record(1, &[("email", "a@X.com")]),
            record(2, &[("email", "b@x.com")]),
            record(3, &[("email", "not-an-email")]),
        ];
        let out = block(&records, &[key], 1000);
        assert_eq!(out.pairs.len(), 1);
    }
}
