//! Property tests for the algorithm layer's load-bearing invariants.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use knv_algo::blocking::block;
use knv_algo::comparators::compare;
use knv_algo::scoring::{decide, weighted};
use knv_core::records::{NormalizedRecord, RecordId};
use knv_core::result::Decision;
use knv_core::spec::{
    BlockingKey, ComparatorKind, DecisionThresholds, KeyTransform, LevelThresholds, MatchRule,
};

fn record(n: u8, fields: Vec<(String, String)>) -> NormalizedRecord {
    NormalizedRecord {
        id: RecordId::from_hash_bytes([n, n, n, n, n, n, n, n, n, n, n, n, n, n, n, n]),
        source_name: "src".into(),
        external_id: format!("e{n}"),
        entity_type: "person".into(),
        data: fields.into_iter().collect(),
        last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn comparator_strategy() -> impl Strategy<Value = ComparatorKind> {
    prop_oneof![
        Just(ComparatorKind::Exact),
        Just(ComparatorKind::JaroWinkler),
        Just(ComparatorKind::Email),
        Just(ComparatorKind::Phone),
        Just(ComparatorKind::Name),
        Just(ComparatorKind::Company),
    ]
}

proptest! {
    // Per-pair scores are symmetric in their arguments.
    #[test]
    fn comparator_symmetry(
        kind in comparator_strategy(),
        a in "[a-z0-9@.+ ]{0,24}",
        b in "[a-z0-9@.+ ]{0,24}",
    ) {
        let t = LevelThresholds::default();
        prop_assert_eq!(compare(kind, &a, &b, &t), compare(kind, &b, &a, &t));
    }

    // Raising the match threshold cannot add an accepted pair; lowering it
    // cannot remove one.
    #[test]
    fn threshold_monotonicity(
        total in -10.0f64..10.0,
        review in -5.0f64..5.0,
        bump in 0.0f64..5.0,
    ) {
        let low = DecisionThresholds {
            match_threshold: review + bump,
            review_threshold: review,
            reject_threshold: review - 1.0,
        };
        let high = DecisionThresholds {
            match_threshold: review + bump + 1.0,
            ..low
        };
        if decide(total, &high) == Decision::Match {
            prop_assert_eq!(decide(total, &low), Decision::Match);
        }
        if decide(total, &low) != Decision::Match {
            prop_assert_ne!(decide(total, &high), Decision::Match);
        }
    }

    // A rule whose field is missing on either side contributes exactly zero.
    #[test]
    fn missing_field_neutrality(value in "[a-z]{1,12}", weight in 0.1f64..5.0) {
        let rules = vec![
            MatchRule {
                field: "name".into(),
                comparator: ComparatorKind::Exact,
                weight,
                thresholds: LevelThresholds::default(),
            },
            MatchRule {
                field: "email".into(),
                comparator: ComparatorKind::Email,
                weight,
                thresholds: LevelThresholds::default(),
            },
        ];
        let thresholds = DecisionThresholds {
            match_threshold: weight,
            review_threshold: weight / 2.0,
            reject_threshold: 0.0,
        };

        let with_missing = weighted::score_pair(
            &record(1, vec![("name".into(), value.clone()), ("email".into(), "".into())]),
            &record(2, vec![("name".into(), value.clone()), ("email".into(), "a@b.com".into())]),
            &rules,
            &thresholds,
        );
        let without_field = weighted::score_pair(
            &record(1, vec![("name".into(), value.clone())]),
            &record(2, vec![("name".into(), value)]),
            &rules,
            &thresholds,
        );
        prop_assert!((with_missing.total - without_field.total).abs() < 1e-12);
    }

    // Blocking output does not depend on record order.
    #[test]
    fn blocking_is_order_insensitive(emails in proptest::collection::vec("[a-c]@x.com", 2..6)) {
        let records: Vec<NormalizedRecord> = emails
            .iter()
            .enumerate()
            .map(|(i, e)| record(i as u8 + 1, vec![("email".into(), e.clone())]))
            .collect();
        let mut reversed = records.clone();
        reversed.reverse();

        let key = BlockingKey {
            fields: vec!["email".into()],
            transform: Some(KeyTransform::Lowercase),
        };
        let forward = block(&records, std::slice::from_ref(&key), 1000);
        let backward = block(&reversed, std::slice::from_ref(&key), 1000);
        prop_assert_eq!(forward, backward);
    }
}

#[test]
fn weighted_scoring_is_deterministic_across_runs() {
    let rules = vec![MatchRule {
        field: "name".into(),
        comparator: ComparatorKind::Name,
        weight: 1.0,
        thresholds: LevelThresholds::default(),
    }];
    let thresholds = DecisionThresholds {
        match_threshold: 0.85,
        review_threshold: 0.6,
        reject_threshold: 0.3,
    };
    let a = record(1, vec![("name".into(), "Bob".into())]);
    let b = record(2, vec![("name".into(), "Robert".into())]);
    let first = weighted::score_pair(&a, &b, &rules, &thresholds);
    for _ in 0..5 {
        assert_eq!(weighted::score_pair(&a, &b, &rules, &thresholds), first);
    }
}
