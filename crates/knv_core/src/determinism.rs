//! Stable ordering helpers.
//!
//! Two runs with identical inputs and spec must yield byte-identical
//! outputs; every collection that reaches an artifact is sorted here.

use crate::records::{NormalizedRecord, RecordId};
use crate::result::PairScore;

/// Sort records ascending by id (ingest order is not canonical).
pub fn sort_records_by_id(records: &mut [NormalizedRecord]) {
    records.sort_by_key(|r| r.id);
}

/// Canonical cluster order: members ascending, clusters by smallest member.
pub fn sort_clusters(clusters: &mut Vec<Vec<RecordId>>) {
    for c in clusters.iter_mut() {
        c.sort_unstable();
        c.dedup();
    }
    clusters.retain(|c| !c.is_empty());
    clusters.sort_by(|x, y| x[0].cmp(&y[0]));
}

/// Canonical decision order: by pair ids.
pub fn sort_decisions(decisions: &mut [PairScore]) {
    decisions.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));
}

/// Edge order for clustering: strongest first, pair ids break ties.
/// `total_cmp` keeps NaN handling total and platform-stable.
pub fn edge_order(x: &PairScore, y: &PairScore) -> std::cmp::Ordering {
    y.total
        .total_cmp(&x.total)
        .then_with(|| (x.a, x.b).cmp(&(y.a, y.b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordId;
    use crate::result::Decision;

    fn rid(n: u8) -> RecordId {
        RecordId::from_hash_bytes([n; 16])
    }

    #[test]
    fn clusters_sort_by_smallest_member() {
        let mut clusters = vec![vec![rid(9), rid(3)], vec![rid(2)], vec![]];
        sort_clusters(&mut clusters);
        assert_eq!(clusters, vec![vec![rid(2)], vec![rid(3), rid(9)]]);
    }

    #[test]
    fn edges_order_strongest_first_then_pair() {
        let mk = |a: u8, b: u8, t: f64| PairScore {
            a: rid(a),
            b: rid(b),
            per_field: vec![],
            total: t,
            decision: Decision::Match,
        };
        let mut edges = vec![mk(1, 2, 0.5), mk(3, 4, 0.9), mk(1, 3, 0.9)];
        edges.sort_by(edge_order);
        assert_eq!((edges[0].a, edges[0].b), (rid(1), rid(3)));
        assert_eq!((edges[1].a, edges[1].b), (rid(3), rid(4)));
        assert_eq!((edges[2].a, edges[2].b), (rid(1), rid(2)));
    }
}
