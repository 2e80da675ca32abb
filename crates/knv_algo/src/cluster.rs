//! Transitive-closure clustering: union-find over accepted pairs, with
//! forbid constraints from no-match feedback.
//!
//! Union-find uses path compression and union by rank. Forbidden-ness is
//! checked only when a union would merge two distinct components that each
//! contain an endpoint of a forbidden pair; the blocked edge is pruned and
//! the union skipped. Edges are processed strongest-first so the pruned
//! edge is always the weakest remaining one between those components.

use std::collections::BTreeMap;

use knv_core::determinism::{edge_order, sort_clusters};
use knv_core::records::RecordId;
use knv_core::result::PairScore;

// ----------------------------- Union-find core -----------------------------

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression.
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Union by rank; returns false when already in the same set.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

// ----------------------------- Clusterer -----------------------------

/// Outcome of one proposed union.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnionOutcome {
    Merged,
    AlreadyTogether,
    /// A forbidden pair straddles the two components; the edge is pruned.
    Blocked,
}

/// Union-find over record ids with a side-table of forbidden pairs.
pub struct Clusterer {
    ids: Vec<RecordId>,
    index: BTreeMap<RecordId, usize>,
    uf: UnionFind,
    forbidden: Vec<(usize, usize)>,
}

impl Clusterer {
    /// Every record starts as its own singleton component.
    pub fn new(ids: &[RecordId]) -> Self {
        let mut sorted: Vec<RecordId> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let index = sorted.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let n = sorted.len();
        Clusterer { ids: sorted, index, uf: UnionFind::new(n), forbidden: Vec::new() }
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.index.contains_key(&id)
    }

    /// Register a forbidden pair. Unknown ids are ignored (the labeled
    /// records are simply not part of this run).
    pub fn forbid(&mut self, a: RecordId, b: RecordId) {
        if let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) {
            if ia != ib {
                self.forbidden.push((ia.min(ib), ia.max(ib)));
            }
        }
    }

    /// Union without forbid checks — used to seed prior clusters, which are
    /// established facts from the previous run.
    pub fn seed(&mut self, members: &[RecordId]) {
        let known: Vec<usize> =
            members.iter().filter_map(|id| self.index.get(id).copied()).collect();
        for window in known.windows(2) {
            self.uf.union(window[0], window[1]);
        }
    }

    /// Propose a union; blocked when a forbidden pair straddles the two
    /// components being merged.
    pub fn try_union(&mut self, a: RecordId, b: RecordId) -> UnionOutcome {
        let (Some(&ia), Some(&ib)) = (self.index.get(&a), self.index.get(&b)) else {
            return UnionOutcome::AlreadyTogether;
        };
        let (ra, rb) = (self.uf.find(ia), self.uf.find(ib));
        if ra == rb {
            return UnionOutcome::AlreadyTogether;
        }
        for &(fa, fb) in &self.forbidden {
            let (fra, frb) = (self.uf.find(fa), self.uf.find(fb));
            if (fra, frb) == (ra, rb) || (fra, frb) == (rb, ra) {
                return UnionOutcome::Blocked;
            }
        }
        self.uf.union(ia, ib);
        UnionOutcome::Merged
    }

    /// Read out components in canonical order: members ascending, clusters
    /// by smallest member. Singletons are always emitted.
    pub fn components(&mut self) -> Vec<Vec<RecordId>> {
        let mut by_root: BTreeMap<usize, Vec<RecordId>> = BTreeMap::new();
        for i in 0..self.ids.len() {
            let root = self.uf.find(i);
            by_root.entry(root).or_default().push(self.ids[i]);
        }
        let mut clusters: Vec<Vec<RecordId>> = by_root.into_values().collect();
        sort_clusters(&mut clusters);
        clusters
    }
}

// ----------------------------- Edge-driven clustering -----------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterOutcome {
    pub clusters: Vec<Vec<RecordId>>,
    /// Accepted edges pruned because a forbidden pair straddled the merge.
    pub blocked_unions: u64,
    /// Force-merge edges skipped because they conflicted with a forbid.
    pub conflicting_feedback: u64,
}

/// Cluster accepted edges under feedback constraints.
///
/// Order of operations: seed prior clusters, apply force-merge edges, then
/// accepted edges strongest-first. Forbids are registered before any union
/// so force-merges are subject to them too (forbid wins on conflict).
pub fn cluster_edges(
    ids: &[RecordId],
    accepted: &[PairScore],
    force_edges: &[(RecordId, RecordId)],
    forbidden: &[(RecordId, RecordId)],
    seeds: &[Vec<RecordId>],
) -> ClusterOutcome {
    let mut clusterer = Clusterer::new(ids);

    for &(a, b) in forbidden {
        clusterer.forbid(a, b);
    }
    for seed in seeds {
        clusterer.seed(seed);
    }

    let mut conflicting_feedback = 0;
    for &(a, b) in force_edges {
        if clusterer.try_union(a, b) == UnionOutcome::Blocked {
            conflicting_feedback += 1;
        }
    }

    let mut edges: Vec<&PairScore> = accepted.iter().collect();
    edges.sort_by(|x, y| edge_order(x, y));

    let mut blocked_unions = 0;
    for edge in edges {
        if clusterer.try_union(edge.a, edge.b) == UnionOutcome::Blocked {
            blocked_unions += 1;
        }
    }

    ClusterOutcome { clusters: clusterer.components(), blocked_unions, conflicting_feedback }
}
