use crate::core::matrix::SimilarityMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Disjoint-set forest over matrix indices.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Root of `x`, halving the path on the way up.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let grandparent = self.parent[self.parent[x]];
            self.parent[x] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Returns `false` when `x` and `y` were already connected.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return false;
        }

        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] = self.rank[rx].saturating_add(1);
            }
        }
        true
    }
}

/// A connected component of at least two videos, before an original is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCandidate {
    /// Matrix indices in ascending order.
    pub members: Vec<usize>,
}

impl ClusterCandidate {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members.binary_search(&index).is_ok()
    }
}

/// Thresholds a combined matrix into a graph and extracts connected components.
pub struct ClusterDetector;

impl ClusterDetector {
    pub fn detect(matrix: &SimilarityMatrix, threshold: f64) -> Vec<ClusterCandidate> {
        Self::detect_with(matrix, |_, _| threshold)
    }

    /// Like [`ClusterDetector::detect`] with a threshold chosen per pair.
    ///
    /// Undefined entries never form an edge, whatever the threshold.
    pub fn detect_with<F>(matrix: &SimilarityMatrix, threshold: F) -> Vec<ClusterCandidate>
    where
        F: Fn(usize, usize) -> f64,
    {
        let n = matrix.size();
        let mut sets = UnionFind::new(n);
        let mut edges = 0usize;

        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(score) = matrix.get(i, j)
                    && score >= threshold(i, j)
                {
                    sets.union(i, j);
                    edges += 1;
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..n {
            let root = sets.find(index);
            components.entry(root).or_default().push(index);
        }

        let mut candidates: Vec<ClusterCandidate> = components
            .into_values()
            .filter(|members| members.len() >= 2)
            .map(|members| ClusterCandidate { members })
            .collect();
        candidates.sort_by_key(|c| c.members[0]);

        log::info!(
            "Found {} clusters from {} edges over {} videos",
            candidates.len(),
            edges,
            n
        );
        candidates
    }
}
