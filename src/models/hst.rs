// sentinel/src/models/hst.rs
//
// Online half-space trees — streaming anomaly detection over unit-scaled
// feature vectors.
//
// Each tree is a perfect binary tree of random axis-aligned splits over a
// randomized workspace covering [0,1]^d. Learning routes a point root to
// leaf, incrementing the latest-window mass along the path; every
// `window_size` points the latest masses become the reference masses and
// reset. Scoring walks the reference masses: dense regions (high mass at
// depth) score low, sparse regions score high.
//
// Contracts:
//   - score_one ∈ [0,1]; exactly 0 until `warmup` samples are learned
//   - learn_one is additive; replaying the same point only deepens the
//     mass profile it already occupies
//   - construction is a pure function of the seed, so two processes with
//     the same config build identical forests

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    feature: usize,
    split: f64,
    r_mass: f64,
    l_mass: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    // Heap layout: children of node i are 2i+1 / 2i+2; the last level
    // (depth == height) holds the leaves.
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfSpaceTrees {
    n_trees: usize,
    height: usize,
    window_size: usize,
    warmup: usize,
    seed: u64,
    dims: usize,
    trees: Vec<Tree>,
    n_learned: u64,
    since_swap: usize,
}

impl HalfSpaceTrees {
    pub fn new(
        n_trees: usize,
        height: usize,
        window_size: usize,
        warmup: usize,
        seed: u64,
        dims: usize,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees)
            .map(|_| Tree::build(height, dims, &mut rng))
            .collect();
        Self {
            n_trees,
            height,
            window_size,
            warmup,
            seed,
            dims,
            trees,
            n_learned: 0,
            since_swap: 0,
        }
    }

    pub fn n_learned(&self) -> u64 {
        self.n_learned
    }

    /// Learn one unit-scaled point.
    pub fn learn_one(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.dims);
        for tree in &mut self.trees {
            let mut idx = 0usize;
            for _depth in 0..self.height {
                tree.nodes[idx].l_mass += 1.0;
                let node = &tree.nodes[idx];
                idx = if x[node.feature] < node.split {
                    2 * idx + 1
                } else {
                    2 * idx + 2
                };
            }
            tree.nodes[idx].l_mass += 1.0; // leaf
        }

        self.n_learned += 1;
        self.since_swap += 1;
        if self.since_swap >= self.window_size {
            for tree in &mut self.trees {
                for node in &mut tree.nodes {
                    node.r_mass = node.l_mass;
                    node.l_mass = 0.0;
                }
            }
            self.since_swap = 0;
        }
    }

    /// Anomaly score for one unit-scaled point.
    pub fn score_one(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.dims);
        if (self.n_learned as usize) < self.warmup {
            return 0.0;
        }

        // Mass below this reads as "already sparse"; descending further
        // adds no information.
        let size_limit = 0.1 * self.window_size as f64;
        let max_leaf_score = self.window_size as f64 * (1u64 << self.height) as f64;

        let mut total_norm = 0.0f64;
        for tree in &self.trees {
            let mut idx = 0usize;
            let mut depth = 0usize;
            loop {
                let node = &tree.nodes[idx];
                let is_leaf = 2 * idx + 1 >= tree.nodes.len();
                if is_leaf || node.r_mass < size_limit {
                    let s = node.r_mass * (1u64 << depth) as f64;
                    total_norm += (s / max_leaf_score).min(1.0);
                    break;
                }
                idx = if x[node.feature] < node.split {
                    2 * idx + 1
                } else {
                    2 * idx + 2
                };
                depth += 1;
            }
        }

        (1.0 - total_norm / self.n_trees as f64).clamp(0.0, 1.0)
    }
}

impl Tree {
    fn build(height: usize, dims: usize, rng: &mut StdRng) -> Self {
        // Randomized workspace per feature: a point q in [0,1] widened so
        // the workspace always covers the unit interval regardless of q.
        let ranges: Vec<(f64, f64)> = (0..dims)
            .map(|_| {
                let q: f64 = rng.gen();
                let span = 2.0 * q.max(1.0 - q);
                (q - span, q + span)
            })
            .collect();

        let n_nodes = (1usize << (height + 1)) - 1;
        let mut nodes = vec![
            Node {
                feature: 0,
                split: 0.0,
                r_mass: 0.0,
                l_mass: 0.0,
            };
            n_nodes
        ];
        Self::split_node(&mut nodes, 0, height, 0, ranges, rng);
        Tree { nodes }
    }

    fn split_node(
        nodes: &mut [Node],
        idx: usize,
        height: usize,
        depth: usize,
        ranges: Vec<(f64, f64)>,
        rng: &mut StdRng,
    ) {
        if depth >= height {
            return; // leaf, no split
        }
        let feature = rng.gen_range(0..ranges.len());
        let (lo, hi) = ranges[feature];
        let split = (lo + hi) / 2.0;
        nodes[idx].feature = feature;
        nodes[idx].split = split;

        let mut left_ranges = ranges.clone();
        left_ranges[feature] = (lo, split);
        Self::split_node(nodes, 2 * idx + 1, height, depth + 1, left_ranges, rng);

        let mut right_ranges = ranges;
        right_ranges[feature] = (split, hi);
        Self::split_node(nodes, 2 * idx + 2, height, depth + 1, right_ranges, rng);
    }
}
