#![allow(dead_code)]

use fastrand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use treeforge::alignment::{Alignment, DistanceMatrix};
use treeforge::engine::LikelihoodEngine;
use treeforge::tree::{Split, Tree, NO_NODE};

pub fn taxa(n: usize) -> Arc<Vec<String>> {
    Arc::new((0..n).map(|i| format!("t{}", i)).collect())
}

pub fn named(names: &[&str]) -> Arc<Vec<String>> {
    Arc::new(names.iter().map(|s| s.to_string()).collect())
}

/// Scores a tree as the sum of fixed per-split weights; branch lengths are
/// ignored. The score is spread evenly over `sites` pseudo-sites.
pub struct SplitWeightEngine {
    pub weights: HashMap<Split, f64>,
    pub sites: usize,
}

impl SplitWeightEngine {
    pub fn new(weights: HashMap<Split, f64>) -> Self {
        Self { weights, sites: 4 }
    }

    /// Rewards every split of `target` with `reward`.
    pub fn favouring(target: &Tree, reward: f64) -> Self {
        Self::new(target.splits().into_iter().map(|s| (s, reward)).collect())
    }

    pub fn score(&self, tree: &Tree) -> f64 {
        tree.splits()
            .iter()
            .map(|s| self.weights.get(s).copied().unwrap_or(0.0))
            .sum()
    }
}

impl LikelihoodEngine for SplitWeightEngine {
    fn num_sites(&self) -> usize {
        self.sites
    }

    fn site_log_likelihoods(&self, tree: &Tree) -> Vec<f64> {
        let score = self.score(tree);
        vec![score / self.sites as f64; self.sites]
    }
}

/// Pseudo-random but deterministic weight for every split.
pub struct HashedSplitEngine {
    pub salt: u64,
}

impl HashedSplitEngine {
    fn weight(&self, split: &Split) -> f64 {
        let mut h = DefaultHasher::new();
        self.salt.hash(&mut h);
        split.hash(&mut h);
        (h.finish() % 1000) as f64 / 100.0
    }
}

impl LikelihoodEngine for HashedSplitEngine {
    fn num_sites(&self) -> usize {
        1
    }

    fn site_log_likelihoods(&self, tree: &Tree) -> Vec<f64> {
        vec![tree.splits().iter().map(|s| self.weight(s)).sum()]
    }
}

/// Patristic distances between all taxa of `tree`.
pub fn path_distances(tree: &Tree) -> DistanceMatrix {
    let n = tree.num_taxa();
    let mut d = DistanceMatrix::zeros(n);
    for from in 0..n {
        let mut dist = vec![0.0; tree.node_count()];
        let mut stack = vec![(from, NO_NODE)];
        while let Some((node, dad)) = stack.pop() {
            for &nb in tree.neighbors(node) {
                if nb != dad {
                    dist[nb] = dist[node] + tree.length(node, nb);
                    stack.push((nb, node));
                }
            }
        }
        for to in (from + 1)..n {
            d.set(from, to, dist[to]);
        }
    }
    d
}

/// Evolves `sites` nucleotide columns down `tree` under Jukes-Cantor and
/// returns one row per taxon.
pub fn simulate_sequences(tree: &Tree, sites: usize, seed: u64) -> Vec<Vec<u8>> {
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    let mut rng = Rng::with_seed(seed);
    let n = tree.num_taxa();
    let root = tree.leaf_parent(0).expect("tree has leaves");
    let mut seqs: Vec<Vec<u8>> = vec![Vec::new(); tree.node_count()];
    seqs[root] = (0..sites).map(|_| rng.usize(0..4) as u8).collect();

    let mut order = tree.postorder(root, NO_NODE);
    order.reverse();
    for (node, dad) in order {
        if dad == NO_NODE {
            continue;
        }
        let t = tree.length(node, dad);
        let p_change = 0.75 * (1.0 - (-4.0 * t / 3.0).exp());
        let parent = seqs[dad].clone();
        seqs[node] = parent
            .into_iter()
            .map(|s| {
                if rng.f64() < p_change {
                    (s + 1 + rng.u8(0..3)) % 4
                } else {
                    s
                }
            })
            .collect();
    }

    (0..n)
        .map(|i| seqs[i].iter().map(|&s| BASES[s as usize]).collect())
        .collect()
}

pub fn simulate_alignment(tree: &Tree, sites: usize, seed: u64) -> Alignment {
    let names: Vec<String> = tree.taxa().iter().cloned().collect();
    Alignment::new(names, simulate_sequences(tree, sites, seed)).expect("simulated alignment is valid")
}

/// Writes a simulated alignment of `tree` as FASTA.
pub fn write_fasta(path: &Path, tree: &Tree, sites: usize, seed: u64) {
    let mut out = String::new();
    for (name, row) in tree.taxa().iter().zip(simulate_sequences(tree, sites, seed)) {
        out.push_str(&format!(">{}\n{}\n", name, String::from_utf8(row).unwrap()));
    }
    std::fs::write(path, out).unwrap();
}

pub const EIGHT_TAXA: &str =
    "((t0:0.10,t1:0.12):0.30,(t2:0.08,t3:0.15):0.25,((t4:0.11,t5:0.09):0.28,(t6:0.14,t7:0.10):0.22):0.35);";
