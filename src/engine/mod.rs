pub mod branch_opt;
pub mod jc69;
pub mod parsimony;

pub use branch_opt::{BranchLengthOptimizer, FixedLengths};
pub use jc69::Jc69Engine;
pub use parsimony::ParsimonyEngine;

use crate::tree::{Branch, NniSwap, NodeId, Tree};

/// Best reconnection of one internal branch, as predicted by the engine.
#[derive(Debug, Clone)]
pub struct NniEvaluation {
    pub swap: NniSwap,
    pub score: f64,
    /// Lengths of the (at most five) branches touched by the swap, taken
    /// from the reconnected tree.
    pub lengths: Vec<(NodeId, NodeId, f64)>,
}

/// Scores fixed topologies. Implementations must be deterministic for a
/// given tree and branch lengths.
pub trait LikelihoodEngine: Send + Sync {
    fn num_sites(&self) -> usize;

    /// Per-site log-likelihood (or negated per-site cost for parsimony).
    fn site_log_likelihoods(&self, tree: &Tree) -> Vec<f64>;

    fn evaluate(&self, tree: &Tree) -> f64 {
        self.site_log_likelihoods(tree).iter().sum()
    }

    /// Scores both NNI reconnections of `branch` with all other lengths held
    /// fixed and returns the better one. `None` for non-internal branches.
    fn evaluate_nni(&self, tree: &Tree, branch: Branch) -> Option<NniEvaluation> {
        let alternatives = tree.nni_alternatives(branch)?;
        let mut best: Option<NniEvaluation> = None;
        for swap in alternatives {
            let mut candidate = tree.clone();
            if !candidate.apply_nni(&swap) {
                continue;
            }
            let score = self.evaluate(&candidate);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(NniEvaluation {
                    swap,
                    score,
                    lengths: affected_lengths(&candidate, &swap),
                });
            }
        }
        best
    }
}

/// Fits branch lengths for a fixed topology.
pub trait ContinuousOptimizer: Send + Sync {
    /// Optimizes every branch, at most `max_rounds` sweeps. Returns the new score.
    fn optimize_branch_lengths(&self, tree: &mut Tree, max_rounds: usize) -> f64;

    /// Optimizes only the given branches. Defaults to a full sweep.
    fn optimize_branches(&self, tree: &mut Tree, _branches: &[Branch], max_rounds: usize) -> f64 {
        self.optimize_branch_lengths(tree, max_rounds)
    }
}

/// The central branch of a swap plus the four branches around it.
pub fn affected_branches(tree: &Tree, swap: &NniSwap) -> Vec<Branch> {
    let (u, v) = (swap.node1, swap.node2);
    let mut out = vec![Branch::new(u, v)];
    for &end in &[u, v] {
        for &nb in tree.neighbors(end) {
            if nb != u && nb != v {
                out.push(Branch::new(end, nb));
            }
        }
    }
    out
}

pub fn affected_lengths(tree: &Tree, swap: &NniSwap) -> Vec<(NodeId, NodeId, f64)> {
    affected_branches(tree, swap)
        .into_iter()
        .map(|b| (b.node1, b.node2, tree.length(b.node1, b.node2)))
        .collect()
}
