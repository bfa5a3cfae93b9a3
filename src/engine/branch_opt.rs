use super::{ContinuousOptimizer, LikelihoodEngine};
use crate::tree::{Branch, Tree};
use std::sync::Arc;
use tracing::debug;

const GOLDEN: f64 = 0.618_033_988_749_895;
const LINE_SEARCH_STEPS: usize = 24;

/// Per-branch golden-section search on log length, bounded to
/// `[min_length, max_length]`.
pub struct BranchLengthOptimizer {
    engine: Arc<dyn LikelihoodEngine>,
    pub min_length: f64,
    pub max_length: f64,
    pub tolerance: f64,
}

impl BranchLengthOptimizer {
    pub fn new(engine: Arc<dyn LikelihoodEngine>) -> Self {
        Self {
            engine,
            min_length: 1e-6,
            max_length: 10.0,
            tolerance: 1e-3,
        }
    }

    pub fn with_bounds(mut self, min_length: f64, max_length: f64) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Returns the new score; the branch keeps its old length unless the
    /// search found a strictly better one.
    fn optimize_one(&self, tree: &mut Tree, branch: Branch, current: f64) -> f64 {
        let (u, v) = (branch.node1, branch.node2);
        let original = tree.length(u, v);
        let lo_bound = self.min_length.ln();
        let hi_bound = self.max_length.ln();
        let x0 = original.clamp(self.min_length, self.max_length).ln();
        let mut lo = (x0 - 4.0).max(lo_bound);
        let mut hi = (x0 + 4.0).min(hi_bound);

        let eval = |tree: &mut Tree, x: f64| {
            tree.set_length(u, v, x.exp());
            self.engine.evaluate(tree)
        };

        let mut a = hi - GOLDEN * (hi - lo);
        let mut b = lo + GOLDEN * (hi - lo);
        let mut fa = eval(tree, a);
        let mut fb = eval(tree, b);
        for _ in 0..LINE_SEARCH_STEPS {
            if fa >= fb {
                hi = b;
                b = a;
                fb = fa;
                a = hi - GOLDEN * (hi - lo);
                fa = eval(tree, a);
            } else {
                lo = a;
                a = b;
                fa = fb;
                b = lo + GOLDEN * (hi - lo);
                fb = eval(tree, b);
            }
        }
        let (best_x, best_f) = if fa >= fb { (a, fa) } else { (b, fb) };
        if best_f > current {
            tree.set_length(u, v, best_x.exp());
            best_f
        } else {
            tree.set_length(u, v, original);
            current
        }
    }

    fn sweep(&self, tree: &mut Tree, branches: &[Branch], max_rounds: usize) -> f64 {
        let mut score = self.engine.evaluate(tree);
        for round in 0..max_rounds.max(1) {
            let before = score;
            for &branch in branches {
                score = self.optimize_one(tree, branch, score);
            }
            debug!(round, score, "branch length sweep");
            if score - before < self.tolerance {
                break;
            }
        }
        score
    }
}

impl ContinuousOptimizer for BranchLengthOptimizer {
    fn optimize_branch_lengths(&self, tree: &mut Tree, max_rounds: usize) -> f64 {
        let branches = tree.branches();
        self.sweep(tree, &branches, max_rounds)
    }

    fn optimize_branches(&self, tree: &mut Tree, branches: &[Branch], max_rounds: usize) -> f64 {
        let live: Vec<Branch> = branches
            .iter()
            .copied()
            .filter(|b| tree.is_adjacent(b.node1, b.node2))
            .collect();
        self.sweep(tree, &live, max_rounds)
    }
}

/// Leaves lengths untouched and just rescores. Suits engines that ignore
/// branch lengths, such as parsimony.
pub struct FixedLengths {
    engine: Arc<dyn LikelihoodEngine>,
}

impl FixedLengths {
    pub fn new(engine: Arc<dyn LikelihoodEngine>) -> Self {
        Self { engine }
    }
}

impl ContinuousOptimizer for FixedLengths {
    fn optimize_branch_lengths(&self, tree: &mut Tree, _max_rounds: usize) -> f64 {
        self.engine.evaluate(tree)
    }
}
