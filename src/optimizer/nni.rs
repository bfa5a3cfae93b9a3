use crate::config::NniParams;
use crate::engine::{affected_branches, ContinuousOptimizer, LikelihoodEngine, NniEvaluation};
use crate::tree::{Branch, NodeId, Split, Tree};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// An improving reconnection found during a round.
#[derive(Debug, Clone)]
pub struct NniMove {
    pub branch: Branch,
    pub eval: NniEvaluation,
    /// Gain over the score the round started from.
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct NniOutcome {
    pub tree: Tree,
    pub score: f64,
    /// Swaps kept across all rounds.
    pub nni_count: usize,
    /// Rounds that changed the tree.
    pub rounds: usize,
    pub rollbacks: usize,
    pub hit_round_cap: bool,
    /// The starting tree and every tree accepted before the final one, with
    /// their scores, in visiting order.
    pub visited: Vec<(Tree, f64)>,
}

/// Scores every candidate branch in parallel and returns the improving moves,
/// best first. Ties are ordered by branch so the result does not depend on
/// thread scheduling.
pub fn evaluate_moves(
    engine: &dyn LikelihoodEngine,
    tree: &Tree,
    branches: &[Branch],
    current: f64,
) -> Vec<NniMove> {
    let mut moves: Vec<NniMove> = branches
        .par_iter()
        .filter_map(|&branch| {
            let eval = engine.evaluate_nni(tree, branch)?;
            (eval.score > current).then(|| NniMove {
                branch,
                delta: eval.score - current,
                eval,
            })
        })
        .collect();
    moves.sort_by(|a, b| {
        b.eval
            .score
            .total_cmp(&a.eval.score)
            .then(a.branch.cmp(&b.branch))
    });
    moves
}

/// Greedy pass over `moves` (already best first) keeping those whose central
/// branch shares no node with an earlier pick.
pub fn select_independent(moves: &[NniMove]) -> Vec<NniMove> {
    let mut used: HashSet<NodeId> = HashSet::new();
    let mut picked = Vec::new();
    for m in moves {
        let (u, v) = (m.branch.node1, m.branch.node2);
        if used.contains(&u) || used.contains(&v) {
            continue;
        }
        used.insert(u);
        used.insert(v);
        picked.push(m.clone());
    }
    picked
}

/// Applies each swap that still matches the tree and copies in the lengths
/// the engine predicted. Returns the branches whose lengths need refitting
/// and the number of swaps applied.
fn apply_batch(tree: &mut Tree, batch: &[NniMove]) -> (Vec<Branch>, usize) {
    let mut touched: Vec<Branch> = Vec::new();
    let mut applied = 0;
    for m in batch {
        if !tree.apply_nni(&m.eval.swap) {
            debug!(branch = ?m.branch, "skipping stale swap");
            continue;
        }
        applied += 1;
        for &(a, b, len) in &m.eval.lengths {
            if tree.is_adjacent(a, b) {
                tree.set_length(a, b, len);
            }
        }
        touched.extend(affected_branches(tree, &m.eval.swap));
    }
    touched.sort_unstable();
    touched.dedup();
    (touched, applied)
}

/// Hill climbing over NNI neighbourhoods with conflict-free batches.
pub struct NniSearch {
    engine: Arc<dyn LikelihoodEngine>,
    optimizer: Arc<dyn ContinuousOptimizer>,
    epsilon: f64,
    max_rounds: usize,
    length_rounds: usize,
}

impl NniSearch {
    pub fn new(
        engine: Arc<dyn LikelihoodEngine>,
        optimizer: Arc<dyn ContinuousOptimizer>,
        params: &NniParams,
    ) -> Self {
        Self {
            engine,
            optimizer,
            epsilon: params.nni_epsilon,
            max_rounds: params.nni_max_rounds,
            length_rounds: params.length_rounds,
        }
    }

    /// Climbs from `tree` (already scored at `score`) to a local optimum.
    ///
    /// Branches whose split is in `tabu` are not swapped, unless every
    /// internal branch is tabu, in which case the restriction is lifted.
    /// The returned score is never below `score`.
    pub fn run(&self, tree: Tree, score: f64, tabu: &HashSet<Split>) -> NniOutcome {
        let cap = if self.max_rounds == 0 {
            tree.num_taxa()
        } else {
            self.max_rounds
        };
        let mut out = NniOutcome {
            tree,
            score,
            nni_count: 0,
            rounds: 0,
            rollbacks: 0,
            hit_round_cap: false,
            visited: Vec::new(),
        };
        let mut ignore_tabu = tabu.is_empty();

        loop {
            let n = out.tree.num_taxa();
            let branches: Vec<Branch> = out
                .tree
                .branch_splits()
                .into_iter()
                .filter(|(_, s)| !s.is_trivial(n))
                .filter(|(_, s)| ignore_tabu || !tabu.contains(s))
                .map(|(b, _)| b)
                .collect();
            if branches.is_empty() {
                if !ignore_tabu {
                    ignore_tabu = true;
                    continue;
                }
                break;
            }

            let moves = evaluate_moves(self.engine.as_ref(), &out.tree, &branches, out.score);
            let Some(best_single) = moves.first().map(|m| m.eval.score) else {
                break;
            };
            if out.rounds >= cap {
                out.hit_round_cap = true;
                warn!(rounds = out.rounds, score = out.score, "NNI search hit round cap");
                break;
            }
            let batch = select_independent(&moves);

            let snapshot = out.tree.clone();
            let mut tree = out.tree.clone();
            let (touched, mut applied) = apply_batch(&mut tree, &batch);
            let mut new_score = self
                .optimizer
                .optimize_branches(&mut tree, &touched, self.length_rounds);

            if applied > 1 && new_score < best_single - self.epsilon {
                debug!(
                    batch = applied,
                    new_score, best_single, "batch underperformed, keeping best swap only"
                );
                out.rollbacks += 1;
                tree = snapshot.clone();
                let (touched, single) = apply_batch(&mut tree, &batch[..1]);
                applied = single;
                new_score = self
                    .optimizer
                    .optimize_branches(&mut tree, &touched, self.length_rounds);
            }

            if applied == 0 || new_score <= out.score {
                out.tree = snapshot;
                break;
            }

            let gain = new_score - out.score;
            let previous = std::mem::replace(&mut out.tree, tree);
            out.visited.push((previous, out.score));
            out.score = new_score;
            out.nni_count += applied;
            out.rounds += 1;
            debug!(round = out.rounds, applied, score = new_score, "NNI round");

            if gain < self.epsilon {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NniSwap;

    fn mv(a: NodeId, b: NodeId, score: f64) -> NniMove {
        let branch = Branch::new(a, b);
        NniMove {
            branch,
            eval: NniEvaluation {
                swap: NniSwap {
                    node1: branch.node1,
                    node2: branch.node2,
                    subtree1: 0,
                    subtree2: 1,
                },
                score,
                lengths: Vec::new(),
            },
            delta: score,
        }
    }

    #[test]
    fn test_select_independent_skips_shared_nodes() {
        let moves = vec![mv(10, 11, 5.0), mv(11, 12, 4.0), mv(12, 13, 3.0), mv(14, 15, 1.0)];
        let picked: Vec<Branch> = select_independent(&moves).iter().map(|m| m.branch).collect();
        assert_eq!(
            picked,
            vec![Branch::new(10, 11), Branch::new(12, 13), Branch::new(14, 15)]
        );
    }
}
