//! Quartet voting for leaf reinsertion.
//!
//! For every internal node of the reduced tree, representative leaves of its
//! three subtrees form quartets with the leaf being reinserted. Each quartet
//! votes for the subtree the leaf groups with; a vote for subtree `S` backs
//! every branch inside `S`, including the one leading into it. The leaf is
//! attached at the branch with the most backing.

use crate::alignment::{Alignment, DistanceMatrix};
use crate::config::QuartetTest;
use crate::tree::{Branch, NodeId, Tree, NO_NODE};
use fastrand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Data used to resolve a quartet.
#[derive(Debug, Clone)]
pub enum QuartetEvidence {
    Distance(DistanceMatrix),
    Parsimony(Arc<Alignment>),
}

/// Index of a uniformly chosen maximum.
fn argmax_random<T: PartialOrd + Copy>(values: &[T], rng: &mut Rng) -> usize {
    let mut best = Vec::with_capacity(values.len());
    for (i, &v) in values.iter().enumerate() {
        match best.first() {
            None => best.push(i),
            Some(&j) if v > values[j] => {
                best.clear();
                best.push(i);
            }
            Some(&j) if v == values[j] => best.push(i),
            _ => {}
        }
    }
    if best.len() == 1 {
        best[0]
    } else {
        best[rng.usize(0..best.len())]
    }
}

impl QuartetEvidence {
    pub fn from_alignment(test: QuartetTest, alignment: &Arc<Alignment>) -> Self {
        match test {
            QuartetTest::Distance => Self::Distance(alignment.distance_matrix()),
            QuartetTest::Parsimony => Self::Parsimony(Arc::clone(alignment)),
        }
    }

    pub fn num_taxa(&self) -> usize {
        match self {
            Self::Distance(d) => d.size(),
            Self::Parsimony(a) => a.num_taxa(),
        }
    }

    /// Which of the three representatives `x` is sister to (0, 1 or 2).
    pub fn resolve(&self, reps: [usize; 3], x: usize, rng: &mut Rng) -> usize {
        let [a, b, c] = reps;
        match self {
            Self::Distance(d) => {
                // negated so the smallest four-point sum wins
                let sums = [
                    -(d.get(x, a) + d.get(b, c)),
                    -(d.get(x, b) + d.get(a, c)),
                    -(d.get(x, c) + d.get(a, b)),
                ];
                argmax_random(&sums, rng)
            }
            Self::Parsimony(aln) => {
                let mut votes = [0usize; 3];
                for site in 0..aln.num_sites() {
                    let (sx, sa, sb, sc) = (
                        aln.state(x, site),
                        aln.state(a, site),
                        aln.state(b, site),
                        aln.state(c, site),
                    );
                    if [sx, sa, sb, sc].iter().any(|s| s.count_ones() != 1) {
                        continue;
                    }
                    if sx == sa && sb == sc && sx != sb {
                        votes[0] += 1;
                    } else if sx == sb && sa == sc && sx != sa {
                        votes[1] += 1;
                    } else if sx == sc && sa == sb && sx != sa {
                        votes[2] += 1;
                    }
                }
                argmax_random(&votes, rng)
            }
        }
    }
}

/// Shallowest leaf below `node` (away from `dad`), ties broken at random.
fn nearest_leaf(tree: &Tree, node: NodeId, dad: NodeId, rng: &mut Rng) -> NodeId {
    let mut level = vec![(node, dad)];
    loop {
        let leaves: Vec<NodeId> = level
            .iter()
            .filter(|(n, _)| tree.is_leaf(*n))
            .map(|(n, _)| *n)
            .collect();
        if !leaves.is_empty() {
            return leaves[rng.usize(0..leaves.len())];
        }
        let mut next = Vec::with_capacity(level.len() * 2);
        for &(n, d) in &level {
            for &nb in tree.neighbors(n) {
                if nb != d {
                    next.push((nb, n));
                }
            }
        }
        level = next;
    }
}

/// Up to `r` leaves spread across the subtree below `node`: the frontier is
/// widened level by level until it holds `r` nodes, then each frontier node
/// contributes its nearest leaf.
pub fn representatives(tree: &Tree, node: NodeId, dad: NodeId, r: usize, rng: &mut Rng) -> Vec<NodeId> {
    let mut frontier = vec![(node, dad)];
    while frontier.len() < r && frontier.iter().any(|(n, _)| !tree.is_leaf(*n)) {
        let mut next = Vec::with_capacity(frontier.len() * 2);
        for &(n, d) in &frontier {
            if tree.is_leaf(n) {
                next.push((n, d));
                continue;
            }
            for &nb in tree.neighbors(n) {
                if nb != d {
                    next.push((nb, n));
                }
            }
        }
        frontier = next;
    }
    if frontier.len() > r {
        rng.shuffle(&mut frontier);
        frontier.truncate(r);
    }
    frontier
        .into_iter()
        .map(|(n, d)| nearest_leaf(tree, n, d, rng))
        .collect()
}

/// Per-branch quartet bonus for attaching `leaf` to the current tree.
pub fn insertion_bonuses(
    tree: &Tree,
    leaf: NodeId,
    evidence: &QuartetEvidence,
    r: usize,
    rng: &mut Rng,
) -> Vec<(Branch, u64)> {
    let attached = tree.attached_leaves();
    let Some(&root) = attached.first() else {
        return Vec::new();
    };
    let order = tree.postorder(root, NO_NODE);

    // Votes keyed by directed (node, toward) pairs.
    let mut votes: HashMap<(NodeId, NodeId), u64> = HashMap::new();
    for &(node, _) in &order {
        if tree.is_leaf(node) || tree.degree(node) != 3 {
            continue;
        }
        let nb = tree.neighbors(node);
        let sides = [nb[0], nb[1], nb[2]];
        let reps: Vec<Vec<NodeId>> = sides
            .iter()
            .map(|&s| representatives(tree, s, node, r, rng))
            .collect();
        for &ra in &reps[0] {
            for &rb in &reps[1] {
                for &rc in &reps[2] {
                    let w = evidence.resolve([ra, rb, rc], leaf, rng);
                    *votes.entry((node, sides[w])).or_insert(0) += 1;
                }
            }
        }
    }
    let vote = |from: NodeId, to: NodeId| votes.get(&(from, to)).copied().unwrap_or(0);

    let n = tree.node_count();
    let mut parent = vec![NO_NODE; n];
    for &(node, dad) in &order {
        parent[node] = dad;
    }

    // up[x]: votes on x's side pointing at parent[x]; down[x]: votes on the
    // parent's side pointing at x.
    let mut up = vec![0u64; n];
    for &(node, dad) in &order {
        if dad == NO_NODE {
            continue;
        }
        let below: u64 = tree
            .neighbors(node)
            .iter()
            .filter(|&&c| c != dad)
            .map(|&c| up[c])
            .sum();
        up[node] = vote(node, dad) + below;
    }
    let mut down = vec![0u64; n];
    for &(node, dad) in order.iter().rev() {
        if dad == NO_NODE {
            continue;
        }
        let grand = parent[dad];
        let siblings: u64 = tree
            .neighbors(dad)
            .iter()
            .filter(|&&c| c != node && c != grand)
            .map(|&c| up[c])
            .sum();
        let from_above = if grand == NO_NODE { 0 } else { down[dad] };
        down[node] = vote(dad, node) + siblings + from_above;
    }

    order
        .iter()
        .filter(|(_, dad)| *dad != NO_NODE)
        .map(|&(node, dad)| (Branch::new(node, dad), up[node] + down[node]))
        .collect()
}

/// Branch with the highest quartet bonus, ties broken uniformly at random.
pub fn best_insertion_branch(
    tree: &Tree,
    leaf: NodeId,
    evidence: &QuartetEvidence,
    r: usize,
    rng: &mut Rng,
) -> Option<Branch> {
    let bonuses = insertion_bonuses(tree, leaf, evidence, r, rng);
    if bonuses.is_empty() {
        return None;
    }
    let scores: Vec<u64> = bonuses.iter().map(|(_, s)| *s).collect();
    let pick = argmax_random(&scores, rng);
    Some(bonuses[pick].0)
}
