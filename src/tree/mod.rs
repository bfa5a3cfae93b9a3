pub mod newick;
pub mod split;

pub use split::Split;

use crate::error::{TfResult, TreeForgeError};
use fastrand::Rng;
use std::sync::Arc;

pub type NodeId = usize;

/// Sentinel used as the "parent" of a traversal root.
pub const NO_NODE: NodeId = usize::MAX;

pub const DEFAULT_BRANCH_LENGTH: f64 = 0.1;
pub const MIN_BRANCH_LENGTH: f64 = 1e-6;

/// An undirected branch, stored with `node1 < node2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    pub node1: NodeId,
    pub node2: NodeId,
}

impl Branch {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { node1: a, node2: b }
        } else {
            Self { node1: b, node2: a }
        }
    }
}

/// One NNI reconnection across `node1 - node2`: the subtree hanging off
/// `node1` at `subtree1` trades places with the one off `node2` at `subtree2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NniSwap {
    pub node1: NodeId,
    pub node2: NodeId,
    pub subtree1: NodeId,
    pub subtree2: NodeId,
}

impl NniSwap {
    pub fn branch(&self) -> Branch {
        Branch::new(self.node1, self.node2)
    }

    /// The swap that undoes this one once applied.
    pub fn inverse(&self) -> Self {
        Self {
            node1: self.node1,
            node2: self.node2,
            subtree1: self.subtree2,
            subtree2: self.subtree1,
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    adj: [NodeId; 3],
    len: [f64; 3],
    degree: u8,
}

impl Node {
    fn detached() -> Self {
        Self {
            adj: [NO_NODE; 3],
            len: [0.0; 3],
            degree: 0,
        }
    }

    #[inline]
    fn slot(&self, nb: NodeId) -> Option<usize> {
        self.adj[..self.degree as usize].iter().position(|&x| x == nb)
    }
}

/// Unrooted bifurcating tree stored as a flat node arena.
///
/// Node ids `0..n` are the leaves (id == taxon index), ids `n..2n-2` are
/// internal nodes. Internal nodes with degree 0 are spare slots, used while
/// leaves are pruned and regrafted.
#[derive(Clone, Debug)]
pub struct Tree {
    taxa: Arc<Vec<String>>,
    nodes: Vec<Node>,
}

impl Tree {
    /// A tree with every node detached. Callers link it up.
    fn detached(taxa: Arc<Vec<String>>) -> Self {
        let n = taxa.len();
        let total = n + n.saturating_sub(2);
        Self {
            taxa,
            nodes: vec![Node::detached(); total],
        }
    }

    /// Random stepwise-addition tree over the given taxa.
    pub fn random(taxa: Arc<Vec<String>>, rng: &mut Rng) -> TfResult<Self> {
        let n = taxa.len();
        if n < 3 {
            return Err(TreeForgeError::Topology(format!(
                "need at least 3 taxa to build a tree, got {}",
                n
            )));
        }
        let mut tree = Self::detached(taxa);
        let mut order: Vec<NodeId> = (0..n).collect();
        rng.shuffle(&mut order);

        let hub = n;
        for &leaf in &order[..3] {
            tree.link(leaf, hub, DEFAULT_BRANCH_LENGTH);
        }
        for &leaf in &order[3..] {
            let branches = tree.branches();
            let target = branches[rng.usize(0..branches.len())];
            tree.insert_leaf(leaf, target)?;
        }
        Ok(tree)
    }

    pub fn from_newick(text: &str, taxa: &Arc<Vec<String>>) -> TfResult<Self> {
        newick::parse(text, taxa)
    }

    /// Newick string rooted at the internal node next to taxon 0, children
    /// ordered by their smallest taxon index.
    pub fn to_newick(&self, with_lengths: bool) -> String {
        newick::write(self, with_lengths)
    }

    /// Canonical, length-free identity of this topology.
    pub fn fingerprint(&self) -> String {
        newick::write(self, false)
    }

    #[inline]
    pub fn num_taxa(&self) -> usize {
        self.taxa.len()
    }

    pub fn taxa(&self) -> &Arc<Vec<String>> {
        &self.taxa
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        id < self.taxa.len()
    }

    #[inline]
    pub fn degree(&self, id: NodeId) -> usize {
        self.nodes[id].degree as usize
    }

    #[inline]
    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        let node = &self.nodes[id];
        &node.adj[..node.degree as usize]
    }

    pub fn is_adjacent(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes[a].slot(b).is_some()
    }

    /// # Panics
    /// If `a` and `b` are not adjacent.
    pub fn length(&self, a: NodeId, b: NodeId) -> f64 {
        match self.nodes[a].slot(b) {
            Some(s) => self.nodes[a].len[s],
            None => panic!("nodes {} and {} are not adjacent", a, b),
        }
    }

    pub fn set_length(&mut self, a: NodeId, b: NodeId, len: f64) {
        let len = len.max(MIN_BRANCH_LENGTH);
        if let (Some(sa), Some(sb)) = (self.nodes[a].slot(b), self.nodes[b].slot(a)) {
            self.nodes[a].len[sa] = len;
            self.nodes[b].len[sb] = len;
        }
    }

    fn link(&mut self, a: NodeId, b: NodeId, len: f64) {
        let len = len.max(MIN_BRANCH_LENGTH);
        for (x, y) in [(a, b), (b, a)] {
            let node = &mut self.nodes[x];
            let d = node.degree as usize;
            node.adj[d] = y;
            node.len[d] = len;
            node.degree += 1;
        }
    }

    fn unlink(&mut self, a: NodeId, b: NodeId) {
        for (x, y) in [(a, b), (b, a)] {
            let node = &mut self.nodes[x];
            if let Some(s) = node.slot(y) {
                let last = node.degree as usize - 1;
                node.adj[s] = node.adj[last];
                node.len[s] = node.len[last];
                node.adj[last] = NO_NODE;
                node.degree -= 1;
            }
        }
    }

    fn replace_neighbor(&mut self, node: NodeId, old: NodeId, new: NodeId, len: f64) {
        let n = &mut self.nodes[node];
        if let Some(s) = n.slot(old) {
            n.adj[s] = new;
            n.len[s] = len;
        }
    }

    /// Every attached branch, once each.
    pub fn branches(&self) -> Vec<Branch> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.iter().enumerate() {
            for &nb in &node.adj[..node.degree as usize] {
                if id < nb {
                    out.push(Branch::new(id, nb));
                }
            }
        }
        out
    }

    /// Branches with two internal endpoints.
    pub fn internal_branches(&self) -> Vec<Branch> {
        self.branches()
            .into_iter()
            .filter(|b| !self.is_leaf(b.node1) && !self.is_leaf(b.node2))
            .collect()
    }

    pub fn attached_leaves(&self) -> Vec<NodeId> {
        (0..self.num_taxa()).filter(|&l| self.degree(l) > 0).collect()
    }

    pub fn leaf_parent(&self, leaf: NodeId) -> Option<NodeId> {
        self.neighbors(leaf).first().copied()
    }

    /// `(node, parent)` pairs with every node listed after all of its
    /// descendants. `parent` may be `NO_NODE` to traverse the whole tree.
    pub fn postorder(&self, start: NodeId, parent: NodeId) -> Vec<(NodeId, NodeId)> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(start, parent)];
        while let Some((node, dad)) = stack.pop() {
            order.push((node, dad));
            for &nb in self.neighbors(node) {
                if nb != dad {
                    stack.push((nb, node));
                }
            }
        }
        order.reverse();
        order
    }

    /// Leaves in the subtree rooted at `node`, looking away from `parent`.
    pub fn subtree_leaves(&self, node: NodeId, parent: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(node, parent)];
        while let Some((n, dad)) = stack.pop() {
            if self.is_leaf(n) {
                out.push(n);
                continue;
            }
            for &nb in self.neighbors(n) {
                if nb != dad {
                    stack.push((nb, n));
                }
            }
        }
        out
    }

    pub fn split_of(&self, branch: Branch) -> Split {
        let leaves = self.subtree_leaves(branch.node2, branch.node1);
        Split::from_taxa(self.num_taxa(), &leaves)
    }

    /// Splits of all internal branches, computed in one traversal.
    pub fn branch_splits(&self) -> Vec<(Branch, Split)> {
        let n = self.num_taxa();
        let Some(&root) = self.attached_leaves().first() else {
            return Vec::new();
        };
        let Some(start) = self.leaf_parent(root) else {
            return Vec::new();
        };

        let mut bits: Vec<Option<Split>> = vec![None; self.nodes.len()];
        let mut out = Vec::with_capacity(n.saturating_sub(3));
        for (node, dad) in self.postorder(start, root) {
            let mut s = Split::empty(n);
            if self.is_leaf(node) {
                s.insert(node);
            } else {
                for &nb in self.neighbors(node) {
                    if nb != dad {
                        if let Some(child) = bits[nb].take() {
                            s.union_with(&child);
                        }
                    }
                }
                if !self.is_leaf(dad) {
                    let mut canon = s.clone();
                    canon.canonicalize(n);
                    out.push((Branch::new(node, dad), canon));
                }
            }
            bits[node] = Some(s);
        }
        out
    }

    pub fn splits(&self) -> Vec<Split> {
        self.branch_splits().into_iter().map(|(_, s)| s).collect()
    }

    /// The two non-identity reconnections of an internal branch.
    pub fn nni_alternatives(&self, branch: Branch) -> Option<[NniSwap; 2]> {
        let (u, v) = (branch.node1, branch.node2);
        if self.is_leaf(u) || self.is_leaf(v) || !self.is_adjacent(u, v) {
            return None;
        }
        let mut a: Vec<NodeId> = self.neighbors(u).iter().copied().filter(|&x| x != v).collect();
        let mut b: Vec<NodeId> = self.neighbors(v).iter().copied().filter(|&x| x != u).collect();
        if a.len() != 2 || b.len() != 2 {
            return None;
        }
        a.sort_unstable();
        b.sort_unstable();
        let swap = |s1, s2| NniSwap {
            node1: u,
            node2: v,
            subtree1: s1,
            subtree2: s2,
        };
        Some([swap(a[0], b[0]), swap(a[0], b[1])])
    }

    /// Applies an NNI. Returns false (and changes nothing) if the swap no
    /// longer matches the current adjacency.
    pub fn apply_nni(&mut self, swap: &NniSwap) -> bool {
        let NniSwap {
            node1: u,
            node2: v,
            subtree1: a,
            subtree2: b,
        } = *swap;
        if a == v || b == u || !self.is_adjacent(u, v) {
            return false;
        }
        if !self.is_adjacent(u, a) || !self.is_adjacent(v, b) {
            return false;
        }
        let len_a = self.length(u, a);
        let len_b = self.length(v, b);
        self.replace_neighbor(u, a, b, len_b);
        self.replace_neighbor(v, b, a, len_a);
        self.replace_neighbor(a, u, v, len_a);
        self.replace_neighbor(b, v, u, len_b);
        true
    }

    /// Prunes a leaf, fusing the two branches left behind.
    pub fn remove_leaf(&mut self, leaf: NodeId) -> TfResult<()> {
        if !self.is_leaf(leaf) || self.degree(leaf) != 1 {
            return Err(TreeForgeError::Topology(format!(
                "node {} is not an attached leaf",
                leaf
            )));
        }
        if self.attached_leaves().len() <= 3 {
            return Err(TreeForgeError::Topology(
                "cannot prune below three leaves".to_string(),
            ));
        }
        let p = self.neighbors(leaf)[0];
        let others: Vec<NodeId> = self.neighbors(p).iter().copied().filter(|&x| x != leaf).collect();
        if others.len() != 2 {
            return Err(TreeForgeError::Topology(format!(
                "parent {} of leaf {} is not bifurcating",
                p, leaf
            )));
        }
        let (x, y) = (others[0], others[1]);
        let fused = self.length(p, x) + self.length(p, y);
        self.unlink(p, leaf);
        self.unlink(p, x);
        self.unlink(p, y);
        self.link(x, y, fused);
        Ok(())
    }

    /// Grafts a detached leaf onto the middle of `branch`.
    pub fn insert_leaf(&mut self, leaf: NodeId, branch: Branch) -> TfResult<()> {
        if !self.is_leaf(leaf) || self.degree(leaf) != 0 {
            return Err(TreeForgeError::Topology(format!(
                "leaf {} is already attached",
                leaf
            )));
        }
        let (u, v) = (branch.node1, branch.node2);
        if !self.is_adjacent(u, v) {
            return Err(TreeForgeError::Topology(format!(
                "no branch between {} and {}",
                u, v
            )));
        }
        let spare = (self.num_taxa()..self.nodes.len())
            .find(|&id| self.degree(id) == 0)
            .ok_or_else(|| TreeForgeError::Topology("no spare internal node".to_string()))?;
        let half = self.length(u, v) / 2.0;
        self.unlink(u, v);
        self.link(u, spare, half);
        self.link(spare, v, half);
        self.link(spare, leaf, DEFAULT_BRANCH_LENGTH);
        Ok(())
    }

    /// Checks full bifurcation, connectivity and that every taxon is present once.
    pub fn validate(&self) -> TfResult<()> {
        let n = self.num_taxa();
        if n < 3 {
            return Err(TreeForgeError::Topology(format!("only {} taxa", n)));
        }
        for leaf in 0..n {
            if self.degree(leaf) != 1 {
                return Err(TreeForgeError::Topology(format!(
                    "taxon '{}' has degree {}",
                    self.taxa[leaf],
                    self.degree(leaf)
                )));
            }
        }
        for id in n..self.nodes.len() {
            if self.degree(id) != 3 {
                return Err(TreeForgeError::Topology(format!(
                    "internal node {} has degree {}, tree is not bifurcating",
                    id,
                    self.degree(id)
                )));
            }
        }
        let reached = self.postorder(0, NO_NODE).len();
        if reached != self.nodes.len() {
            return Err(TreeForgeError::Topology(format!(
                "tree is disconnected: reached {} of {} nodes",
                reached,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxa(n: usize) -> Arc<Vec<String>> {
        Arc::new((0..n).map(|i| format!("t{}", i)).collect())
    }

    #[test]
    fn test_random_tree_is_valid() {
        let mut rng = Rng::with_seed(3);
        for n in 3..20 {
            let tree = Tree::random(taxa(n), &mut rng).unwrap();
            tree.validate().unwrap();
            assert_eq!(tree.branches().len(), 2 * n - 3);
            assert_eq!(tree.internal_branches().len(), n - 3);
        }
    }

    #[test]
    fn test_nni_then_inverse_restores_topology() {
        let mut rng = Rng::with_seed(11);
        let mut tree = Tree::random(taxa(8), &mut rng).unwrap();
        let before = tree.fingerprint();
        let branch = tree.internal_branches()[0];
        let [alt, _] = tree.nni_alternatives(branch).unwrap();
        assert!(tree.apply_nni(&alt));
        assert_ne!(tree.fingerprint(), before);
        tree.validate().unwrap();
        assert!(tree.apply_nni(&alt.inverse()));
        assert_eq!(tree.fingerprint(), before);
    }

    #[test]
    fn test_prune_and_regraft_keeps_validity() {
        let mut rng = Rng::with_seed(5);
        let mut tree = Tree::random(taxa(7), &mut rng).unwrap();
        tree.remove_leaf(4).unwrap();
        assert_eq!(tree.attached_leaves().len(), 6);
        let target = tree.branches()[2];
        tree.insert_leaf(4, target).unwrap();
        tree.validate().unwrap();
    }
}
