use super::LikelihoodEngine;
use crate::alignment::Alignment;
use crate::tree::{Tree, NO_NODE};
use std::sync::Arc;

/// Fitch parsimony reported as a score to maximize: each site contributes
/// minus its number of state changes.
pub struct ParsimonyEngine {
    alignment: Arc<Alignment>,
}

impl ParsimonyEngine {
    pub fn new(alignment: Arc<Alignment>) -> Self {
        Self { alignment }
    }

    pub fn site_costs(&self, tree: &Tree) -> Vec<u32> {
        let sites = self.alignment.num_sites();
        let mut cost = vec![0u32; sites];
        let Some(root) = tree.leaf_parent(0) else {
            return cost;
        };

        let mut sets: Vec<Option<Vec<u8>>> = vec![None; tree.node_count()];
        for (node, dad) in tree.postorder(root, NO_NODE) {
            if tree.is_leaf(node) {
                sets[node] = Some(self.alignment.row(node).to_vec());
                continue;
            }
            let mut acc: Option<Vec<u8>> = None;
            for &child in tree.neighbors(node) {
                if child == dad {
                    continue;
                }
                let Some(child_set) = sets[child].take() else {
                    continue;
                };
                acc = Some(match acc {
                    None => child_set,
                    Some(mut a) => {
                        for (s, (x, &y)) in a.iter_mut().zip(&child_set).enumerate() {
                            let inter = *x & y;
                            if inter == 0 {
                                *x |= y;
                                cost[s] += 1;
                            } else {
                                *x = inter;
                            }
                        }
                        a
                    }
                });
            }
            sets[node] = acc;
        }
        cost
    }
}

impl LikelihoodEngine for ParsimonyEngine {
    fn num_sites(&self) -> usize {
        self.alignment.num_sites()
    }

    fn site_log_likelihoods(&self, tree: &Tree) -> Vec<f64> {
        self.site_costs(tree).into_iter().map(|c| -(c as f64)).collect()
    }
}
