use super::LikelihoodEngine;
use crate::alignment::Alignment;
use crate::tree::{Tree, NO_NODE};
use std::sync::Arc;

const SCALE_THRESHOLD: f64 = 1e-100;

type Partials = Vec<[f64; 4]>;

/// Jukes-Cantor likelihood by Felsenstein pruning with per-site rescaling.
pub struct Jc69Engine {
    alignment: Arc<Alignment>,
}

#[inline]
fn transition_probs(t: f64) -> (f64, f64) {
    let e = (-4.0 * t / 3.0).exp();
    (0.25 + 0.75 * e, 0.25 - 0.25 * e)
}

impl Jc69Engine {
    pub fn new(alignment: Arc<Alignment>) -> Self {
        Self { alignment }
    }

    fn tip_partials(&self, taxon: usize) -> Partials {
        self.alignment
            .row(taxon)
            .iter()
            .map(|&state| {
                let mut p = [0.0; 4];
                for (x, slot) in p.iter_mut().enumerate() {
                    if state & (1 << x) != 0 {
                        *slot = 1.0;
                    }
                }
                p
            })
            .collect()
    }
}

impl LikelihoodEngine for Jc69Engine {
    fn num_sites(&self) -> usize {
        self.alignment.num_sites()
    }

    fn site_log_likelihoods(&self, tree: &Tree) -> Vec<f64> {
        let sites = self.alignment.num_sites();
        let mut log_scale = vec![0.0f64; sites];
        let Some(root) = tree.leaf_parent(0) else {
            return log_scale;
        };

        let mut partials: Vec<Option<Partials>> = vec![None; tree.node_count()];
        for (node, dad) in tree.postorder(root, NO_NODE) {
            if tree.is_leaf(node) {
                partials[node] = Some(self.tip_partials(node));
                continue;
            }
            let mut acc: Partials = vec![[1.0; 4]; sites];
            for &child in tree.neighbors(node) {
                if child == dad {
                    continue;
                }
                let Some(child_p) = partials[child].take() else {
                    continue;
                };
                let (same, diff) = transition_probs(tree.length(node, child));
                for (a, c) in acc.iter_mut().zip(&child_p) {
                    let total: f64 = c.iter().sum();
                    for x in 0..4 {
                        a[x] *= diff * total + (same - diff) * c[x];
                    }
                }
            }
            for (a, scale) in acc.iter_mut().zip(log_scale.iter_mut()) {
                let m = a.iter().cloned().fold(0.0, f64::max);
                if m > 0.0 && m < SCALE_THRESHOLD {
                    for v in a.iter_mut() {
                        *v /= m;
                    }
                    *scale += m.ln();
                }
            }
            partials[node] = Some(acc);
        }

        let root_p = partials[root].take().unwrap_or_default();
        root_p
            .iter()
            .zip(&log_scale)
            .map(|(p, scale)| (0.25 * p.iter().sum::<f64>()).max(f64::MIN_POSITIVE).ln() + scale)
            .collect()
    }
}
