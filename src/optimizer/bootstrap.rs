//! RELL bootstrap: every replicate reweights the per-site scores of each
//! visited tree instead of re-running the search on resampled data.

use super::candidates::TreeId;
use crate::alignment::resample_site_weights;
use crate::error::{TfResult, TreeForgeError};
use crate::tree::Split;
use fastrand::Rng;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Replicate {
    pub weights: Vec<u32>,
    pub best_score: f64,
    pub best_tree: Option<TreeId>,
    /// Trees seen tying for the best score; drives reservoir sampling.
    pub hits: u32,
}

impl Replicate {
    fn new(weights: Vec<u32>) -> Self {
        Self {
            weights,
            best_score: f64::NEG_INFINITY,
            best_tree: None,
            hits: 0,
        }
    }

    pub fn resampled_score(&self, site_scores: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(site_scores)
            .map(|(&w, &s)| w as f64 * s)
            .sum()
    }
}

pub struct BootstrapTracker {
    replicates: Vec<Replicate>,
    tolerance: f64,
    /// Trees already offered; a topology gets one draw per replicate.
    seen: HashSet<TreeId>,
}

impl BootstrapTracker {
    pub fn new(num_sites: usize, count: usize, tolerance: f64, rng: &mut Rng) -> TfResult<Self> {
        let mut replicates = Vec::new();
        replicates.try_reserve_exact(count).map_err(|e| {
            TreeForgeError::Resource(format!("cannot allocate {} replicates: {}", count, e))
        })?;
        for _ in 0..count {
            replicates.push(Replicate::new(resample_site_weights(num_sites, rng)?));
        }
        Ok(Self {
            replicates,
            tolerance,
            seen: HashSet::new(),
        })
    }

    /// Tracker over explicit site weights.
    pub fn with_weights(weights: Vec<Vec<u32>>, tolerance: f64) -> Self {
        Self {
            replicates: weights.into_iter().map(Replicate::new).collect(),
            tolerance,
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicates.is_empty()
    }

    pub fn has_seen(&self, id: TreeId) -> bool {
        self.seen.contains(&id)
    }

    pub fn replicates(&self) -> &[Replicate] {
        &self.replicates
    }

    /// Offers a visited tree to every replicate. A clear winner replaces the
    /// replicate's best tree; a tie within tolerance replaces it with
    /// probability `1 / hits`, so each tied tree is equally likely to be
    /// kept. Only the first offer of a tree counts; later ones are ignored.
    /// Returns how many replicates changed owner.
    pub fn observe(&mut self, id: TreeId, site_scores: &[f64], rng: &mut Rng) -> usize {
        if !self.seen.insert(id) {
            return 0;
        }
        let scores: Vec<f64> = self
            .replicates
            .par_iter()
            .map(|r| r.resampled_score(site_scores))
            .collect();

        let mut changed = 0;
        for (rep, score) in self.replicates.iter_mut().zip(scores) {
            if rep.best_tree.is_none() || score > rep.best_score + self.tolerance {
                rep.best_score = score;
                rep.hits = 1;
                rep.best_tree = Some(id);
                changed += 1;
            } else if (score - rep.best_score).abs() <= self.tolerance {
                rep.hits += 1;
                rep.best_score = rep.best_score.max(score);
                if rng.u32(0..rep.hits) == 0 {
                    rep.best_tree = Some(id);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// How many replicates each tree currently owns.
    pub fn owner_counts(&self) -> HashMap<TreeId, usize> {
        let mut counts = HashMap::new();
        for id in self.replicates.iter().filter_map(|r| r.best_tree) {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts
    }

    /// Fraction of owned replicates whose best tree contains each split.
    /// `resolve` maps a tree id to its splits; ids it cannot resolve are
    /// skipped.
    pub fn split_support<F>(&self, mut resolve: F) -> HashMap<Split, f64>
    where
        F: FnMut(TreeId) -> Option<Vec<Split>>,
    {
        let owners = self.owner_counts();
        let total: usize = owners.values().sum();
        let mut support: HashMap<Split, f64> = HashMap::new();
        if total == 0 {
            return support;
        }
        let mut ids: Vec<TreeId> = owners.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(splits) = resolve(id) else {
                continue;
            };
            let weight = owners[&id] as f64 / total as f64;
            for s in splits {
                *support.entry(s).or_insert(0.0) += weight;
            }
        }
        support
    }
}
