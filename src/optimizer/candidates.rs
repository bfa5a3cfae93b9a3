use crate::config::{SamplingStrategy, SearchParams};
use crate::tree::{Split, Tree};
use fastrand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use strum_macros::Display;

/// Stable index of a topology in the candidate set's topology log. Ids stay
/// valid after the tree itself is evicted.
pub type TreeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum UpdateOutcome {
    Inserted,
    Improved,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct CandidateTree {
    pub id: TreeId,
    pub tree: Tree,
    pub score: f64,
    pub splits: Vec<Split>,
}

/// How many reference trees contain each split.
#[derive(Debug, Clone, Default)]
pub struct SplitSupportMap {
    counts: HashMap<Split, usize>,
    reference_size: usize,
}

impl SplitSupportMap {
    pub fn from_trees<'a, I>(trees: I) -> Self
    where
        I: IntoIterator<Item = &'a [Split]>,
    {
        let mut map = Self::default();
        for splits in trees {
            map.reference_size += 1;
            for s in splits {
                *map.counts.entry(s.clone()).or_insert(0) += 1;
            }
        }
        map
    }

    pub fn reference_size(&self) -> usize {
        self.reference_size
    }

    pub fn count(&self, split: &Split) -> usize {
        self.counts.get(split).copied().unwrap_or(0)
    }

    pub fn support(&self, split: &Split) -> f64 {
        if self.reference_size == 0 {
            return 0.0;
        }
        self.count(split) as f64 / self.reference_size as f64
    }

    pub fn is_stable(&self, split: &Split, threshold: f64) -> bool {
        self.reference_size > 0 && self.support(split) >= threshold
    }

    pub fn stable_splits(&self, threshold: f64) -> HashSet<Split> {
        self.counts
            .keys()
            .filter(|s| self.is_stable(s, threshold))
            .cloned()
            .collect()
    }
}

/// Bounded, deduplicated pool of visited topologies keyed by their canonical
/// Newick fingerprint.
///
/// The best score never decreases and the best tree is never evicted.
pub struct CandidateSet {
    entries: HashMap<TreeId, CandidateTree>,
    index: HashMap<String, TreeId>,
    log: Vec<String>,

    capacity: usize,
    tolerance: f64,
    top_k: usize,
    sampling: SamplingStrategy,
    support_fraction: f64,
    stable_threshold: f64,

    best: Option<TreeId>,
    best_score: f64,
    cursor: usize,

    support: SplitSupportMap,
    support_members: Vec<TreeId>,
}

impl CandidateSet {
    pub fn new(params: &SearchParams) -> Self {
        Self {
            entries: HashMap::new(),
            index: HashMap::new(),
            log: Vec::new(),
            capacity: params.candidate_capacity.max(1),
            tolerance: params.score_tolerance,
            top_k: params.top_k.max(1),
            sampling: params.sampling,
            support_fraction: params.support_fraction,
            stable_threshold: params.stable_threshold,
            best: None,
            best_score: f64::NEG_INFINITY,
            cursor: 0,
            support: SplitSupportMap::default(),
            support_members: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&SearchParams {
            candidate_capacity: capacity,
            ..SearchParams::default()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct topologies in the log, admitted or not.
    pub fn topology_count(&self) -> usize {
        self.log.len()
    }

    pub fn fingerprint(&self, id: TreeId) -> Option<&str> {
        self.log.get(id).map(String::as_str)
    }

    pub fn id_of(&self, fingerprint: &str) -> Option<TreeId> {
        self.index.get(fingerprint).copied()
    }

    /// Logs a topology without admitting it to the set.
    pub fn register(&mut self, tree: &Tree) -> TreeId {
        let key = tree.fingerprint();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.log.len();
        self.log.push(key.clone());
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, id: TreeId) -> Option<&CandidateTree> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateTree> {
        self.entries.values()
    }

    /// Inserts a new topology, or raises the stored score of a known one when
    /// `score` beats it by more than the tolerance. Never lowers a score.
    pub fn update(&mut self, tree: &Tree, score: f64) -> (TreeId, UpdateOutcome) {
        let key = tree.fingerprint();
        let previous_best = self.best_score;

        let (id, outcome) = match self.index.get(&key).copied() {
            Some(id) => match self.entries.get_mut(&id) {
                Some(entry) if score > entry.score + self.tolerance => {
                    entry.score = score;
                    entry.tree = tree.clone();
                    (id, UpdateOutcome::Improved)
                }
                Some(_) => (id, UpdateOutcome::Unchanged),
                None => {
                    self.admit(id, tree, score);
                    (id, UpdateOutcome::Inserted)
                }
            },
            None => {
                let id = self.log.len();
                self.log.push(key.clone());
                self.index.insert(key, id);
                self.admit(id, tree, score);
                (id, UpdateOutcome::Inserted)
            }
        };

        if outcome != UpdateOutcome::Unchanged {
            if self.best.is_none() || score > self.best_score {
                self.best = Some(id);
                self.best_score = score;
            }
            self.evict_overflow();
        }

        assert!(
            self.best_score >= previous_best,
            "best score regressed from {} to {}",
            previous_best,
            self.best_score
        );
        (id, outcome)
    }

    fn admit(&mut self, id: TreeId, tree: &Tree, score: f64) {
        self.entries.insert(
            id,
            CandidateTree {
                id,
                tree: tree.clone(),
                score,
                splits: tree.splits(),
            },
        );
    }

    /// Drops the lowest-scoring entries (latest discovery first on ties),
    /// skipping the current best.
    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .values()
                .filter(|e| Some(e.id) != self.best)
                .min_by(|a, b| a.score.total_cmp(&b.score).then(b.id.cmp(&a.id)))
                .map(|e| e.id);
            match victim {
                Some(id) => {
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }

    /// # Panics
    /// On an empty set.
    pub fn best(&self) -> &CandidateTree {
        self.best
            .and_then(|id| self.entries.get(&id))
            .unwrap_or_else(|| panic!("best() queried on an empty candidate set"))
    }

    /// # Panics
    /// On an empty set.
    pub fn best_score(&self) -> f64 {
        assert!(self.best.is_some(), "best_score() queried on an empty candidate set");
        self.best_score
    }

    /// The `k` highest-scoring trees, ties broken by discovery order.
    pub fn best_trees(&self, k: usize) -> Vec<&CandidateTree> {
        let mut all: Vec<&CandidateTree> = self.entries.values().collect();
        all.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        all.truncate(k);
        all
    }

    /// Picks the starting tree for the next perturbation.
    ///
    /// # Panics
    /// On an empty set.
    pub fn sample_for_perturbation(&mut self, rng: &mut Rng) -> Tree {
        assert!(!self.is_empty(), "sampled from an empty candidate set");
        match self.sampling {
            SamplingStrategy::Best => self.best().tree.clone(),
            SamplingStrategy::RandomTop => {
                let top = self.best_trees(self.top_k);
                top[rng.usize(0..top.len())].tree.clone()
            }
            SamplingStrategy::RoundRobin => {
                let top = self.best_trees(self.top_k);
                let pick = top[self.cursor % top.len()].tree.clone();
                self.cursor = self.cursor.wrapping_add(1);
                pick
            }
        }
    }

    /// Split counts over the best `top_fraction` of the top-K trees.
    pub fn build_split_support(&self, top_fraction: f64) -> SplitSupportMap {
        let top = self.best_trees(self.top_k);
        let m = ((top.len() as f64 * top_fraction).ceil() as usize).clamp(1, top.len().max(1));
        SplitSupportMap::from_trees(top.iter().take(m).map(|e| e.splits.as_slice()))
    }

    /// Cached support map, rebuilt only when the top-K membership changed.
    pub fn split_support(&mut self) -> &SplitSupportMap {
        let members: Vec<TreeId> = self.best_trees(self.top_k).iter().map(|e| e.id).collect();
        if members != self.support_members {
            self.support = self.build_split_support(self.support_fraction);
            self.support_members = members;
        }
        &self.support
    }

    pub fn is_stable(&mut self, split: &Split) -> bool {
        let threshold = self.stable_threshold;
        self.split_support().is_stable(split, threshold)
    }

    /// Splits currently considered stable; used as the tabu set.
    pub fn stable_splits(&mut self) -> HashSet<Split> {
        let threshold = self.stable_threshold;
        self.split_support().stable_splits(threshold)
    }
}
