use super::quartet::{self, QuartetEvidence};
use crate::config::{PerturbParams, PerturbationKind};
use crate::error::{TfResult, TreeForgeError};
use crate::tree::{NodeId, Split, Tree};
use fastrand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// A perturbed copy of the starting tree. `tabu` holds splits created by the
/// perturbation that local search should not immediately undo.
#[derive(Debug, Clone)]
pub struct Perturbation {
    pub tree: Tree,
    pub tabu: HashSet<Split>,
    pub strength: usize,
}

/// Produces new starting points for local search and adapts its own
/// strength to how often the search falls back into known optima.
pub struct Perturber {
    kind: PerturbationKind,
    evidence: Option<QuartetEvidence>,
    representatives: usize,

    base_strength: usize,
    max_strength: usize,
    strength: usize,

    duplicate_patience: usize,
    strength_step: usize,
    reset_interval: usize,
    duplicates: usize,
    rounds: usize,
}

impl Perturber {
    /// IQP perturbation needs quartet evidence covering every taxon.
    pub fn new(
        params: &PerturbParams,
        num_taxa: usize,
        evidence: Option<QuartetEvidence>,
    ) -> TfResult<Self> {
        if num_taxa < 4 {
            return Err(TreeForgeError::Config(format!(
                "perturbation needs at least 4 taxa, got {}",
                num_taxa
            )));
        }
        if params.perturbation == PerturbationKind::Iqp {
            match &evidence {
                None => {
                    return Err(TreeForgeError::Config(
                        "IQP perturbation requires quartet evidence".to_string(),
                    ))
                }
                Some(ev) if ev.num_taxa() != num_taxa => {
                    return Err(TreeForgeError::Config(format!(
                        "quartet evidence covers {} taxa, tree has {}",
                        ev.num_taxa(),
                        num_taxa
                    )))
                }
                _ => {}
            }
        }

        let (units, max_strength) = match params.perturbation {
            // leaves removed; at least three must stay behind
            PerturbationKind::Iqp => (num_taxa, num_taxa - 3),
            // swaps on internal branches
            PerturbationKind::RandomNni => (num_taxa - 3, num_taxa - 3),
        };
        let base = ((params.perturb_strength * units as f64).round() as usize).clamp(1, max_strength);

        Ok(Self {
            kind: params.perturbation,
            evidence,
            representatives: params.representatives,
            base_strength: base,
            max_strength,
            strength: base,
            duplicate_patience: params.duplicate_patience.max(1),
            strength_step: params.strength_step,
            reset_interval: params.strength_reset_interval,
            duplicates: 0,
            rounds: 0,
        })
    }

    pub fn kind(&self) -> PerturbationKind {
        self.kind
    }

    /// Current leaves removed (IQP) or swaps applied (random NNI).
    pub fn strength(&self) -> usize {
        self.strength
    }

    pub fn perturb(&self, tree: &Tree, stable: &HashSet<Split>, rng: &mut Rng) -> TfResult<Perturbation> {
        match (self.kind, &self.evidence) {
            (PerturbationKind::Iqp, Some(evidence)) => self.iqp(tree, evidence, rng),
            (PerturbationKind::Iqp, None) => Err(TreeForgeError::Config(
                "IQP perturbation requires quartet evidence".to_string(),
            )),
            (PerturbationKind::RandomNni, _) => Ok(self.random_nni(tree, stable, rng)),
        }
    }

    /// Feeds back whether the local optimum reached from the last
    /// perturbation was already known.
    pub fn record_outcome(&mut self, duplicate: bool) {
        self.rounds += 1;
        if duplicate {
            self.duplicates += 1;
            if self.duplicates >= self.duplicate_patience {
                self.duplicates = 0;
                let next = (self.strength + self.strength_step).min(self.max_strength);
                if next != self.strength {
                    debug!(from = self.strength, to = next, "raising perturbation strength");
                    self.strength = next;
                }
            }
        } else {
            self.duplicates = 0;
        }
        if self.reset_interval > 0 && self.rounds % self.reset_interval == 0 {
            self.strength = self.base_strength;
            self.duplicates = 0;
        }
    }

    /// Removes `strength` leaves and reinserts them one by one, in removal
    /// order, at the branch with the strongest quartet support.
    fn iqp(&self, tree: &Tree, evidence: &QuartetEvidence, rng: &mut Rng) -> TfResult<Perturbation> {
        let removed = choose_leaves(tree, self.strength, rng);
        let mut t = tree.clone();
        for &leaf in &removed {
            t.remove_leaf(leaf)?;
        }
        for &leaf in &removed {
            let target = quartet::best_insertion_branch(&t, leaf, evidence, self.representatives, rng)
                .ok_or_else(|| TreeForgeError::Topology("reduced tree has no branches".to_string()))?;
            t.insert_leaf(leaf, target)?;
        }
        Ok(Perturbation {
            tree: t,
            tabu: HashSet::new(),
            strength: removed.len(),
        })
    }

    /// Applies random swaps on branches that are neither stable nor created
    /// by an earlier swap of this perturbation.
    fn random_nni(&self, tree: &Tree, stable: &HashSet<Split>, rng: &mut Rng) -> Perturbation {
        let mut t = tree.clone();
        let mut tabu: HashSet<Split> = HashSet::new();
        let mut applied = 0;
        for _ in 0..self.strength {
            let eligible: Vec<_> = t
                .branch_splits()
                .into_iter()
                .filter(|(_, s)| !stable.contains(s) && !tabu.contains(s))
                .map(|(b, _)| b)
                .collect();
            if eligible.is_empty() {
                break;
            }
            let branch = eligible[rng.usize(0..eligible.len())];
            let Some(alternatives) = t.nni_alternatives(branch) else {
                continue;
            };
            let swap = alternatives[rng.usize(0..2)];
            if t.apply_nni(&swap) {
                tabu.insert(t.split_of(branch));
                applied += 1;
            }
        }
        Perturbation {
            tree: t,
            tabu,
            strength: applied,
        }
    }
}

/// Picks `k` distinct leaves, preferring ones that do not share a parent
/// with an already chosen leaf.
pub fn choose_leaves(tree: &Tree, k: usize, rng: &mut Rng) -> Vec<NodeId> {
    let mut pool = tree.attached_leaves();
    let k = k.min(pool.len().saturating_sub(3));
    rng.shuffle(&mut pool);

    let mut chosen: Vec<NodeId> = Vec::with_capacity(k);
    let mut parents: HashSet<NodeId> = HashSet::new();
    for &leaf in &pool {
        if chosen.len() == k {
            break;
        }
        let Some(p) = tree.leaf_parent(leaf) else {
            continue;
        };
        if parents.insert(p) {
            chosen.push(leaf);
        }
    }
    for &leaf in &pool {
        if chosen.len() == k {
            break;
        }
        if !chosen.contains(&leaf) {
            chosen.push(leaf);
        }
    }
    chosen
}
