use super::bootstrap::BootstrapTracker;
use super::candidates::{CandidateSet, CandidateTree, TreeId, UpdateOutcome};
use super::nni::{NniOutcome, NniSearch};
use super::perturbation::Perturber;
use super::quartet::QuartetEvidence;
use super::stopping::{StopDecision, StopReason, StoppingRule};
use crate::config::Config;
use crate::engine::{ContinuousOptimizer, LikelihoodEngine};
use crate::error::{TfResult, TreeForgeError};
use crate::tree::{Branch, Split, Tree};
use fastrand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of the iteration log.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub tree_id: TreeId,
    pub outcome: UpdateOutcome,
    pub score: f64,
    pub best_score: f64,
    pub strength: usize,
    pub nni_moves: usize,
    pub nni_rounds: usize,
    pub rollbacks: usize,
    pub topologies: usize,
    pub correlation: Option<f64>,
}

/// A trait for receiving updates between outer iterations.
/// Boolean return value indicates if the search should continue (true) or abort (false).
pub trait ProgressCallback: Send + Sync {
    fn on_iteration(&self, record: &IterationRecord) -> bool;
}

impl<F> ProgressCallback for F
where
    F: Fn(&IterationRecord) -> bool + Send + Sync,
{
    fn on_iteration(&self, record: &IterationRecord) -> bool {
        self(record)
    }
}

pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_iteration(&self, _record: &IterationRecord) -> bool {
        true
    }
}

/// Everything an iteration reads and writes. The search owns exactly one
/// and threads it through each step.
pub struct SearchContext {
    pub rng: Rng,
    pub candidates: CandidateSet,
    pub bootstrap: Option<BootstrapTracker>,
    pub stopping: StoppingRule,
}

pub struct SearchResult {
    pub best: CandidateTree,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub log: Vec<IterationRecord>,
    pub candidates: CandidateSet,
    pub bootstrap: Option<BootstrapTracker>,
}

/// Split support over the replicates' best trees. Trees that were evicted
/// from the candidate set are rebuilt from their fingerprint.
fn replicate_support(
    bootstrap: &BootstrapTracker,
    candidates: &CandidateSet,
    taxa: &Arc<Vec<String>>,
) -> HashMap<Split, f64> {
    bootstrap.split_support(|id| {
        if let Some(entry) = candidates.get(id) {
            return Some(entry.splits.clone());
        }
        let fingerprint = candidates.fingerprint(id)?;
        Tree::from_newick(fingerprint, taxa).ok().map(|t| t.splits())
    })
}

impl SearchResult {
    pub fn best_score(&self) -> f64 {
        self.best.score
    }

    pub fn top_trees(&self, k: usize) -> Vec<&CandidateTree> {
        self.candidates.best_trees(k)
    }

    /// Support of every split seen among the replicates' best trees. Empty
    /// when bootstrap tracking was off.
    pub fn split_support(&self) -> HashMap<Split, f64> {
        match &self.bootstrap {
            Some(bt) => replicate_support(bt, &self.candidates, self.best.tree.taxa()),
            None => HashMap::new(),
        }
    }

    /// Support of each internal branch of the best tree, or `None` without
    /// bootstrap replicates.
    pub fn branch_support(&self) -> Option<Vec<(Branch, f64)>> {
        self.bootstrap.as_ref()?;
        let support = self.split_support();
        Some(
            self.best
                .tree
                .branch_splits()
                .into_iter()
                .map(|(b, s)| (b, support.get(&s).copied().unwrap_or(0.0)))
                .collect(),
        )
    }

    pub fn write_log<W: Write>(&self, writer: W) -> TfResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for record in &self.log {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_log<P: AsRef<Path>>(&self, path: P) -> TfResult<()> {
        let file = std::fs::File::create(path)?;
        self.write_log(file)
    }
}

/// `count` random stepwise-addition trees.
pub fn random_starting_trees(taxa: &Arc<Vec<String>>, count: usize, seed: Option<u64>) -> TfResult<Vec<Tree>> {
    let mut rng = match seed {
        Some(s) => Rng::with_seed(s.wrapping_add(9999)),
        None => Rng::new(),
    };
    (0..count.max(1))
        .map(|_| Tree::random(Arc::clone(taxa), &mut rng))
        .collect()
}

/// Iterated local search: perturb a stored tree, climb with NNI, remember
/// the result, until the stopping rule says otherwise.
pub struct TreeSearch {
    engine: Arc<dyn LikelihoodEngine>,
    optimizer: Arc<dyn ContinuousOptimizer>,
    evidence: Option<QuartetEvidence>,
    config: Config,
}

impl TreeSearch {
    pub fn new(
        engine: Arc<dyn LikelihoodEngine>,
        optimizer: Arc<dyn ContinuousOptimizer>,
        config: Config,
    ) -> Self {
        Self {
            engine,
            optimizer,
            evidence: None,
            config,
        }
    }

    pub fn with_quartet_evidence(mut self, evidence: QuartetEvidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_inputs(&self, initial: &[Tree]) -> TfResult<usize> {
        self.config.validate()?;
        let first = initial.first().ok_or_else(|| {
            TreeForgeError::Config("at least one starting tree is required".to_string())
        })?;
        let n = first.num_taxa();
        if n < 4 {
            return Err(TreeForgeError::Config(format!(
                "tree search needs at least 4 taxa, got {}",
                n
            )));
        }
        for tree in initial {
            if tree.taxa() != first.taxa() {
                return Err(TreeForgeError::Config(
                    "starting trees disagree on the taxon set".to_string(),
                ));
            }
            tree.validate()?;
        }
        Ok(n)
    }

    pub fn run<CB: ProgressCallback>(
        &self,
        initial: Vec<Tree>,
        seed: Option<u64>,
        callback: CB,
    ) -> TfResult<SearchResult> {
        let n = self.check_inputs(&initial)?;
        let cfg = &self.config;

        let mut rng = match seed {
            Some(s) => Rng::with_seed(s),
            None => Rng::new(),
        };
        let bootstrap = if cfg.bootstrap.replicates > 0 {
            Some(BootstrapTracker::new(
                self.engine.num_sites(),
                cfg.bootstrap.replicates,
                cfg.bootstrap.bootstrap_tolerance,
                &mut rng,
            )?)
        } else {
            None
        };
        let mut ctx = SearchContext {
            rng,
            candidates: CandidateSet::new(&cfg.search),
            bootstrap,
            stopping: StoppingRule::new(&cfg.stop, n),
        };
        let mut perturber = Perturber::new(&cfg.perturb, n, self.evidence.clone())?;
        let nni = NniSearch::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.optimizer),
            &cfg.nni,
        );

        info!(trees = initial.len(), taxa = n, "optimizing starting trees");
        let no_tabu = HashSet::new();
        for tree in initial {
            let climbed = self.climb(&nni, tree, &no_tabu);
            self.remember(&mut ctx, &climbed);
        }
        info!(score = ctx.candidates.best_score(), "best starting tree");

        let mut log = Vec::new();
        let stop_reason = loop {
            if let StopDecision::Stop(reason) = ctx.stopping.decide() {
                break reason;
            }
            let iteration = ctx.stopping.iteration() + 1;
            let record = self.iterate(&mut ctx, &mut perturber, &nni, iteration)?;
            let keep_going = callback.on_iteration(&record);
            log.push(record);
            if !keep_going {
                break StopReason::Cancelled;
            }
        };

        if stop_reason == StopReason::AbsoluteCap {
            warn!(
                iterations = ctx.stopping.iteration(),
                "search hit the absolute iteration cap"
            );
        }
        info!(
            reason = %stop_reason,
            iterations = ctx.stopping.iteration(),
            best = ctx.candidates.best_score(),
            "search finished"
        );

        Ok(SearchResult {
            best: ctx.candidates.best().clone(),
            stop_reason,
            iterations: ctx.stopping.iteration(),
            log,
            candidates: ctx.candidates,
            bootstrap: ctx.bootstrap,
        })
    }

    fn climb(&self, nni: &NniSearch, mut tree: Tree, tabu: &HashSet<Split>) -> NniOutcome {
        let score = self
            .optimizer
            .optimize_branch_lengths(&mut tree, self.config.nni.length_rounds);
        nni.run(tree, score, tabu)
    }

    /// Offers a local optimum to the candidate set. The replicates also see
    /// every tree the climb passed through.
    fn remember(&self, ctx: &mut SearchContext, climbed: &NniOutcome) -> (TreeId, UpdateOutcome) {
        if ctx.bootstrap.is_some() {
            for (tree, _) in &climbed.visited {
                let id = ctx.candidates.register(tree);
                self.offer_to_replicates(ctx, id, tree);
            }
        }
        let (id, outcome) = ctx.candidates.update(&climbed.tree, climbed.score);
        self.offer_to_replicates(ctx, id, &climbed.tree);
        (id, outcome)
    }

    fn offer_to_replicates(&self, ctx: &mut SearchContext, id: TreeId, tree: &Tree) {
        let Some(bt) = ctx.bootstrap.as_mut() else {
            return;
        };
        if bt.has_seen(id) {
            return;
        }
        let sites = self.engine.site_log_likelihoods(tree);
        let changed = bt.observe(id, &sites, &mut ctx.rng);
        debug!(tree = id, changed, "bootstrap replicates updated");
    }

    fn iterate(
        &self,
        ctx: &mut SearchContext,
        perturber: &mut Perturber,
        nni: &NniSearch,
        iteration: usize,
    ) -> TfResult<IterationRecord> {
        let cfg = &self.config;
        let start = ctx.candidates.sample_for_perturbation(&mut ctx.rng);
        let stable = if cfg.search.use_tabu {
            ctx.candidates.stable_splits()
        } else {
            HashSet::new()
        };

        let perturbed = perturber.perturb(&start, &stable, &mut ctx.rng)?;
        let mut tabu = perturbed.tabu;
        tabu.extend(stable);
        let climbed = self.climb(nni, perturbed.tree, &tabu);

        let previous_best = ctx.candidates.best_score();
        let (id, outcome) = self.remember(ctx, &climbed);
        perturber.record_outcome(outcome != UpdateOutcome::Inserted);

        let best_score = ctx.candidates.best_score();
        let improved = best_score > previous_best + cfg.search.score_tolerance;
        if improved {
            info!(iteration, score = best_score, "found better tree");
        }
        ctx.stopping.record_iteration(iteration, improved, climbed.nni_count);

        let mut correlation = None;
        if ctx.stopping.wants_support_snapshot() {
            if let Some(bt) = &ctx.bootstrap {
                let snapshot = replicate_support(bt, &ctx.candidates, start.taxa());
                correlation = ctx.stopping.record_support(snapshot);
                debug!(iteration, ?correlation, "split support checkpoint");
            }
        }

        Ok(IterationRecord {
            iteration,
            tree_id: id,
            outcome,
            score: climbed.score,
            best_score,
            strength: perturbed.strength,
            nni_moves: climbed.nni_count,
            nni_rounds: climbed.rounds,
            rollbacks: climbed.rollbacks,
            topologies: ctx.candidates.topology_count(),
            correlation,
        })
    }
}
