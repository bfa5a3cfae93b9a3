use crate::error::{TfResult, TreeForgeError};
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(Args, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[command(flatten)]
    pub search: SearchParams,
    #[command(flatten)]
    pub nni: NniParams,
    #[command(flatten)]
    pub perturb: PerturbParams,
    #[command(flatten)]
    pub stop: StopParams,
    #[command(flatten)]
    pub bootstrap: BootstrapParams,
}

/// Which stored tree the next perturbation starts from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SamplingStrategy {
    /// Uniform among the top-K trees.
    RandomTop,
    /// Always the best tree.
    Best,
    /// Cycle through the top-K trees in rank order.
    RoundRobin,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PerturbationKind {
    /// Quartet-guided leaf deletion and reinsertion.
    Iqp,
    /// Random NNI swaps on non-tabu branches.
    RandomNni,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum QuartetTest {
    /// Four-point condition on pairwise distances.
    Distance,
    /// Majority of parsimony-informative sites.
    Parsimony,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StopMode {
    /// Run exactly `max_iterations`.
    FixedIterations,
    /// Stop after `patience` iterations without a better tree.
    Unsuccessful,
    /// Stop once bootstrap split supports stop moving.
    BootstrapCorrelation,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Maximum number of distinct trees kept in the candidate set.
    #[arg(long, default_value_t = 100)]
    pub candidate_capacity: usize,
    /// Size of the top tier used for sampling and split support.
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,
    #[arg(long, value_enum, default_value_t = SamplingStrategy::RandomTop)]
    pub sampling: SamplingStrategy,
    /// Minimum gain for a score to count as an improvement.
    #[arg(long, default_value_t = 1e-4)]
    pub score_tolerance: f64,
    /// Fraction of the top-K trees used as split-support reference.
    #[arg(long, default_value_t = 1.0)]
    pub support_fraction: f64,
    /// Support at or above which a split is considered stable (tabu).
    #[arg(long, default_value_t = 1.0)]
    pub stable_threshold: f64,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_tabu: bool,
    /// Number of random starting trees when none are supplied.
    #[arg(long, default_value_t = 10)]
    pub initial_trees: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            candidate_capacity: 100,
            top_k: 5,
            sampling: SamplingStrategy::RandomTop,
            score_tolerance: 1e-4,
            support_fraction: 1.0,
            stable_threshold: 1.0,
            use_tabu: true,
            initial_trees: 10,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NniParams {
    /// A round gaining less than this ends the local search.
    #[arg(long, default_value_t = 1e-4)]
    pub nni_epsilon: f64,
    /// Round cap; 0 means the number of taxa.
    #[arg(long, default_value_t = 0)]
    pub nni_max_rounds: usize,
    /// Branch-length sweeps after each applied batch.
    #[arg(long, default_value_t = 2)]
    pub length_rounds: usize,
}

impl Default for NniParams {
    fn default() -> Self {
        Self {
            nni_epsilon: 1e-4,
            nni_max_rounds: 0,
            length_rounds: 2,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbParams {
    #[arg(long, value_enum, default_value_t = PerturbationKind::Iqp)]
    pub perturbation: PerturbationKind,
    #[arg(long, value_enum, default_value_t = QuartetTest::Distance)]
    pub quartet_test: QuartetTest,
    /// Fraction of taxa removed (IQP) or of internal branches swapped (random NNI).
    #[arg(long, default_value_t = 0.5)]
    pub perturb_strength: f64,
    /// Representative leaves sampled per subtree for quartet voting.
    #[arg(long, default_value_t = 4)]
    pub representatives: usize,
    /// Repeated local optima tolerated before the removal count grows.
    #[arg(long, default_value_t = 3)]
    pub duplicate_patience: usize,
    #[arg(long, default_value_t = 1)]
    pub strength_step: usize,
    /// Iterations between resets of the removal count; 0 disables.
    #[arg(long, default_value_t = 50)]
    pub strength_reset_interval: usize,
}

impl Default for PerturbParams {
    fn default() -> Self {
        Self {
            perturbation: PerturbationKind::Iqp,
            quartet_test: QuartetTest::Distance,
            perturb_strength: 0.5,
            representatives: 4,
            duplicate_patience: 3,
            strength_step: 1,
            strength_reset_interval: 50,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopParams {
    #[arg(long, value_enum, default_value_t = StopMode::Unsuccessful)]
    pub stop_mode: StopMode,
    #[arg(long, default_value_t = 10)]
    pub min_iterations: usize,
    #[arg(long, default_value_t = 1000)]
    pub max_iterations: usize,
    /// Unsuccessful iterations tolerated before stopping.
    #[arg(long, default_value_t = 100)]
    pub patience: usize,
    /// Extra patience per taxon; the larger of the two limits applies.
    #[arg(long, default_value_t = 0.0)]
    pub patience_per_taxon: f64,
    /// Hard cap regardless of mode.
    #[arg(long, default_value_t = 10_000)]
    pub absolute_max_iterations: usize,
    #[arg(long, default_value_t = 0.99)]
    pub correlation_threshold: f64,
    /// Iterations between support-correlation checks.
    #[arg(long, default_value_t = 20)]
    pub check_interval: usize,
    /// Length of the rolling window of per-iteration NNI counts.
    #[arg(long, default_value_t = 10)]
    pub move_window: usize,
}

impl Default for StopParams {
    fn default() -> Self {
        Self {
            stop_mode: StopMode::Unsuccessful,
            min_iterations: 10,
            max_iterations: 1000,
            patience: 100,
            patience_per_taxon: 0.0,
            absolute_max_iterations: 10_000,
            correlation_threshold: 0.99,
            check_interval: 20,
            move_window: 10,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapParams {
    /// RELL bootstrap replicates; 0 disables support tracking.
    #[arg(long, default_value_t = 0)]
    pub replicates: usize,
    /// Score difference below which two replicate optima tie.
    #[arg(long, default_value_t = 0.01)]
    pub bootstrap_tolerance: f64,
}

impl Default for BootstrapParams {
    fn default() -> Self {
        Self {
            replicates: 0,
            bootstrap_tolerance: 0.01,
        }
    }
}

fn check(cond: bool, msg: impl FnOnce() -> String) -> TfResult<()> {
    if cond {
        Ok(())
    } else {
        Err(TreeForgeError::Config(msg()))
    }
}

fn in_unit(x: f64) -> bool {
    x > 0.0 && x <= 1.0
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TfResult<Self> {
        let text = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&text)?;
        Ok(cfg)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> TfResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Copies every value the user typed on the command line over the
    /// loaded file config, leaving file values in place for flags that were
    /// left at their defaults.
    pub fn merge_from_cli(&mut self, cli: &Config, matches: &ArgMatches) {
        macro_rules! update_if_present {
            ($group:ident . $field:ident) => {
                if matches.value_source(stringify!($field)) == Some(ValueSource::CommandLine) {
                    self.$group.$field = cli.$group.$field.clone();
                }
            };
        }

        update_if_present!(search.candidate_capacity);
        update_if_present!(search.top_k);
        update_if_present!(search.sampling);
        update_if_present!(search.score_tolerance);
        update_if_present!(search.support_fraction);
        update_if_present!(search.stable_threshold);
        update_if_present!(search.use_tabu);
        update_if_present!(search.initial_trees);

        update_if_present!(nni.nni_epsilon);
        update_if_present!(nni.nni_max_rounds);
        update_if_present!(nni.length_rounds);

        update_if_present!(perturb.perturbation);
        update_if_present!(perturb.quartet_test);
        update_if_present!(perturb.perturb_strength);
        update_if_present!(perturb.representatives);
        update_if_present!(perturb.duplicate_patience);
        update_if_present!(perturb.strength_step);
        update_if_present!(perturb.strength_reset_interval);

        update_if_present!(stop.stop_mode);
        update_if_present!(stop.min_iterations);
        update_if_present!(stop.max_iterations);
        update_if_present!(stop.patience);
        update_if_present!(stop.patience_per_taxon);
        update_if_present!(stop.absolute_max_iterations);
        update_if_present!(stop.correlation_threshold);
        update_if_present!(stop.check_interval);
        update_if_present!(stop.move_window);

        update_if_present!(bootstrap.replicates);
        update_if_present!(bootstrap.bootstrap_tolerance);
    }

    /// Rejects contradictory or out-of-range settings before a search starts.
    pub fn validate(&self) -> TfResult<()> {
        let s = &self.search;
        check(s.candidate_capacity > 0, || "candidate_capacity must be positive".into())?;
        check(s.top_k > 0, || "top_k must be positive".into())?;
        check(s.score_tolerance >= 0.0, || "score_tolerance must be non-negative".into())?;
        check(in_unit(s.support_fraction), || {
            format!("support_fraction {} not in (0, 1]", s.support_fraction)
        })?;
        check(in_unit(s.stable_threshold), || {
            format!("stable_threshold {} not in (0, 1]", s.stable_threshold)
        })?;

        check(self.nni.nni_epsilon >= 0.0, || "nni_epsilon must be non-negative".into())?;

        let p = &self.perturb;
        check(in_unit(p.perturb_strength), || {
            format!("perturb_strength {} not in (0, 1]", p.perturb_strength)
        })?;
        check(p.representatives > 0, || "representatives must be positive".into())?;

        let st = &self.stop;
        check(st.min_iterations <= st.max_iterations, || {
            format!(
                "min_iterations ({}) exceeds max_iterations ({})",
                st.min_iterations, st.max_iterations
            )
        })?;
        check(st.max_iterations <= st.absolute_max_iterations, || {
            format!(
                "max_iterations ({}) exceeds absolute_max_iterations ({})",
                st.max_iterations, st.absolute_max_iterations
            )
        })?;
        check(st.patience_per_taxon >= 0.0, || "patience_per_taxon must be non-negative".into())?;
        check(st.move_window > 0, || "move_window must be positive".into())?;
        if st.stop_mode == StopMode::BootstrapCorrelation {
            check(st.check_interval > 0, || "check_interval must be positive".into())?;
            check(self.bootstrap.replicates > 0, || {
                "bootstrap-correlation stopping needs replicates > 0".into()
            })?;
            check(in_unit(st.correlation_threshold), || {
                format!(
                    "correlation_threshold {} not in (0, 1]",
                    st.correlation_threshold
                )
            })?;
        }

        check(self.bootstrap.bootstrap_tolerance >= 0.0, || {
            "bootstrap_tolerance must be non-negative".into()
        })?;
        Ok(())
    }
}
