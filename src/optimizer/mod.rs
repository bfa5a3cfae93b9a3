pub mod bootstrap;
pub mod candidates;
pub mod nni;
pub mod perturbation;
pub mod quartet;
pub mod runner;
pub mod stopping;

pub use bootstrap::{BootstrapTracker, Replicate};
pub use candidates::{CandidateSet, CandidateTree, SplitSupportMap, TreeId, UpdateOutcome};
pub use nni::{NniMove, NniOutcome, NniSearch};
pub use perturbation::{Perturbation, Perturber};
pub use quartet::QuartetEvidence;
pub use runner::{
    random_starting_trees, IterationRecord, NoProgress, ProgressCallback, SearchContext,
    SearchResult, TreeSearch,
};
pub use stopping::{StopDecision, StopReason, StoppingRule};
