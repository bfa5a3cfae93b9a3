use crate::reports;
use clap::{ArgMatches, Args, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::Display;
use tracing::info;
use treeforge::alignment::Alignment;
use treeforge::config::Config;
use treeforge::engine::{
    BranchLengthOptimizer, ContinuousOptimizer, FixedLengths, Jc69Engine, LikelihoodEngine,
    ParsimonyEngine,
};
use treeforge::optimizer::{
    random_starting_trees, IterationRecord, ProgressCallback, QuartetEvidence, TreeSearch,
};
use treeforge::tree::newick;
use treeforge::TfResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EngineKind {
    /// Fitch parsimony; branch lengths are ignored.
    Parsimony,
    /// Jukes-Cantor likelihood with branch-length optimization.
    Jc69,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub config: Config,

    /// FASTA alignment.
    #[arg(short = 'A', long)]
    pub alignment: PathBuf,

    /// Newick starting trees, one per line. Random trees when absent.
    #[arg(short = 't', long)]
    pub trees: Option<PathBuf>,

    #[arg(short = 'e', long, value_enum, default_value_t = EngineKind::Jc69)]
    pub engine: EngineKind,

    /// JSON config; flags given on the command line override it.
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Write the per-iteration log as CSV.
    #[arg(short = 'l', long)]
    pub log: Option<PathBuf>,

    /// Write the best tree as Newick.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub top: usize,

    #[arg(short = 'S', long)]
    pub seed: Option<u64>,
}

struct CliLogger;
impl ProgressCallback for CliLogger {
    fn on_iteration(&self, r: &IterationRecord) -> bool {
        info!(
            "It {:5} | {:>9} | Score: {:.4} | Best: {:.4} | NNI: {:3} | Trees: {}",
            r.iteration, r.outcome, r.score, r.best_score, r.nni_moves, r.topologies
        );
        true
    }
}

pub fn run(args: SearchArgs, matches: &ArgMatches) -> TfResult<()> {
    let config = match &args.config_file {
        Some(path) => {
            info!("📂 Loading Config: {}", path.display());
            let mut cfg = Config::load_from_file(path)?;
            cfg.merge_from_cli(&args.config, matches);
            cfg
        }
        None => args.config.clone(),
    };
    config.validate()?;

    info!("🧬 Loading Alignment: {}", args.alignment.display());
    let alignment = Arc::new(Alignment::load_fasta(&args.alignment)?);
    info!(
        "   {} taxa, {} sites",
        alignment.num_taxa(),
        alignment.num_sites()
    );

    let (engine, optimizer): (Arc<dyn LikelihoodEngine>, Arc<dyn ContinuousOptimizer>) =
        match args.engine {
            EngineKind::Parsimony => {
                let engine: Arc<dyn LikelihoodEngine> =
                    Arc::new(ParsimonyEngine::new(Arc::clone(&alignment)));
                let opt = Arc::new(FixedLengths::new(Arc::clone(&engine)));
                (engine, opt)
            }
            EngineKind::Jc69 => {
                let engine: Arc<dyn LikelihoodEngine> =
                    Arc::new(Jc69Engine::new(Arc::clone(&alignment)));
                let opt = Arc::new(BranchLengthOptimizer::new(Arc::clone(&engine)));
                (engine, opt)
            }
        };

    let initial = match &args.trees {
        Some(path) => {
            info!("🌳 Loading Trees: {}", path.display());
            newick::load_file(path, alignment.taxa())?
        }
        None => {
            info!(
                "🎲 Building {} random starting trees",
                config.search.initial_trees
            );
            random_starting_trees(alignment.taxa(), config.search.initial_trees, args.seed)?
        }
    };

    let evidence = QuartetEvidence::from_alignment(config.perturb.quartet_test, &alignment);
    info!(
        "🔥 Searching with {} engine, {} perturbation",
        args.engine, config.perturb.perturbation
    );
    let search = TreeSearch::new(engine, optimizer, config).with_quartet_evidence(evidence);
    let result = search.run(initial, args.seed, CliLogger)?;

    info!("\n=== 🏆 FINAL RESULT ===");
    info!("Stopped: {} after {} iterations", result.stop_reason, result.iterations);
    info!("Best score: {:.4}", result.best_score());

    reports::print_top_trees(&result.top_trees(args.top));
    if let Some(support) = result.branch_support() {
        reports::print_branch_support(&result.best.tree, &support);
    }

    let best_newick = result.best.tree.to_newick(true);
    if let Some(path) = &args.log {
        result.save_log(path)?;
        info!("📝 Iteration log written to {}", path.display());
    }
    if let Some(path) = &args.output {
        fs::write(path, format!("{}\n", best_newick))?;
        info!("💾 Best tree written to {}", path.display());
    }
    println!("{}", best_newick);
    Ok(())
}
