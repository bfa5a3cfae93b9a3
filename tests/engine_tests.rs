mod common;

use common::{named, taxa};
use std::io::Cursor;
use std::sync::Arc;
use treeforge::alignment::Alignment;
use treeforge::engine::{
    BranchLengthOptimizer, ContinuousOptimizer, FixedLengths, Jc69Engine, LikelihoodEngine,
    ParsimonyEngine,
};
use treeforge::tree::{Split, Tree};

fn four_taxon_alignment() -> Arc<Alignment> {
    let data = ">A\nAAG\n>B\nAAG\n>C\nCCG\n>D\nCCG\n";
    Arc::new(Alignment::from_fasta_reader(Cursor::new(data)).unwrap())
}

#[test]
fn test_parsimony_prefers_shared_states() {
    let aln = four_taxon_alignment();
    let engine = ParsimonyEngine::new(Arc::clone(&aln));
    let names = named(&["A", "B", "C", "D"]);
    let good = Tree::from_newick("((A,B),(C,D));", &names).unwrap();
    let bad = Tree::from_newick("((A,C),(B,D));", &names).unwrap();
    assert_eq!(engine.site_costs(&good), vec![1, 1, 0]);
    assert_eq!(engine.site_costs(&bad), vec![2, 2, 0]);
    assert_eq!(engine.evaluate(&good), -2.0);
    assert_eq!(engine.evaluate(&bad), -4.0);
}

#[test]
fn test_default_nni_evaluation_finds_the_fix() {
    let aln = four_taxon_alignment();
    let engine = ParsimonyEngine::new(aln);
    let names = named(&["A", "B", "C", "D"]);
    let bad = Tree::from_newick("((A,C),(B,D));", &names).unwrap();
    let branch = bad.internal_branches()[0];
    let eval = engine.evaluate_nni(&bad, branch).unwrap();
    assert_eq!(eval.score, -2.0);

    let mut fixed = bad.clone();
    assert!(fixed.apply_nni(&eval.swap));
    assert!(fixed.splits().contains(&Split::from_taxa(4, &[0, 1])));
    assert!(eval.lengths.len() <= 5);

    let pendant = treeforge::tree::Branch::new(0, bad.leaf_parent(0).unwrap());
    assert!(engine.evaluate_nni(&bad, pendant).is_none());
}

#[test]
fn test_jc69_is_finite_and_prefers_generating_tree() {
    let names = taxa(8);
    let truth = Tree::from_newick(common::EIGHT_TAXA, &names).unwrap();
    let aln = Arc::new(common::simulate_alignment(&truth, 1500, 17));
    let engine: Arc<dyn LikelihoodEngine> = Arc::new(Jc69Engine::new(aln));

    let sites = engine.site_log_likelihoods(&truth);
    assert_eq!(sites.len(), 1500);
    assert!(sites.iter().all(|s| s.is_finite() && *s < 0.0));

    // a far-off topology with fitted lengths still loses
    let wrong = Tree::from_newick(
        "((t0:0.1,t7:0.1):0.3,(t2:0.1,t5:0.1):0.3,((t4:0.1,t1:0.1):0.3,(t6:0.1,t3:0.1):0.3):0.3);",
        &names,
    )
    .unwrap();
    let optimizer = BranchLengthOptimizer::new(Arc::clone(&engine));
    let mut t = truth.clone();
    let mut w = wrong;
    let st = optimizer.optimize_branch_lengths(&mut t, 3);
    let sw = optimizer.optimize_branch_lengths(&mut w, 3);
    assert!(st > sw, "{} vs {}", st, sw);
}

#[test]
fn test_jc69_rescaling_keeps_long_trees_finite() {
    let names = taxa(40);
    let mut rng = fastrand::Rng::with_seed(3);
    let mut tree = Tree::random(Arc::clone(&names), &mut rng).unwrap();
    for b in tree.branches() {
        tree.set_length(b.node1, b.node2, 5.0);
    }
    let aln = Arc::new(common::simulate_alignment(&tree, 50, 1));
    let engine = Jc69Engine::new(aln);
    assert!(engine.evaluate(&tree).is_finite());
}

#[test]
fn test_branch_optimizer_never_lowers_the_score() {
    let names = taxa(8);
    let truth = Tree::from_newick(common::EIGHT_TAXA, &names).unwrap();
    let aln = Arc::new(common::simulate_alignment(&truth, 400, 5));
    let engine: Arc<dyn LikelihoodEngine> = Arc::new(Jc69Engine::new(aln));
    let optimizer = BranchLengthOptimizer::new(Arc::clone(&engine)).with_bounds(1e-5, 5.0);

    let mut rng = fastrand::Rng::with_seed(10);
    for _ in 0..5 {
        let mut tree = Tree::random(Arc::clone(&names), &mut rng).unwrap();
        let before = engine.evaluate(&tree);
        let after = optimizer.optimize_branch_lengths(&mut tree, 2);
        assert!(after >= before);
        assert!((engine.evaluate(&tree) - after).abs() < 1e-6);
        for b in tree.branches() {
            let len = tree.length(b.node1, b.node2);
            assert!(len.is_finite() && len > 0.0 && len <= 5.0 + 1e-9);
        }
    }
}

#[test]
fn test_fixed_lengths_only_rescores() {
    let aln = four_taxon_alignment();
    let engine: Arc<dyn LikelihoodEngine> = Arc::new(ParsimonyEngine::new(aln));
    let optimizer = FixedLengths::new(Arc::clone(&engine));
    let mut tree = Tree::from_newick("((A:0.3,B:0.2),(C:0.1,D:0.4));", &named(&["A", "B", "C", "D"])).unwrap();
    let before = tree.to_newick(true);
    assert_eq!(optimizer.optimize_branch_lengths(&mut tree, 5), -2.0);
    assert_eq!(tree.to_newick(true), before);
}
