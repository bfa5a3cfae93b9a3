mod common;

use common::named;
use fastrand::Rng;
use std::collections::HashMap;
use treeforge::optimizer::BootstrapTracker;
use treeforge::tree::{Split, Tree};

#[test]
fn test_tie_within_tolerance_is_a_fair_coin() {
    let mut owners = HashMap::new();
    for seed in 0..64 {
        let mut tracker = BootstrapTracker::with_weights(vec![vec![1]], 0.01);
        let mut rng = Rng::with_seed(seed);
        tracker.observe(0, &[100.0], &mut rng);
        tracker.observe(1, &[100.005], &mut rng);

        let rep = &tracker.replicates()[0];
        assert_eq!(rep.hits, 2);
        assert!((rep.best_score - 100.005).abs() < 1e-12);
        // the first observation never touches the generator
        let expected = if Rng::with_seed(seed).u32(0..2) == 0 { 1 } else { 0 };
        assert_eq!(rep.best_tree, Some(expected), "seed {}", seed);
        *owners.entry(expected).or_insert(0) += 1;
    }
    assert_eq!(owners.len(), 2);
}

#[test]
fn test_reobserving_the_owner_is_a_no_op() {
    let mut tracker = BootstrapTracker::with_weights(vec![vec![1, 2]], 0.01);
    let mut rng = Rng::with_seed(1);
    assert_eq!(tracker.observe(7, &[-3.0, -1.0], &mut rng), 1);
    assert_eq!(tracker.observe(7, &[-3.0, -1.0], &mut rng), 0);
    assert_eq!(tracker.replicates()[0].hits, 1);
}

#[test]
fn test_weights_reweight_site_scores() {
    // replicate 0 only sees site 0, replicate 1 only site 1
    let mut tracker = BootstrapTracker::with_weights(vec![vec![2, 0], vec![0, 2]], 0.01);
    let mut rng = Rng::with_seed(5);
    tracker.observe(0, &[-1.0, -9.0], &mut rng);
    tracker.observe(1, &[-9.0, -1.0], &mut rng);
    let reps = tracker.replicates();
    assert_eq!(reps[0].best_tree, Some(0));
    assert_eq!(reps[1].best_tree, Some(1));
    assert_eq!(reps[0].best_score, -2.0);
    let counts = tracker.owner_counts();
    assert_eq!(counts[&0], 1);
    assert_eq!(counts[&1], 1);
}

#[test]
fn test_resampled_weights_keep_alignment_length() {
    let mut rng = Rng::with_seed(99);
    let tracker = BootstrapTracker::new(37, 25, 0.01, &mut rng).unwrap();
    assert_eq!(tracker.len(), 25);
    for rep in tracker.replicates() {
        assert_eq!(rep.weights.len(), 37);
        assert_eq!(rep.weights.iter().sum::<u32>(), 37);
        assert!(rep.best_tree.is_none());
    }
    // replicates are not all the same draw
    assert!(tracker.replicates().windows(2).any(|w| w[0].weights != w[1].weights));
}

#[test]
fn test_split_support_from_owners() {
    let names = named(&["A", "B", "C", "D", "E"]);
    let t0 = Tree::from_newick("(A,B,(C,(D,E)));", &names).unwrap();
    let t1 = Tree::from_newick("(A,C,(B,(D,E)));", &names).unwrap();
    let trees = [t0, t1];

    // three replicates prefer tree 0, one prefers tree 1
    let mut tracker = BootstrapTracker::with_weights(
        vec![vec![1, 0], vec![1, 0], vec![1, 0], vec![0, 1]],
        0.01,
    );
    let mut rng = Rng::with_seed(0);
    tracker.observe(0, &[-1.0, -5.0], &mut rng);
    tracker.observe(1, &[-5.0, -1.0], &mut rng);

    let support = tracker.split_support(|id| trees.get(id).map(|t| t.splits()));
    let de = Split::from_taxa(5, &[3, 4]);
    let ab = Split::from_taxa(5, &[0, 1]);
    let ac = Split::from_taxa(5, &[0, 2]);
    assert!((support[&de] - 1.0).abs() < 1e-12);
    assert!((support[&ab] - 0.75).abs() < 1e-12);
    assert!((support[&ac] - 0.25).abs() < 1e-12);
}

#[test]
fn test_unresolved_trees_are_skipped() {
    let mut tracker = BootstrapTracker::with_weights(vec![vec![1]], 0.01);
    let mut rng = Rng::with_seed(0);
    tracker.observe(3, &[-1.0], &mut rng);
    assert!(tracker.split_support(|_| None).is_empty());
}

#[test]
fn test_rediscovered_tie_gets_a_single_draw() {
    let mut owners = HashMap::new();
    for seed in 0..400 {
        let mut tracker = BootstrapTracker::with_weights(vec![vec![1]], 0.01);
        let mut rng = Rng::with_seed(seed);
        tracker.observe(0, &[100.0], &mut rng);
        for _ in 0..5 {
            tracker.observe(1, &[100.0], &mut rng);
        }
        let rep = &tracker.replicates()[0];
        assert_eq!(rep.hits, 2);
        let expected = if Rng::with_seed(seed).u32(0..2) == 0 { 1 } else { 0 };
        assert_eq!(rep.best_tree, Some(expected), "seed {}", seed);
        *owners.entry(expected).or_insert(0usize) += 1;
    }
    // either tree owns roughly half of the runs
    for count in owners.values() {
        assert!((140..=260).contains(count), "{:?}", owners);
    }
}
