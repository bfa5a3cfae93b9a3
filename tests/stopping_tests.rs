use rstest::rstest;
use std::collections::HashMap;
use treeforge::config::{StopMode, StopParams};
use treeforge::optimizer::{StopDecision, StopReason, StoppingRule};
use treeforge::optimizer::stopping::support_correlation;
use treeforge::tree::Split;

fn params(mode: StopMode) -> StopParams {
    StopParams {
        stop_mode: mode,
        min_iterations: 0,
        max_iterations: 5,
        patience: 3,
        patience_per_taxon: 0.0,
        absolute_max_iterations: 100,
        correlation_threshold: 0.9,
        check_interval: 2,
        move_window: 4,
    }
}

/// Replays iterations 1..=upto, marking the listed ones as improvements.
fn replay(rule: &mut StoppingRule, upto: usize, improved_at: &[usize]) {
    for it in 1..=upto {
        rule.record_iteration(it, improved_at.contains(&it), 0);
    }
}

#[rstest]
#[case(4, StopDecision::Continue)]
#[case(5, StopDecision::Stop(StopReason::FixedIterations))]
fn test_fixed_iterations(#[case] done: usize, #[case] expected: StopDecision) {
    let mut rule = StoppingRule::new(&params(StopMode::FixedIterations), 8);
    replay(&mut rule, done, &[1, 2, 3]);
    assert_eq!(rule.decide(), expected);
}

#[rstest]
#[case(5, StopDecision::Continue)]
#[case(6, StopDecision::Stop(StopReason::NoImprovement))]
fn test_unsuccessful_patience(#[case] done: usize, #[case] expected: StopDecision) {
    let mut rule = StoppingRule::new(&params(StopMode::Unsuccessful), 8);
    replay(&mut rule, done, &[2]);
    assert_eq!(rule.last_improved(), 2);
    assert_eq!(rule.decide(), expected);
}

#[test]
fn test_unsuccessful_ignores_max_iterations() {
    let mut rule = StoppingRule::new(&params(StopMode::Unsuccessful), 8);
    replay(&mut rule, 40, &(1..=40).collect::<Vec<_>>());
    assert_eq!(rule.decide(), StopDecision::Continue);
}

#[rstest]
#[case(0.0, 20, 3)]
#[case(0.5, 20, 10)]
#[case(0.1, 25, 3)]
#[case(0.15, 30, 5)]
fn test_patience_scales_with_taxa(#[case] per_taxon: f64, #[case] n: usize, #[case] expected: usize) {
    let p = StopParams {
        patience_per_taxon: per_taxon,
        ..params(StopMode::Unsuccessful)
    };
    assert_eq!(StoppingRule::new(&p, n).patience(), expected);
}

#[test]
fn test_min_iterations_take_precedence() {
    let p = StopParams {
        min_iterations: 5,
        patience: 0,
        ..params(StopMode::Unsuccessful)
    };
    let mut rule = StoppingRule::new(&p, 8);
    replay(&mut rule, 3, &[]);
    assert_eq!(rule.decide(), StopDecision::Continue);
    replay(&mut rule, 5, &[]);
    assert_eq!(rule.decide(), StopDecision::Stop(StopReason::NoImprovement));
}

#[test]
fn test_absolute_cap_beats_everything() {
    let p = StopParams {
        min_iterations: 10,
        absolute_max_iterations: 4,
        ..params(StopMode::Unsuccessful)
    };
    let mut rule = StoppingRule::new(&p, 8);
    replay(&mut rule, 4, &[1, 2, 3, 4]);
    assert_eq!(rule.decide(), StopDecision::Stop(StopReason::AbsoluteCap));
}

#[test]
fn test_correlation_converges_on_stable_support() {
    let mut rule = StoppingRule::new(&params(StopMode::BootstrapCorrelation), 6);
    let snapshot: HashMap<Split, f64> = HashMap::from([
        (Split::from_taxa(6, &[0, 1]), 0.9),
        (Split::from_taxa(6, &[2, 3]), 0.4),
        (Split::from_taxa(6, &[4, 5]), 0.7),
    ]);

    rule.record_iteration(1, true, 3);
    assert!(!rule.wants_support_snapshot());
    rule.record_iteration(2, false, 1);
    assert!(rule.wants_support_snapshot());
    assert_eq!(rule.record_support(snapshot.clone()), None);
    assert_eq!(rule.decide(), StopDecision::Continue);

    rule.record_iteration(3, false, 0);
    rule.record_iteration(4, false, 0);
    assert!(rule.wants_support_snapshot());
    assert_eq!(rule.record_support(snapshot), Some(1.0));
    assert_eq!(rule.decide(), StopDecision::Stop(StopReason::Converged));
}

#[test]
fn test_correlation_below_threshold_keeps_going() {
    let mut rule = StoppingRule::new(&params(StopMode::BootstrapCorrelation), 6);
    let a = Split::from_taxa(6, &[0, 1]);
    let b = Split::from_taxa(6, &[2, 3]);
    let c = Split::from_taxa(6, &[4, 5]);
    rule.record_iteration(2, false, 0);
    rule.record_support(HashMap::from([(a.clone(), 1.0), (b.clone(), 0.0), (c.clone(), 0.5)]));
    rule.record_iteration(4, false, 0);
    let r = rule
        .record_support(HashMap::from([(a, 0.0), (b, 1.0), (c, 0.5)]))
        .unwrap();
    assert!(r < 0.0);
    assert_eq!(rule.decide(), StopDecision::Continue);
}

#[test]
fn test_missing_splits_count_as_zero_support() {
    let a = Split::from_taxa(6, &[0, 1]);
    let b = Split::from_taxa(6, &[2, 3]);
    let c = Split::from_taxa(6, &[4, 5]);
    let prev = HashMap::from([(a.clone(), 1.0), (b.clone(), 0.5)]);
    let cur = HashMap::from([(a, 1.0), (b, 0.5), (c, 0.0)]);
    // the extra zero aligns with the implicit zero on the other side
    assert_eq!(support_correlation(&prev, &cur), Some(1.0));
}

#[test]
fn test_mean_recent_moves() {
    let mut rule = StoppingRule::new(&params(StopMode::Unsuccessful), 8);
    assert_eq!(rule.mean_recent_moves(), 0.0);
    for (i, m) in [8, 4, 2, 2, 0].into_iter().enumerate() {
        rule.record_iteration(i + 1, false, m);
    }
    // window of four drops the first value
    assert!((rule.mean_recent_moves() - 2.0).abs() < 1e-12);
}
