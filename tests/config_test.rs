use rstest::rstest;
use std::str::FromStr;
use strum::IntoEnumIterator;
use treeforge::config::{Config, PerturbationKind, QuartetTest, SamplingStrategy, StopMode};
use treeforge::TreeForgeError;

#[test]
fn test_defaults_are_valid() {
    Config::default().validate().unwrap();
}

#[test]
fn test_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search.json");

    let mut config = Config::default();
    config.search.candidate_capacity = 42;
    config.perturb.perturbation = PerturbationKind::RandomNni;
    config.stop.stop_mode = StopMode::BootstrapCorrelation;
    config.bootstrap.replicates = 100;
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"random-nni\""));
    assert!(text.contains("\"bootstrap-correlation\""));

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.search.candidate_capacity, 42);
    assert_eq!(loaded.perturb.perturbation, PerturbationKind::RandomNni);
    assert_eq!(loaded.stop.stop_mode, StopMode::BootstrapCorrelation);
    assert_eq!(loaded.bootstrap.replicates, 100);
    loaded.validate().unwrap();
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.json");
    std::fs::write(&path, r#"{ "stop": { "patience": 7 } }"#).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.stop.patience, 7);
    assert_eq!(loaded.stop.max_iterations, 1000);
    assert_eq!(loaded.search.top_k, 5);
}

#[test]
fn test_malformed_file_is_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(TreeForgeError::Json(_))
    ));
    assert!(matches!(
        Config::load_from_file(dir.path().join("missing.json")),
        Err(TreeForgeError::Io(_))
    ));
}

#[rstest]
#[case::zero_capacity(|c: &mut Config| c.search.candidate_capacity = 0)]
#[case::zero_top_k(|c: &mut Config| c.search.top_k = 0)]
#[case::negative_tolerance(|c: &mut Config| c.search.score_tolerance = -1.0)]
#[case::support_fraction(|c: &mut Config| c.search.support_fraction = 0.0)]
#[case::stable_threshold(|c: &mut Config| c.search.stable_threshold = 1.5)]
#[case::strength_zero(|c: &mut Config| c.perturb.perturb_strength = 0.0)]
#[case::strength_above_one(|c: &mut Config| c.perturb.perturb_strength = 2.0)]
#[case::no_representatives(|c: &mut Config| c.perturb.representatives = 0)]
#[case::min_above_max(|c: &mut Config| c.stop.min_iterations = 2000)]
#[case::max_above_cap(|c: &mut Config| c.stop.max_iterations = 20_000)]
#[case::empty_window(|c: &mut Config| c.stop.move_window = 0)]
#[case::correlation_without_replicates(|c: &mut Config| c.stop.stop_mode = StopMode::BootstrapCorrelation)]
#[case::bad_threshold(|c: &mut Config| {
    c.stop.stop_mode = StopMode::BootstrapCorrelation;
    c.bootstrap.replicates = 10;
    c.stop.correlation_threshold = 0.0;
})]
#[case::negative_bootstrap_tolerance(|c: &mut Config| c.bootstrap.bootstrap_tolerance = -0.1)]
fn test_validation_rejects(#[case] tweak: fn(&mut Config)) {
    let mut config = Config::default();
    tweak(&mut config);
    assert!(matches!(config.validate(), Err(TreeForgeError::Config(_))));
}

#[test]
fn test_enum_names_roundtrip() {
    for s in SamplingStrategy::iter() {
        assert_eq!(SamplingStrategy::from_str(&s.to_string()).unwrap(), s);
    }
    for p in PerturbationKind::iter() {
        assert_eq!(PerturbationKind::from_str(&p.to_string()).unwrap(), p);
    }
    for q in QuartetTest::iter() {
        assert_eq!(QuartetTest::from_str(&q.to_string()).unwrap(), q);
    }
    for m in StopMode::iter() {
        assert_eq!(StopMode::from_str(&m.to_string()).unwrap(), m);
    }
    assert_eq!(SamplingStrategy::RoundRobin.to_string(), "round-robin");
    assert!(StopMode::from_str("forever").is_err());
}
