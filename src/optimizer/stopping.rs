use crate::config::{StopMode, StopParams};
use crate::tree::Split;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum StopReason {
    FixedIterations,
    NoImprovement,
    Converged,
    AbsoluteCap,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    Stop(StopReason),
}

/// Pearson correlation; `None` when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let mean = |v: &[f64]| v[..n].iter().sum::<f64>() / n as f64;
    let (ma, mb) = (mean(a), mean(b));
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (da, db) = (a[i] - ma, b[i] - mb);
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some(cov / (va.sqrt() * vb.sqrt()))
}

/// Correlation of two split-support maps over the union of their splits; a
/// split missing from one side counts as support 0.
pub fn support_correlation(previous: &HashMap<Split, f64>, current: &HashMap<Split, f64>) -> Option<f64> {
    let mut keys: Vec<&Split> = previous.keys().chain(current.keys()).collect();
    keys.sort();
    keys.dedup();
    let a: Vec<f64> = keys.iter().map(|k| previous.get(*k).copied().unwrap_or(0.0)).collect();
    let b: Vec<f64> = keys.iter().map(|k| current.get(*k).copied().unwrap_or(0.0)).collect();
    if a == b {
        return Some(1.0);
    }
    pearson(&a, &b)
}

/// Decides when the outer search loop ends.
pub struct StoppingRule {
    params: StopParams,
    patience: usize,
    iteration: usize,
    last_improved: usize,
    recent_moves: VecDeque<usize>,
    previous_support: Option<HashMap<Split, f64>>,
    correlation: Option<f64>,
}

impl StoppingRule {
    pub fn new(params: &StopParams, num_taxa: usize) -> Self {
        let scaled = (params.patience_per_taxon * num_taxa as f64).ceil() as usize;
        Self {
            params: params.clone(),
            patience: params.patience.max(scaled),
            iteration: 0,
            last_improved: 0,
            recent_moves: VecDeque::with_capacity(params.move_window),
            previous_support: None,
            correlation: None,
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn last_improved(&self) -> usize {
        self.last_improved
    }

    /// Unsuccessful iterations tolerated, after per-taxon scaling.
    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn correlation(&self) -> Option<f64> {
        self.correlation
    }

    /// Mean NNI count over the rolling window.
    pub fn mean_recent_moves(&self) -> f64 {
        if self.recent_moves.is_empty() {
            return 0.0;
        }
        self.recent_moves.iter().sum::<usize>() as f64 / self.recent_moves.len() as f64
    }

    pub fn record_iteration(&mut self, iteration: usize, improved: bool, nni_moves: usize) {
        self.iteration = iteration;
        if improved {
            self.last_improved = iteration;
        }
        if self.recent_moves.len() == self.params.move_window.max(1) {
            self.recent_moves.pop_front();
        }
        self.recent_moves.push_back(nni_moves);
    }

    /// Whether the current iteration is a support-correlation checkpoint.
    pub fn wants_support_snapshot(&self) -> bool {
        self.params.stop_mode == StopMode::BootstrapCorrelation
            && self.params.check_interval > 0
            && self.iteration > 0
            && self.iteration % self.params.check_interval == 0
    }

    /// Stores a support snapshot and returns its correlation with the
    /// previous one.
    pub fn record_support(&mut self, snapshot: HashMap<Split, f64>) -> Option<f64> {
        if let Some(prev) = &self.previous_support {
            self.correlation = support_correlation(prev, &snapshot);
        }
        self.previous_support = Some(snapshot);
        self.correlation
    }

    pub fn decide(&self) -> StopDecision {
        let p = &self.params;
        let it = self.iteration;
        if it >= p.absolute_max_iterations {
            return StopDecision::Stop(StopReason::AbsoluteCap);
        }
        if it < p.min_iterations {
            return StopDecision::Continue;
        }
        match p.stop_mode {
            StopMode::FixedIterations if it >= p.max_iterations => {
                StopDecision::Stop(StopReason::FixedIterations)
            }
            StopMode::Unsuccessful if it - self.last_improved > self.patience => {
                StopDecision::Stop(StopReason::NoImprovement)
            }
            StopMode::BootstrapCorrelation
                if self.correlation.is_some_and(|c| c >= p.correlation_threshold) =>
            {
                StopDecision::Stop(StopReason::Converged)
            }
            _ => StopDecision::Continue,
        }
    }
}
