//! The shared iterate-until-convergence skeleton behind every alternating
//! update strategy.
//!
//! A fit owns a single [`LoopState`] for its whole duration: the views, the
//! per-view weights and scores, the previous iteration's scores, and the
//! objective trace. Strategies implement [`UpdateRule`] and are driven by
//! [`fit_inner_loop`], which validates the views, normalizes the
//! generalization policy, initializes state, and runs the outer loop.

mod admm;
mod elastic;
mod parkhomenko;
mod pls;
mod pmd;

pub use admm::{AdmmInnerLoop, AdmmInnerLoopBuilder};
pub use elastic::{ElasticInnerLoop, ElasticInnerLoopBuilder};
pub use parkhomenko::{ParkhomenkoInnerLoop, ParkhomenkoInnerLoopBuilder};
pub use pls::{PlsInnerLoop, PlsInnerLoopBuilder};
pub use pmd::{PmdInnerLoop, PmdInnerLoopBuilder};

use crate::error::InnerLoopError;
use crate::params::{Initialization, LoopConfig};
use crate::prox::{cosine_similarity, l1_norm, l2_norm};
use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// All per-fit state of an alternating inner loop.
///
/// Created at the start of a `fit` call, mutated in place by the view
/// updates, and handed back to the strategy once the outer loop finishes.
/// Nothing here survives across fits.
#[derive(Debug)]
pub struct LoopState {
    pub(crate) views: Vec<Array2<f64>>,
    pub(crate) weights: Vec<Array1<f64>>,
    pub(crate) scores: Vec<Array1<f64>>,
    pub(crate) old_scores: Vec<Array1<f64>>,
    pub(crate) track_objective: Vec<f64>,
    pub(crate) generalized: bool,
}

impl LoopState {
    pub fn n_views(&self) -> usize {
        self.views.len()
    }

    /// Fitted projection weights, one vector per view.
    pub fn weights(&self) -> &[Array1<f64>] {
        &self.weights
    }

    /// Current scores, `view @ weights[view]`, one vector per view.
    pub fn scores(&self) -> &[Array1<f64>] {
        &self.scores
    }

    /// One objective value per completed outer iteration, append-only.
    pub fn objective_trace(&self) -> &[f64] {
        &self.track_objective
    }

    /// Whether deflation runs against the aggregate of all other views.
    /// Forced on when more than two views are fitted.
    pub fn is_generalized(&self) -> bool {
        self.generalized
    }

    /// Elementwise sum of every other view's current scores.
    pub(crate) fn deflation_sum(&self, view_index: usize) -> Array1<f64> {
        let mut total = Array1::zeros(self.scores[view_index].len());
        for (j, score) in self.scores.iter().enumerate() {
            if j != view_index {
                total += score;
            }
        }
        total
    }

    /// Mean of every other view's current scores.
    pub(crate) fn deflation_mean(&self, view_index: usize) -> Array1<f64> {
        self.deflation_sum(view_index) / (self.scores.len() - 1) as f64
    }

    pub(crate) fn rescore(&mut self, view_index: usize) {
        self.scores[view_index] = self.views[view_index].dot(&self.weights[view_index]);
    }
}

/// A per-view alternating update rule.
///
/// `update_view` must leave `state.scores[view_index]` consistent with the
/// weights it writes. `check_params` runs once per fit, before any
/// iteration, and owns every configuration error.
pub(crate) trait UpdateRule {
    fn check_params(&mut self, views: &[Array2<f64>]) -> anyhow::Result<()>;

    fn update_view(&mut self, state: &mut LoopState, view_index: usize) -> anyhow::Result<()>;

    /// Objective appended to the trace each outer iteration. Defaults to the
    /// sum of pairwise score covariances.
    fn objective(&self, state: &LoopState) -> f64 {
        pairwise_covariance(state)
    }

    /// Early-stop test, evaluated from the second outer iteration onward.
    /// Defaults to never stopping.
    fn early_stop(&self, _state: &LoopState, _tol: f64) -> bool {
        false
    }
}

/// Default objective: sum over unordered view pairs of the inner product of
/// their score vectors.
pub(crate) fn pairwise_covariance(state: &LoopState) -> f64 {
    let mut obj = 0.0;
    for i in 0..state.scores.len() {
        for j in (i + 1)..state.scores.len() {
            obj += state.scores[i].dot(&state.scores[j]);
        }
    }
    obj
}

/// Cosine-similarity stop test: every view's scores must stay within `tol`
/// of perfect alignment with the previous iteration's scores.
pub(crate) fn cosine_early_stop(state: &LoopState, tol: f64) -> bool {
    state
        .scores
        .iter()
        .zip(&state.old_scores)
        .all(|(score, old)| cosine_similarity(score, old) > 1.0 - tol)
}

/// Shared objective of the elastic and ADMM strategies:
/// per view, `n_views * ‖X_i w_i − target‖² / (2N) + l1_i ‖w_i‖₁ + l2_i ‖w_i‖₂`
/// with `l1 = c * ratio`, `l2 = c * (1 − ratio)` and target the mean of the
/// other views' scores.
pub(crate) fn elastic_objective(state: &LoopState, c: &[f64], l1_ratio: &[f64]) -> f64 {
    let n_views = state.views.len() as f64;
    let mut total = 0.0;
    for i in 0..state.views.len() {
        let target = state.deflation_mean(i);
        let projection = state.views[i].dot(&state.weights[i]);
        let residual = &projection - &target;
        let n_samples = state.views[i].nrows() as f64;
        let fit_term = n_views * residual.dot(&residual) / (2.0 * n_samples);
        let l1_pen = c[i] * l1_ratio[i] * l1_norm(&state.weights[i]);
        let l2_pen = c[i] * (1.0 - l1_ratio[i]) * l2_norm(&state.weights[i]);
        total += fit_term + l1_pen + l2_pen;
    }
    total
}

/// Fails the fit when a weight update has collapsed to all-zero or left the
/// finite range.
pub(crate) fn check_converged_weights(w: &Array1<f64>, view_index: usize) -> anyhow::Result<()> {
    if w.iter().any(|v| !v.is_finite()) || l2_norm(w) == 0.0 {
        return Err(InnerLoopError::degeneracy(view_index));
    }
    Ok(())
}

fn validate_views(views: &[ArrayView2<f64>]) -> anyhow::Result<()> {
    if views.len() < 2 {
        return Err(InnerLoopError::configuration(format!(
            "at least 2 views are required, got {}",
            views.len()
        )));
    }
    let n_samples = views[0].nrows();
    if n_samples == 0 {
        return Err(InnerLoopError::configuration("views have no samples"));
    }
    for (i, view) in views.iter().enumerate() {
        if view.nrows() != n_samples {
            return Err(InnerLoopError::configuration(format!(
                "view {} has {} samples but view 0 has {}",
                i,
                view.nrows(),
                n_samples
            )));
        }
        if view.ncols() == 0 {
            return Err(InnerLoopError::configuration(format!(
                "view {} has no features",
                i
            )));
        }
    }
    Ok(())
}

fn initialize_scores(
    views: &[Array2<f64>],
    config: &LoopConfig,
    rng: &mut StdRng,
) -> anyhow::Result<Vec<Array1<f64>>> {
    match config.initialization {
        Initialization::Random => {
            let mut scores = Vec::with_capacity(views.len());
            for view in views {
                let mut s = Array1::zeros(view.nrows());
                s.mapv_inplace(|_: f64| rng.random::<f64>());
                scores.push(s);
            }
            Ok(scores)
        }
        Initialization::Uniform => {
            let mut scores = Vec::with_capacity(views.len());
            for view in views {
                let n = view.nrows();
                scores.push(Array1::from_elem(n, 1.0 / (n as f64).sqrt()));
            }
            Ok(scores)
        }
        Initialization::Unregularized => {
            let boot_config = LoopConfig {
                initialization: Initialization::Random,
                random_seed: config.random_seed,
                ..LoopConfig::default()
            };
            let mut bootstrap = pls::PlsUpdate;
            let view_refs: Vec<ArrayView2<f64>> = views.iter().map(|v| v.view()).collect();
            let state = fit_inner_loop(&mut bootstrap, &view_refs, &boot_config)?;
            Ok(state
                .scores
                .into_iter()
                .map(|s| {
                    let norm = l2_norm(&s);
                    s / norm
                })
                .collect())
        }
    }
}

/// Runs one full alternating fit: validation, generalization policy,
/// initialization, then up to `max_iter` outer passes over the views in
/// ascending index order.
pub(crate) fn fit_inner_loop<R: UpdateRule>(
    rule: &mut R,
    views: &[ArrayView2<f64>],
    config: &LoopConfig,
) -> anyhow::Result<LoopState> {
    validate_views(views)?;

    let mut generalized = config.generalized;
    if views.len() > 2 && !generalized {
        log::warn!(
            "{} views supplied: forcing generalized mode (deflation against all other views)",
            views.len()
        );
        generalized = true;
    }

    let views: Vec<Array2<f64>> = views.iter().map(|v| v.to_owned()).collect();
    rule.check_params(&views)?;

    let mut rng = StdRng::seed_from_u64(config.random_seed);
    let scores = initialize_scores(&views, config, &mut rng)?;
    let mut weights = Vec::with_capacity(views.len());
    for view in &views {
        let mut w = Array1::zeros(view.ncols());
        w.mapv_inplace(|_: f64| rng.random::<f64>());
        weights.push(w);
    }

    let mut state = LoopState {
        views,
        weights,
        old_scores: scores.clone(),
        scores,
        track_objective: Vec::new(),
        generalized,
    };

    let n_views = state.views.len();
    for iteration in 0..config.max_iter {
        for view_index in 0..n_views {
            rule.update_view(&mut state, view_index)?;
        }
        let objective = rule.objective(&state);
        state.track_objective.push(objective);
        // The stop test compares against the scores at the start of this
        // iteration; the snapshot is taken after the test.
        if iteration > 0 && rule.early_stop(&state, config.tol) {
            break;
        }
        state.old_scores = state.scores.clone();
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn two_view_state() -> LoopState {
        LoopState {
            views: vec![array![[1.0, 0.0], [0.0, 1.0]], array![[2.0], [1.0]]],
            weights: vec![array![1.0, 0.0], array![1.0]],
            scores: vec![array![1.0, 0.0], array![2.0, 1.0]],
            old_scores: vec![array![1.0, 0.0], array![2.0, 1.0]],
            track_objective: Vec::new(),
            generalized: false,
        }
    }

    #[test]
    fn test_pairwise_covariance_two_views() {
        let state = two_view_state();
        assert_relative_eq!(pairwise_covariance(&state), 2.0);
    }

    #[test]
    fn test_deflation_sum_excludes_self() {
        let state = two_view_state();
        let target = state.deflation_sum(0);
        assert_relative_eq!(target[0], 2.0);
        assert_relative_eq!(target[1], 1.0);
    }

    #[test]
    fn test_deflation_mean_three_views() {
        let mut state = two_view_state();
        state.views.push(array![[1.0], [1.0]]);
        state.weights.push(array![1.0]);
        state.scores.push(array![4.0, 4.0]);
        state.old_scores.push(array![4.0, 4.0]);
        let mean = state.deflation_mean(0);
        assert_relative_eq!(mean[0], 3.0);
        assert_relative_eq!(mean[1], 2.5);
    }

    #[test]
    fn test_cosine_early_stop_on_identical_scores() {
        let state = two_view_state();
        assert!(cosine_early_stop(&state, 1e-5));
    }

    #[test]
    fn test_cosine_early_stop_rejects_rotated_scores() {
        let mut state = two_view_state();
        state.scores[0] = array![0.0, 1.0];
        assert!(!cosine_early_stop(&state, 1e-5));
    }

    #[test]
    fn test_check_converged_weights() {
        assert!(check_converged_weights(&array![0.0, 0.1], 0).is_ok());
        let err = check_converged_weights(&array![0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::InnerLoopError>(),
            Some(crate::error::InnerLoopError::Degeneracy { view: 1 })
        ));
        assert!(check_converged_weights(&array![f64::NAN, 1.0], 0).is_err());
    }

    #[test]
    fn test_validate_views_rejects_single_view() {
        let x = array![[1.0], [2.0]];
        let err = validate_views(&[x.view()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::InnerLoopError>(),
            Some(crate::error::InnerLoopError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_views_rejects_sample_mismatch() {
        let x1 = array![[1.0], [2.0]];
        let x2 = array![[1.0], [2.0], [3.0]];
        assert!(validate_views(&[x1.view(), x2.view()]).is_err());
    }

    #[test]
    fn test_elastic_objective_penalties() {
        let state = two_view_state();
        // Zero penalty reduces to the pure reconstruction term.
        let base = elastic_objective(&state, &[0.0, 0.0], &[0.0, 0.0]);
        let with_l1 = elastic_objective(&state, &[1.0, 0.0], &[1.0, 0.0]);
        assert_relative_eq!(with_l1 - base, l1_norm(&state.weights[0]));
    }
}
