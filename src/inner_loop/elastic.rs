//! Elastic-net-regularized update via regression sub-solvers.
//!
//! Each view's weight vector is refit as an intercept-free regression of the
//! deflation target onto the view, using a per-view solver selected once at
//! fit start from the penalty configuration and warm-started across outer
//! iterations. An optional constrained variant rescales the regression inputs
//! until the projected weights have unit norm.

use super::{
    check_converged_weights, cosine_early_stop, elastic_objective, fit_inner_loop, LoopState,
    UpdateRule,
};
use crate::params::{process_parameter, Initialization, LoopConfig, ViewParam};
use crate::prox::{bin_search, l2_norm};
use crate::regression::Regressor;
use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};

pub(crate) struct ElasticUpdate {
    c_param: Option<ViewParam<f64>>,
    l1_ratio_param: Option<ViewParam<f64>>,
    positive_param: Option<ViewParam<bool>>,
    constrained: bool,
    stochastic: bool,
    tol: f64,
    random_seed: u64,
    c: Vec<f64>,
    l1_ratio: Vec<f64>,
    regressors: Vec<Regressor>,
    gamma: Vec<f64>,
}

impl ElasticUpdate {
    /// Deflation target for one view: the mean of the other views' scores in
    /// generalized mode, otherwise the wraparound partner. With more than
    /// two views generalized mode is always in force, so the wraparound only
    /// ever pairs two views with each other.
    fn target(&self, state: &LoopState, view_index: usize) -> Array1<f64> {
        if state.generalized {
            state.deflation_mean(view_index)
        } else {
            let n = state.n_views();
            state.scores[(view_index + n - 1) % n].clone()
        }
    }

    fn solve(
        &mut self,
        state: &mut LoopState,
        view_index: usize,
        target: &Array1<f64>,
    ) -> anyhow::Result<()> {
        let x = &state.views[view_index];
        let coef = self.regressors[view_index].fit(x.view(), target.view())?;
        let projection_norm = l2_norm(&x.dot(coef));
        state.weights[view_index] = coef.mapv(|v| v / projection_norm);
        Ok(())
    }

    /// Constrained solve: rescale the regression by `sqrt(gamma + 1)` and
    /// adjust `gamma` by bisection until `‖X w‖ = 1`.
    fn solve_constrained(
        &mut self,
        state: &mut LoopState,
        view_index: usize,
        target: &Array1<f64>,
    ) -> anyhow::Result<()> {
        let x = &state.views[view_index];
        let mut min = -1.0;
        let mut max = 1.0;
        let mut previous = self.gamma[view_index];
        let mut previous_val: Option<f64> = None;
        let mut coef = state.weights[view_index].clone();
        for _ in 0..50 {
            let scale = (self.gamma[view_index] + 1.0).sqrt();
            let x_scaled = x.mapv(|v| scale * v);
            let y_scaled = target.mapv(|v| v / scale);
            coef = self.regressors[view_index]
                .fit(x_scaled.view(), y_scaled.view())?
                .clone();
            let current_val = 1.0 - l2_norm(&x.dot(&coef));
            (self.gamma[view_index], previous, min, max) = bin_search(
                self.gamma[view_index],
                previous,
                current_val,
                previous_val,
                min,
                max,
            );
            previous_val = Some(current_val);
            if current_val.abs() < 1e-5 || (max - min).abs() < 1e-30 {
                break;
            }
        }
        state.weights[view_index] = coef;
        Ok(())
    }
}

impl UpdateRule for ElasticUpdate {
    fn check_params(&mut self, views: &[Array2<f64>]) -> anyhow::Result<()> {
        let n_views = views.len();
        self.c = process_parameter("c", self.c_param.as_ref(), 0.0, n_views)?;
        self.l1_ratio = process_parameter("l1_ratio", self.l1_ratio_param.as_ref(), 0.0, n_views)?;
        let positive =
            process_parameter("positive", self.positive_param.as_ref(), false, n_views)?;
        self.gamma = vec![0.0; n_views];
        let mut regressors = Vec::with_capacity(n_views);
        for (i, ((&alpha, &l1_ratio), &positive)) in
            self.c.iter().zip(&self.l1_ratio).zip(&positive).enumerate()
        {
            regressors.push(Regressor::new(
                alpha / n_views as f64,
                l1_ratio,
                positive,
                self.stochastic,
                self.tol,
                self.random_seed.wrapping_add(i as u64),
            ));
        }
        self.regressors = regressors;
        Ok(())
    }

    fn update_view(&mut self, state: &mut LoopState, view_index: usize) -> anyhow::Result<()> {
        let target = self.target(state, view_index);
        if self.constrained {
            self.solve_constrained(state, view_index, &target)?;
        } else {
            self.solve(state, view_index, &target)?;
        }
        check_converged_weights(&state.weights[view_index], view_index)?;
        state.rescore(view_index);
        Ok(())
    }

    fn objective(&self, state: &LoopState) -> f64 {
        elastic_objective(state, &self.c, &self.l1_ratio)
    }

    fn early_stop(&self, state: &LoopState, tol: f64) -> bool {
        cosine_early_stop(state, tol)
    }
}

/// Elastic-net-regularized inner loop.
///
/// Per view, the regression solver is chosen once from
/// `(c / n_views, l1_ratio, positive, stochastic)` and reused across outer
/// iterations; after each solve the weights are scaled so the projected
/// score `view @ weights` has unit norm. The objective traced per iteration
/// is the shared reconstruction-plus-penalty criterion.
pub struct ElasticInnerLoop {
    config: LoopConfig,
    rule: ElasticUpdate,
    state: Option<LoopState>,
}

impl ElasticInnerLoop {
    pub fn fit(&mut self, views: &[ArrayView2<f64>]) -> anyhow::Result<&mut Self> {
        let state = fit_inner_loop(&mut self.rule, views, &self.config)?;
        self.state = Some(state);
        Ok(self)
    }

    pub fn state(&self) -> anyhow::Result<&LoopState> {
        self.state
            .as_ref()
            .ok_or_else(|| anyhow!("must be fitted before accessing results!"))
    }

    pub fn weights(&self) -> anyhow::Result<&[Array1<f64>]> {
        Ok(self.state()?.weights())
    }

    pub fn scores(&self) -> anyhow::Result<&[Array1<f64>]> {
        Ok(self.state()?.scores())
    }

    pub fn objective_trace(&self) -> anyhow::Result<&[f64]> {
        Ok(self.state()?.objective_trace())
    }
}

/// Builder for [`ElasticInnerLoop`].
pub struct ElasticInnerLoopBuilder {
    config: LoopConfig,
    c: Option<ViewParam<f64>>,
    l1_ratio: Option<ViewParam<f64>>,
    positive: Option<ViewParam<bool>>,
    constrained: bool,
    stochastic: bool,
}

impl Default for ElasticInnerLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElasticInnerLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
            c: None,
            l1_ratio: None,
            positive: None,
            constrained: false,
            stochastic: false,
        }
    }

    /// Overall penalty strength, shared or per view. Zero selects plain
    /// least squares.
    pub fn c(mut self, c: impl Into<ViewParam<f64>>) -> Self {
        self.c = Some(c.into());
        self
    }

    /// L1 share of the penalty, shared or per view. 0 is ridge, 1 is lasso.
    pub fn l1_ratio(mut self, l1_ratio: impl Into<ViewParam<f64>>) -> Self {
        self.l1_ratio = Some(l1_ratio.into());
        self
    }

    /// Constrain coefficients to be non-negative, shared or per view.
    pub fn positive(mut self, positive: impl Into<ViewParam<bool>>) -> Self {
        self.positive = Some(positive.into());
        self
    }

    /// Enforce `‖view @ weights‖ = 1` through the rescaled constrained
    /// solve instead of post-hoc normalization.
    pub fn constrained(mut self, constrained: bool) -> Self {
        self.constrained = constrained;
        self
    }

    /// Substitute the online (SGD) solver for the batch solvers.
    pub fn stochastic(mut self, stochastic: bool) -> Self {
        self.stochastic = stochastic;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.config.tol = tol;
        self
    }

    pub fn generalized(mut self, generalized: bool) -> Self {
        self.config.generalized = generalized;
        self
    }

    pub fn initialization(mut self, initialization: Initialization) -> Self {
        self.config.initialization = initialization;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    pub fn build(self) -> ElasticInnerLoop {
        let tol = self.config.tol;
        let random_seed = self.config.random_seed;
        ElasticInnerLoop {
            config: self.config,
            rule: ElasticUpdate {
                c_param: self.c,
                l1_ratio_param: self.l1_ratio,
                positive_param: self.positive,
                constrained: self.constrained,
                stochastic: self.stochastic,
                tol,
                random_seed,
                c: Vec::new(),
                l1_ratio: Vec::new(),
                regressors: Vec::new(),
                gamma: Vec::new(),
            },
            state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prox::l2_norm;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn test_projected_scores_have_unit_norm() {
        let mut rng = StdRng::seed_from_u64(42);
        let x1 = random_matrix(&mut rng, 30, 5);
        let x2 = random_matrix(&mut rng, 30, 4);

        let mut elastic = ElasticInnerLoopBuilder::new()
            .c(0.1)
            .l1_ratio(0.5)
            .build();
        elastic.fit(&[x1.view(), x2.view()]).unwrap();

        let state = elastic.state().unwrap();
        for (view, w) in state.views.iter().zip(state.weights()) {
            assert_relative_eq!(l2_norm(&view.dot(w)), 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_zero_penalty_runs_least_squares() {
        let mut rng = StdRng::seed_from_u64(3);
        let x1 = random_matrix(&mut rng, 25, 4);
        let x2 = random_matrix(&mut rng, 25, 3);

        let mut elastic = ElasticInnerLoopBuilder::new().build();
        elastic.fit(&[x1.view(), x2.view()]).unwrap();
        let trace = elastic.objective_trace().unwrap();
        assert!(!trace.is_empty());
        assert!(trace.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_objective_trace_settles() {
        let mut rng = StdRng::seed_from_u64(11);
        let x1 = random_matrix(&mut rng, 40, 6);
        let x2 = random_matrix(&mut rng, 40, 5);

        let mut elastic = ElasticInnerLoopBuilder::new()
            .c(0.05)
            .l1_ratio(0.5)
            .max_iter(100)
            .build();
        elastic.fit(&[x1.view(), x2.view()]).unwrap();
        let trace = elastic.objective_trace().unwrap();
        let last = *trace.last().unwrap();
        let prev = trace[trace.len() - 2];
        assert_relative_eq!(last, prev, epsilon = 1e-2 * last.abs().max(1.0));
    }

    #[test]
    fn test_constrained_solve_meets_norm_constraint() {
        let mut rng = StdRng::seed_from_u64(8);
        let x1 = random_matrix(&mut rng, 30, 4);
        let x2 = random_matrix(&mut rng, 30, 4);

        let mut elastic = ElasticInnerLoopBuilder::new()
            .c(0.1)
            .l1_ratio(0.5)
            .constrained(true)
            .build();
        elastic.fit(&[x1.view(), x2.view()]).unwrap();

        let state = elastic.state().unwrap();
        for (view, w) in state.views.iter().zip(state.weights()) {
            assert_relative_eq!(l2_norm(&view.dot(w)), 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_three_views_generalized_target() {
        let mut rng = StdRng::seed_from_u64(5);
        let x1 = random_matrix(&mut rng, 20, 3);
        let x2 = random_matrix(&mut rng, 20, 4);
        let x3 = random_matrix(&mut rng, 20, 5);

        let mut elastic = ElasticInnerLoopBuilder::new().c(0.01).l1_ratio(1.0).build();
        elastic.fit(&[x1.view(), x2.view(), x3.view()]).unwrap();
        assert!(elastic.state().unwrap().is_generalized());
    }

    #[test]
    fn test_wraparound_partner_for_two_views() {
        let state = LoopState {
            views: vec![Array2::eye(2), Array2::eye(2)],
            weights: vec![ndarray::array![1.0, 0.0], ndarray::array![0.0, 1.0]],
            scores: vec![ndarray::array![1.0, 0.0], ndarray::array![0.0, 1.0]],
            old_scores: vec![ndarray::array![1.0, 0.0], ndarray::array![0.0, 1.0]],
            track_objective: Vec::new(),
            generalized: false,
        };
        let rule = ElasticInnerLoopBuilder::new().build().rule;
        // View 0 wraps around to the last view; view 1 pairs with view 0.
        assert_eq!(rule.target(&state, 0), state.scores[1]);
        assert_eq!(rule.target(&state, 1), state.scores[0]);
    }

    #[test]
    fn test_stochastic_solver_substitution() {
        let mut rng = StdRng::seed_from_u64(21);
        let x1 = random_matrix(&mut rng, 20, 3);
        let x2 = random_matrix(&mut rng, 20, 3);

        let mut elastic = ElasticInnerLoopBuilder::new()
            .c(0.01)
            .l1_ratio(0.5)
            .stochastic(true)
            .max_iter(10)
            .build();
        elastic.fit(&[x1.view(), x2.view()]).unwrap();
        assert!(elastic.weights().unwrap()[0].iter().all(|v| v.is_finite()));
    }
}
