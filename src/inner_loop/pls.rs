//! Unregularized alternating update (multi-view PLS by power iteration).

use super::{cosine_early_stop, fit_inner_loop, LoopState, UpdateRule};
use crate::params::{Initialization, LoopConfig};
use crate::prox::l2_norm;
use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};

/// The unregularized view update: project the aggregate of the other views'
/// scores onto this view's feature space and normalize to unit length.
#[derive(Debug)]
pub(crate) struct PlsUpdate;

impl UpdateRule for PlsUpdate {
    fn check_params(&mut self, _views: &[Array2<f64>]) -> anyhow::Result<()> {
        Ok(())
    }

    fn update_view(&mut self, state: &mut LoopState, view_index: usize) -> anyhow::Result<()> {
        let target = state.deflation_sum(view_index);
        let mut w = state.views[view_index].t().dot(&target);
        let norm = l2_norm(&w);
        w.mapv_inplace(|v| v / norm);
        state.weights[view_index] = w;
        state.rescore(view_index);
        Ok(())
    }

    fn early_stop(&self, state: &LoopState, tol: f64) -> bool {
        cosine_early_stop(state, tol)
    }
}

/// Unregularized PLS inner loop over two or more views.
///
/// Each outer iteration updates every view's weights against the sum of the
/// other views' current scores, normalizing the weights to unit L2 norm.
/// Stops when every view's scores stabilize (cosine similarity with the
/// previous iteration above `1 - tol`) or after `max_iter` iterations.
#[derive(Debug)]
pub struct PlsInnerLoop {
    config: LoopConfig,
    rule: PlsUpdate,
    state: Option<LoopState>,
}

impl PlsInnerLoop {
    /// Fits the inner loop to the supplied views.
    ///
    /// # Parameters
    /// - `views`: 2+ matrices sharing a row (sample) count, with
    ///   view-specific feature counts
    ///
    /// # Returns
    /// - `Ok(&mut self)`: converged or exhausted `max_iter`; weights, scores
    ///   and the objective trace are available through the accessors
    /// - `Err`: invalid view geometry
    pub fn fit(&mut self, views: &[ArrayView2<f64>]) -> anyhow::Result<&mut Self> {
        let state = fit_inner_loop(&mut self.rule, views, &self.config)?;
        self.state = Some(state);
        Ok(self)
    }

    /// The full per-fit state. Errors when called before `fit`.
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

/// Builder for [`PlsInnerLoop`].
pub struct PlsInnerLoopBuilder {
    config: LoopConfig,
}

impl Default for PlsInnerLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlsInnerLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
        }
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

    pub fn build(self) -> PlsInnerLoop {
        PlsInnerLoop {
            config: self.config,
            rule: PlsUpdate,
            state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn test_fit_two_views_converges() {
        let mut rng = StdRng::seed_from_u64(42);
        let x1 = random_matrix(&mut rng, 50, 5);
        let x2 = random_matrix(&mut rng, 50, 4);

        let mut pls = PlsInnerLoopBuilder::new().max_iter(50).build();
        pls.fit(&[x1.view(), x2.view()]).unwrap();

        let weights = pls.weights().unwrap();
        assert_eq!(weights[0].len(), 5);
        assert_eq!(weights[1].len(), 4);
        for w in weights {
            assert_relative_eq!(w.dot(w).sqrt(), 1.0, epsilon = 1e-10);
        }

        let trace = pls.objective_trace().unwrap();
        assert!(!trace.is_empty());
        assert!(trace.len() <= 50);
        // Power iteration on a 50-sample problem stabilizes well before the
        // iteration cap.
        assert!(trace.len() < 50, "expected convergence, got {} iterations", trace.len());

        // The last few objective values settle around the converged value.
        let last = *trace.last().unwrap();
        for v in &trace[trace.len().saturating_sub(3)..] {
            assert_relative_eq!(*v, last, epsilon = 1e-3 * last.abs().max(1.0));
        }
    }

    #[test]
    fn test_early_stop_on_stationary_scores() {
        // Rank-one views with a shared latent factor: the scores are
        // proportional to the factor from the first pass on, so the cosine
        // test must stop the loop at the second completed iteration.
        let u = [1.0, 2.0, 3.0, 4.0];
        let a1 = [1.0, -1.0];
        let a2 = [2.0, 1.0];
        let x1 = Array2::from_shape_fn((4, 2), |(i, j)| u[i] * a1[j]);
        let x2 = Array2::from_shape_fn((4, 2), |(i, j)| u[i] * a2[j]);

        let mut pls = PlsInnerLoopBuilder::new()
            .initialization(Initialization::Random)
            .max_iter(100)
            .build();
        pls.fit(&[x1.view(), x2.view()]).unwrap();
        assert_eq!(pls.objective_trace().unwrap().len(), 2);
    }

    #[test]
    fn test_three_views_forces_generalized() {
        let mut rng = StdRng::seed_from_u64(1);
        let x1 = random_matrix(&mut rng, 20, 3);
        let x2 = random_matrix(&mut rng, 20, 4);
        let x3 = random_matrix(&mut rng, 20, 5);

        let _ = env_logger::builder().is_test(true).try_init();
        let mut pls = PlsInnerLoopBuilder::new().generalized(false).build();
        pls.fit(&[x1.view(), x2.view(), x3.view()]).unwrap();
        assert!(pls.state().unwrap().is_generalized());
    }

    #[test]
    fn test_single_view_rejected() {
        let x = Array2::<f64>::zeros((10, 3));
        let mut pls = PlsInnerLoopBuilder::new().build();
        let err = pls.fit(&[x.view()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::InnerLoopError>(),
            Some(crate::error::InnerLoopError::Configuration(_))
        ));
    }

    #[test]
    fn test_accessors_before_fit_error() {
        let pls = PlsInnerLoopBuilder::new().build();
        assert!(pls.weights().is_err());
        assert!(pls.scores().is_err());
        assert!(pls.objective_trace().is_err());
    }

    #[test]
    fn test_uniform_initialization_runs() {
        let mut rng = StdRng::seed_from_u64(3);
        let x1 = random_matrix(&mut rng, 15, 3);
        let x2 = random_matrix(&mut rng, 15, 2);
        let mut pls = PlsInnerLoopBuilder::new()
            .initialization(Initialization::Uniform)
            .build();
        pls.fit(&[x1.view(), x2.view()]).unwrap();
        assert_eq!(pls.scores().unwrap()[0].len(), 15);
    }
}
