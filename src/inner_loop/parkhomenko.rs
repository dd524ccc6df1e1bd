//! L1-penalized update (Parkhomenko-style sparse CCA).
//!
//! Unlike the cardinality-constrained rule, the threshold here is a fixed
//! fraction of the penalty parameter (`c / 2`) rather than calibrated to a
//! target norm.

use super::{
    check_converged_weights, cosine_early_stop, fit_inner_loop, LoopState, UpdateRule,
};
use crate::error::InnerLoopError;
use crate::params::{process_parameter, Initialization, LoopConfig, ViewParam};
use crate::prox::{l2_norm, soft_threshold};
use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};

#[derive(Debug)]
pub(crate) struct ParkhomenkoUpdate {
    c_param: Option<ViewParam<f64>>,
    c: Vec<f64>,
}

impl UpdateRule for ParkhomenkoUpdate {
    fn check_params(&mut self, views: &[Array2<f64>]) -> anyhow::Result<()> {
        self.c = process_parameter("c", self.c_param.as_ref(), 1e-4, views.len())?;
        if self.c.iter().any(|&c| c <= 0.0) {
            return Err(InnerLoopError::configuration(format!(
                "all regularization parameters should be above 0, c={:?}",
                self.c
            )));
        }
        Ok(())
    }

    fn update_view(&mut self, state: &mut LoopState, view_index: usize) -> anyhow::Result<()> {
        let target = state.deflation_sum(view_index);
        let mut w = state.views[view_index].t().dot(&target);
        check_converged_weights(&w, view_index)?;
        let norm = l2_norm(&w);
        w.mapv_inplace(|v| v / norm);
        let mut w = soft_threshold(w.view(), self.c[view_index] / 2.0, false);
        check_converged_weights(&w, view_index)?;
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

/// Sparse inner loop with direct soft-thresholding at `c / 2` per view.
///
/// Weights are re-normalized to unit L2 norm after thresholding. An update
/// whose thresholded weights are all zero fails with a degeneracy error.
#[derive(Debug)]
pub struct ParkhomenkoInnerLoop {
    config: LoopConfig,
    rule: ParkhomenkoUpdate,
    state: Option<LoopState>,
}

impl ParkhomenkoInnerLoop {
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

/// Builder for [`ParkhomenkoInnerLoop`].
pub struct ParkhomenkoInnerLoopBuilder {
    config: LoopConfig,
    c: Option<ViewParam<f64>>,
}

impl Default for ParkhomenkoInnerLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkhomenkoInnerLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
            c: None,
        }
    }

    /// Soft-threshold penalty, shared or per view; must be positive.
    /// Defaults to 1e-4.
    pub fn c(mut self, c: impl Into<ViewParam<f64>>) -> Self {
        self.c = Some(c.into());
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

    pub fn build(self) -> ParkhomenkoInnerLoop {
        ParkhomenkoInnerLoop {
            config: self.config,
            rule: ParkhomenkoUpdate {
                c_param: self.c,
                c: Vec::new(),
            },
            state: None,
        }
    }
}
