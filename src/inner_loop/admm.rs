//! ADMM update with deflation (Suo-style sparse CCA).
//!
//! Each view update runs its own fixed-budget inner loop: a proximal
//! gradient step enforcing sparsity, a projection of the auxiliary variable
//! onto the unit ball, and a dual-variable correction. The inner loop always
//! runs the full `max_iter` count; there is no convergence check inside it,
//! so every outer iteration pays a fixed cost of `max_iter` inner steps per
//! view.

use super::{
    check_converged_weights, cosine_early_stop, elastic_objective, fit_inner_loop, LoopState,
    UpdateRule,
};
use crate::error::InnerLoopError;
use crate::params::{process_parameter, Initialization, LoopConfig, ViewParam};
use crate::prox::{prox_lam_g, prox_mu_f};
use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};

#[derive(Debug)]
pub(crate) struct AdmmUpdate {
    c_param: Option<ViewParam<f64>>,
    lam_param: Option<ViewParam<f64>>,
    mu_param: Option<ViewParam<f64>>,
    eta_param: Option<ViewParam<f64>>,
    max_iter: usize,
    c: Vec<f64>,
    lam: Vec<f64>,
    mu: Vec<f64>,
    l1_ratio: Vec<f64>,
    eta: Vec<Array1<f64>>,
    z: Vec<Array1<f64>>,
}

fn frobenius_norm(view: &Array2<f64>) -> f64 {
    view.iter().map(|v| v * v).sum::<f64>().sqrt()
}

impl UpdateRule for AdmmUpdate {
    fn check_params(&mut self, views: &[Array2<f64>]) -> anyhow::Result<()> {
        let n_views = views.len();
        self.c = process_parameter("c", self.c_param.as_ref(), 0.0, n_views)?;
        self.lam = process_parameter("lam", self.lam_param.as_ref(), 1.0, n_views)?;
        self.mu = match self.mu_param.as_ref() {
            None => self
                .lam
                .iter()
                .zip(views)
                .map(|(lam, view)| lam / frobenius_norm(view).powi(2))
                .collect(),
            Some(_) => process_parameter("mu", self.mu_param.as_ref(), 0.0, n_views)?,
        };
        let eta0 = process_parameter("eta", self.eta_param.as_ref(), 0.0, n_views)?;

        if self.mu.iter().any(|&mu| mu <= 0.0) {
            return Err(InnerLoopError::configuration(format!(
                "at least one mu is not positive, mu={:?}",
                self.mu
            )));
        }
        // Step-size feasibility for the proximal update: mu must not exceed
        // lam / ||view||^2.
        for (i, ((mu, lam), view)) in self.mu.iter().zip(&self.lam).zip(views).enumerate() {
            let bound = lam / frobenius_norm(view).powi(2);
            if *mu > bound * (1.0 + 1e-9) {
                return Err(InnerLoopError::configuration(format!(
                    "mu for view {} is {} but must not exceed lam / ||view||^2 = {}",
                    i, mu, bound
                )));
            }
        }

        self.eta = eta0
            .iter()
            .zip(views)
            .map(|(&e, view)| Array1::from_elem(view.nrows(), e))
            .collect();
        self.z = views.iter().map(|view| Array1::zeros(view.nrows())).collect();
        self.l1_ratio = vec![1.0; n_views];
        Ok(())
    }

    fn update_view(&mut self, state: &mut LoopState, view_index: usize) -> anyhow::Result<()> {
        let target = state.deflation_sum(view_index);
        let gradient = state.views[view_index].t().dot(&target);
        let mu = self.mu[view_index];
        let lam = self.lam[view_index];
        let n_samples = state.views[view_index].nrows() as f64;
        let tau = n_samples * self.c[view_index];

        let mut w = state.weights[view_index].clone();
        {
            let x = &state.views[view_index];
            for _ in 0..self.max_iter {
                let projection = x.dot(&w);
                let residual = &projection - &self.z[view_index] + &self.eta[view_index];
                let step = x.t().dot(&residual);
                let arg = &w - &(step * (mu / lam));
                w = prox_mu_f(arg.view(), mu, gradient.view(), tau);

                let projection = x.dot(&w);
                let shifted = &projection + &self.eta[view_index];
                self.z[view_index] = prox_lam_g(shifted.view());
                self.eta[view_index] = &self.eta[view_index] + &projection - &self.z[view_index];
            }
        }
        check_converged_weights(&w, view_index)?;
        state.weights[view_index] = w;
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

/// Sparse CCA inner loop solved by ADMM with a dual variable per view.
///
/// The auxiliary variable `z` and dual variable `eta` persist across both
/// the outer alternating loop and the nested ADMM iterations; they are reset
/// only at fit start. The sparsity offset of the proximal map is scaled by
/// the sample count (`N * c`) so the regularization level is comparable with
/// the other sparse strategies.
#[derive(Debug)]
pub struct AdmmInnerLoop {
    config: LoopConfig,
    rule: AdmmUpdate,
    state: Option<LoopState>,
}

impl AdmmInnerLoop {
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

/// Builder for [`AdmmInnerLoop`].
pub struct AdmmInnerLoopBuilder {
    config: LoopConfig,
    c: Option<ViewParam<f64>>,
    lam: Option<ViewParam<f64>>,
    mu: Option<ViewParam<f64>>,
    eta: Option<ViewParam<f64>>,
}

impl Default for AdmmInnerLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmmInnerLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
            c: None,
            lam: None,
            mu: None,
            eta: None,
        }
    }

    /// Sparsity penalty, shared or per view. The proximal offset is
    /// `N * c`. Defaults to 0.
    pub fn c(mut self, c: impl Into<ViewParam<f64>>) -> Self {
        self.c = Some(c.into());
        self
    }

    /// Augmented-Lagrangian weight, shared or per view. Defaults to 1.
    pub fn lam(mut self, lam: impl Into<ViewParam<f64>>) -> Self {
        self.lam = Some(lam.into());
        self
    }

    /// Proximal step size, shared or per view. Defaults to
    /// `lam / ||view||^2`, the largest feasible value.
    pub fn mu(mut self, mu: impl Into<ViewParam<f64>>) -> Self {
        self.mu = Some(mu.into());
        self
    }

    /// Initial value filled into the dual variable. Defaults to 0.
    pub fn eta(mut self, eta: impl Into<ViewParam<f64>>) -> Self {
        self.eta = Some(eta.into());
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

    pub fn build(self) -> AdmmInnerLoop {
        let max_iter = self.config.max_iter;
        AdmmInnerLoop {
            config: self.config,
            rule: AdmmUpdate {
                c_param: self.c,
                lam_param: self.lam,
                mu_param: self.mu,
                eta_param: self.eta,
                max_iter,
                c: Vec::new(),
                lam: Vec::new(),
                mu: Vec::new(),
                l1_ratio: Vec::new(),
                eta: Vec::new(),
                z: Vec::new(),
            },
            state: None,
        }
    }
}
