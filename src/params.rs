//! Hyperparameter normalization and shared loop configuration.
//!
//! Every regularization knob on the inner loops accepts either a single value
//! (broadcast to all views) or one value per view. Normalization happens once
//! at the start of a fit, so the update rules can index per-view vectors
//! without further checks.

use crate::error::InnerLoopError;

/// A hyperparameter that is either shared across views or given per view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewParam<T> {
    Single(T),
    PerView(Vec<T>),
}

impl<T: Clone> From<T> for ViewParam<T> {
    fn from(value: T) -> Self {
        ViewParam::Single(value)
    }
}

impl<T: Clone> From<Vec<T>> for ViewParam<T> {
    fn from(values: Vec<T>) -> Self {
        ViewParam::PerView(values)
    }
}

/// Expands an optional scalar-or-list hyperparameter into one value per view.
///
/// # Parameters
/// - `name`: parameter name used in error messages
/// - `value`: the user-supplied parameter, if any
/// - `default`: value used for every view when `value` is `None`
/// - `n_views`: number of views in the fit
///
/// # Returns
/// - `Ok(Vec<T>)`: exactly `n_views` values
/// - `Err`: a per-view list whose length does not match `n_views`
pub fn process_parameter<T: Clone>(
    name: &str,
    value: Option<&ViewParam<T>>,
    default: T,
    n_views: usize,
) -> anyhow::Result<Vec<T>> {
    let expanded = match value {
        None => vec![default; n_views],
        Some(ViewParam::Single(v)) => vec![v.clone(); n_views],
        Some(ViewParam::PerView(vs)) => vs.clone(),
    };
    if expanded.len() != n_views {
        return Err(InnerLoopError::configuration(format!(
            "parameter {} has length {} but there are {} views",
            name,
            expanded.len(),
            n_views
        )));
    }
    Ok(expanded)
}

/// Strategy for initializing the per-view score vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    /// Uniform [0, 1) entries per sample.
    Random,
    /// All-ones scores, normalized to unit length.
    Uniform,
    /// Bootstrap scores from an unregularized PLS fit with random
    /// initialization, then normalize each view's scores to unit length.
    Unregularized,
}

impl Default for Initialization {
    fn default() -> Self {
        Self::Unregularized
    }
}

/// Outer-loop configuration shared by every update strategy.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iter: usize,
    pub tol: f64,
    pub generalized: bool,
    pub initialization: Initialization,
    pub random_seed: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-5,
            generalized: false,
            initialization: Initialization::default(),
            random_seed: 42,
        }
    }
}
