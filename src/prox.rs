//! Proximal operators and the one-dimensional search utilities shared by the
//! sparse update rules.

use ndarray::{Array1, ArrayView1, Zip};

pub(crate) fn l1_norm(x: &Array1<f64>) -> f64 {
    x.iter().map(|v| v.abs()).sum()
}

pub(crate) fn l2_norm(x: &Array1<f64>) -> f64 {
    x.dot(x).sqrt()
}

/// Cosine similarity between two vectors.
pub(crate) fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.dot(b) / (l2_norm(a) * l2_norm(b))
}

/// Elementwise soft-thresholding: `sign(x) * max(|x| - threshold, 0)`.
///
/// With `positive` set, negative outputs are clamped to zero, which restricts
/// the result to the non-negative orthant.
pub fn soft_threshold(x: ArrayView1<f64>, threshold: f64, positive: bool) -> Array1<f64> {
    let mut out = x.mapv(|v| v.signum() * (v.abs() - threshold).max(0.0));
    if positive {
        out.mapv_inplace(|v| v.max(0.0));
    }
    out
}

/// One bracketing step for a monotone one-dimensional root-finding problem.
///
/// The problem must be set up so that a greater parameter yields a greater
/// function value. Given the current and previous parameter values, the
/// current and previous function values, and the current `[min, max]`
/// bracket, proposes the next candidate parameter and tightens the bracket.
/// Returns `(new, previous, min, max)` where `previous` is the parameter
/// value that was just evaluated. The caller owns the stopping criterion.
pub fn bin_search(
    current: f64,
    previous: f64,
    current_val: f64,
    previous_val: Option<f64>,
    min: f64,
    max: f64,
) -> (f64, f64, f64, f64) {
    let previous_val = previous_val.unwrap_or(current_val);
    let (mut min, mut max) = (min, max);
    let new = if current_val <= 0.0 {
        let new = if previous_val <= 0.0 {
            (current + max) / 2.0
        } else {
            (current + previous) / 2.0
        };
        if current > min {
            min = current;
        }
        new
    } else {
        let new = if previous_val > 0.0 {
            (current + min) / 2.0
        } else {
            (current + previous) / 2.0
        };
        if current < max {
            max = current;
        }
        new
    };
    (new, current, min, max)
}

/// Calibrates a soft-threshold level so the thresholded, re-normalized weight
/// vector meets an exact L1-norm budget.
///
/// The input is first normalized to unit L2 norm. A binary search over the
/// threshold (bracket `[0, 10]`) then drives `‖coef‖₁` to `c`, stopping when
/// the residual drops below `1e-5`, the bracket degenerates below `1e-30`,
/// or 50 iterations have run. The returned vector has unit L2 norm.
pub fn delta_search(w: ArrayView1<f64>, c: f64, positive: bool) -> Array1<f64> {
    let norm = w.dot(&w).sqrt();
    let w = w.mapv(|v| v / norm);

    let mut min = 0.0;
    let mut max = 10.0;
    let mut current = 0.0;
    let mut previous = current;
    let mut previous_val: Option<f64> = None;
    let mut coef = w.clone();
    for _ in 0..50 {
        coef = soft_threshold(w.view(), current, positive);
        let coef_norm = l2_norm(&coef);
        if coef_norm > 0.0 {
            coef.mapv_inplace(|v| v / coef_norm);
        }
        let current_val = c - l1_norm(&coef);
        (current, previous, min, max) =
            bin_search(current, previous, current_val, previous_val, min, max);
        previous_val = Some(current_val);
        if current_val.abs() < 1e-5 || (max - min).abs() < 1e-30 {
            break;
        }
    }
    coef
}

/// Proximal map for the smooth part of the ADMM objective.
///
/// Soft-thresholding in gradient-shifted coordinates: entries where
/// `x + mu*gradient` exceeds `mu*tau` in magnitude are shifted toward zero
/// by `mu*(gradient ∓ tau)`; the remainder is zeroed.
pub fn prox_mu_f(
    x: ArrayView1<f64>,
    mu: f64,
    gradient: ArrayView1<f64>,
    tau: f64,
) -> Array1<f64> {
    let mut out = Array1::zeros(x.len());
    Zip::from(&mut out).and(&x).and(&gradient).for_each(|o, &x, &g| {
        let shifted = x + mu * g;
        if shifted > mu * tau {
            *o = x + mu * (g - tau);
        } else if shifted < -mu * tau {
            *o = x + mu * (g + tau);
        } else {
            *o = 0.0;
        }
    });
    out
}

/// Projection onto the unit L2 ball. Identity inside the ball, radial
/// rescaling outside; idempotent.
pub fn prox_lam_g(x: ArrayView1<f64>) -> Array1<f64> {
    let norm = x.dot(&x).sqrt();
    if norm <= 1.0 {
        x.to_owned()
    } else {
        x.mapv(|v| v / norm)
    }
}
