use thiserror::Error;

/// Errors raised by the alternating inner-loop solvers.
///
/// `Configuration` errors are raised during parameter validation, before any
/// iteration has run. `Degeneracy` errors are raised mid-iteration when a
/// weight update collapses; the fit is aborted with no retry.
#[derive(Debug, Error)]
pub enum InnerLoopError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("weights in view {view} converged to zero or diverged")]
    Degeneracy { view: usize },
}

impl InnerLoopError {
    pub(crate) fn configuration(msg: impl Into<String>) -> anyhow::Error {
        InnerLoopError::Configuration(msg.into()).into()
    }

    pub(crate) fn degeneracy(view: usize) -> anyhow::Error {
        InnerLoopError::Degeneracy { view }.into()
    }
}
