//! Alternating-optimization inner loops for regularized, sparse canonical
//! correlation analysis and partial least squares across two or more data
//! views.
//!
//! Each strategy updates one view's projection weights at a time against the
//! aggregate of the other views' scores, iterating until a cosine-similarity
//! stop test or an iteration cap. The strategies differ in the constrained
//! sub-solver applied to each update: plain power iteration, soft-threshold
//! calibration to an L1 budget, direct soft-thresholding, elastic-net
//! regression, or ADMM with a dual variable.

pub mod error;
pub mod inner_loop;
pub mod params;
pub mod prox;
pub mod regression;

pub use error::InnerLoopError;
pub use inner_loop::{
    AdmmInnerLoop, AdmmInnerLoopBuilder, ElasticInnerLoop, ElasticInnerLoopBuilder, LoopState,
    ParkhomenkoInnerLoop, ParkhomenkoInnerLoopBuilder, PlsInnerLoop, PlsInnerLoopBuilder,
    PmdInnerLoop, PmdInnerLoopBuilder,
};
pub use params::{Initialization, ViewParam};
pub use regression::Regressor;
