//! Signal + background fit models and the binned extended
//! maximum-likelihood fitter.

pub mod fitter;
pub mod models;

pub use fitter::{background_window_counts, fit, FitOutcome, FitRange, FitterConfig};
pub use models::{Model, Param, NBKG, NSIG};
