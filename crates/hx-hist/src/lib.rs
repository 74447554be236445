//! # hx-hist
//!
//! One- and two-dimensional count histograms for the heliox analysis.
//!
//! Histograms store per-bin sum of weights and sum of squared weights so
//! statistical errors stay correct under optional per-entry weighting. Bin
//! assignment uses half-open `[low, high)` intervals except the last bin,
//! which is closed on the right; out-of-range entries are dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod efficiency;
pub mod histogram;

pub use efficiency::{correlated_subset_ratio, efficiency, EffMode};
pub use histogram::{Axis, Hist1, Hist2, HistError, Profile, Result};
