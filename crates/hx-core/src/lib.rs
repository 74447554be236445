//! # hx-core
//!
//! Core types for the heliox nuclei-spectra analysis: the error type shared
//! across the workspace, species constants (masses, energy-loss calibrations,
//! PDG codes), the immutable per-track record, and the analysis configuration
//! object that is built once at process start and passed into every task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod species;
pub mod track;

pub use config::AnalysisConfig;
pub use error::{Error, Result};
pub use species::{Matter, Species};
pub use track::{McTruth, TrackRecord};
