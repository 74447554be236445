//! # hx-analysis
//!
//! The heliox analysis core: derived per-track quantities, typed selection
//! predicates, the trial scanner, the data and MC histogram passes, the
//! signal-extraction fit machinery, and the systematics aggregation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod columns;
pub mod data_task;
pub mod fit;
pub mod mc_task;
pub mod report;
pub mod selection;
pub mod signal;
pub mod systematics;
pub mod trials;

pub use columns::DerivedTrack;
pub use selection::Selection;
pub use trials::{CutGrid, Ensemble};
