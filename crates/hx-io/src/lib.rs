//! # hx-io
//!
//! I/O plumbing for the heliox analysis: the Parquet track-table reader and
//! writer (fixed, documented schema; schema violations fail fast naming the
//! offending column) and the hierarchical histogram container that every
//! task writes its results into.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod error;
pub mod table;

pub use container::{Container, Folder};
pub use error::{IoError, Result};
pub use table::{read_tracks, write_tracks, TrackTable};
