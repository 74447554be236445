//! Histogram value types and bin arithmetic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for histogram operations.
#[derive(Debug, Error)]
pub enum HistError {
    /// Fewer than two bin edges, or edges out of order.
    #[error("invalid bin edges: {0}")]
    InvalidEdges(String),

    /// Bin-wise operation between histograms with different binnings.
    #[error("binning mismatch between '{0}' and '{1}'")]
    BinningMismatch(String, String),

    /// Bin index outside the axis.
    #[error("bin index {index} out of range (n_bins = {n_bins})")]
    BinOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of bins on the axis.
        n_bins: usize,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, HistError>;

/// A binned axis with uniform or explicit edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    /// Axis with `n` uniform bins over `[low, high)`.
    pub fn uniform(n: usize, low: f64, high: f64) -> Result<Self> {
        if n == 0 || !(low < high) {
            return Err(HistError::InvalidEdges(format!("uniform({n}, {low}, {high})")));
        }
        let width = (high - low) / n as f64;
        let mut edges: Vec<f64> = (0..n).map(|i| low + i as f64 * width).collect();
        edges.push(high);
        Ok(Self { edges })
    }

    /// Axis with explicit, strictly increasing edges.
    pub fn from_edges(edges: &[f64]) -> Result<Self> {
        if edges.len() < 2 || !edges.windows(2).all(|w| w[0] < w[1]) {
            return Err(HistError::InvalidEdges(format!("{} edges", edges.len())));
        }
        Ok(Self { edges: edges.to_vec() })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin edges (length `n_bins + 1`).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Lower edge of the axis.
    pub fn low(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the axis.
    pub fn high(&self) -> f64 {
        *self.edges.last().unwrap_or(&f64::NAN)
    }

    /// Bin index of `x`: `[low, high)` per bin, last bin closed on the right.
    /// `None` for out-of-range (or non-finite) values.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !x.is_finite() || x < self.low() || x > self.high() {
            return None;
        }
        if x == self.high() {
            return Some(self.n_bins() - 1);
        }
        // partition_point: first edge strictly greater than x
        let idx = self.edges.partition_point(|&e| e <= x);
        Some(idx - 1)
    }

    /// Lower edge of bin `i`.
    pub fn bin_low(&self, i: usize) -> f64 {
        self.edges[i]
    }

    /// Upper edge of bin `i`.
    pub fn bin_high(&self, i: usize) -> f64 {
        self.edges[i + 1]
    }

    /// Center of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// Width of bin `i`.
    pub fn bin_width(&self, i: usize) -> f64 {
        self.edges[i + 1] - self.edges[i]
    }
}

/// A 1-D histogram with per-bin sum of weights and sum of squared weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1 {
    /// Histogram name (stable container object name).
    pub name: String,
    /// Binned axis.
    pub axis: Axis,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
}

impl Hist1 {
    /// Empty histogram over `axis`.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        let n = axis.n_bins();
        Self { name: name.into(), axis, sumw: vec![0.0; n], sumw2: vec![0.0; n], entries: 0 }
    }

    /// Empty histogram with `n` uniform bins over `[low, high)`.
    pub fn new_uniform(name: impl Into<String>, n: usize, low: f64, high: f64) -> Result<Self> {
        Ok(Self::new(name, Axis::uniform(n, low, high)?))
    }

    /// Empty histogram with explicit edges.
    pub fn new_binned(name: impl Into<String>, edges: &[f64]) -> Result<Self> {
        Ok(Self::new(name, Axis::from_edges(edges)?))
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.axis.n_bins()
    }

    /// Total entries that landed in a bin.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Fill with unit weight. Out-of-range values are dropped.
    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    /// Fill with weight `w`. Out-of-range values are dropped.
    pub fn fill_weighted(&mut self, x: f64, w: f64) {
        if let Some(i) = self.axis.find_bin(x) {
            self.sumw[i] += w;
            self.sumw2[i] += w * w;
            self.entries += 1;
        }
    }

    /// Bin content (sum of weights).
    pub fn content(&self, i: usize) -> f64 {
        self.sumw[i]
    }

    /// Bin error: `sqrt(sum of squared weights)`. For unit weights this is
    /// the Poisson `sqrt(count)`.
    pub fn error(&self, i: usize) -> f64 {
        self.sumw2[i].sqrt()
    }

    /// Overwrite bin content and error.
    pub fn set_bin(&mut self, i: usize, content: f64, error: f64) -> Result<()> {
        if i >= self.n_bins() {
            return Err(HistError::BinOutOfRange { index: i, n_bins: self.n_bins() });
        }
        self.sumw[i] = content;
        self.sumw2[i] = error * error;
        Ok(())
    }

    /// Clone with a new name, keeping contents.
    pub fn clone_named(&self, name: impl Into<String>) -> Self {
        let mut h = self.clone();
        h.name = name.into();
        h
    }

    /// Empty clone with a new name.
    pub fn empty_like(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.axis.clone())
    }

    /// Bin-wise sum; binnings must match.
    pub fn add(&mut self, other: &Hist1) -> Result<()> {
        self.check_binning(other)?;
        for i in 0..self.n_bins() {
            self.sumw[i] += other.sumw[i];
            self.sumw2[i] += other.sumw2[i];
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Bin-wise ratio with independent-Poisson error propagation:
    /// `σ²(a/b) = (σ_a² + (a/b)²·σ_b²) / b²`. Zero-denominator bins become
    /// 0 ± 0 (sentinel, never NaN).
    pub fn divide(&mut self, other: &Hist1) -> Result<()> {
        self.check_binning(other)?;
        for i in 0..self.n_bins() {
            let (a, b) = (self.sumw[i], other.sumw[i]);
            if b == 0.0 {
                self.sumw[i] = 0.0;
                self.sumw2[i] = 0.0;
                continue;
            }
            let r = a / b;
            let var = (self.sumw2[i] + r * r * other.sumw2[i]) / (b * b);
            self.sumw[i] = r;
            self.sumw2[i] = var;
        }
        Ok(())
    }

    /// Scale contents (and errors) by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for i in 0..self.sumw.len() {
            self.sumw[i] *= factor;
            self.sumw2[i] *= factor * factor;
        }
    }

    /// Scale each bin by `factor / bin width` (differential spectra).
    pub fn scale_by_width(&mut self, factor: f64) {
        for i in 0..self.sumw.len() {
            let f = factor / self.axis.bin_width(i);
            self.sumw[i] *= f;
            self.sumw2[i] *= f * f;
        }
    }

    /// Sum of contents over the inclusive bin range.
    pub fn integral(&self, first: usize, last: usize) -> f64 {
        let last = last.min(self.n_bins().saturating_sub(1));
        self.sumw[first..=last].iter().sum()
    }

    /// Content-weighted mean of the bin centers.
    pub fn mean(&self) -> f64 {
        let tot: f64 = self.sumw.iter().sum();
        if tot == 0.0 {
            return 0.0;
        }
        self.sumw
            .iter()
            .enumerate()
            .map(|(i, w)| w * self.axis.bin_center(i))
            .sum::<f64>()
            / tot
    }

    /// Content-weighted population RMS of the bin centers.
    pub fn rms(&self) -> f64 {
        let tot: f64 = self.sumw.iter().sum();
        if tot == 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .sumw
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let d = self.axis.bin_center(i) - mean;
                w * d * d
            })
            .sum::<f64>()
            / tot;
        var.max(0.0).sqrt()
    }

    fn check_binning(&self, other: &Hist1) -> Result<()> {
        if self.axis != other.axis {
            return Err(HistError::BinningMismatch(self.name.clone(), other.name.clone()));
        }
        Ok(())
    }
}

/// Per-x-bin mean and spread of a second variable (resolution studies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Per-bin mean of y, errors = RMS/√n.
    pub mean: Hist1,
    /// Per-bin population RMS of y.
    pub spread: Hist1,
}

/// A 2-D histogram, row-major over (x bin, y bin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2 {
    /// Histogram name (stable container object name).
    pub name: String,
    /// X axis.
    pub x_axis: Axis,
    /// Y axis.
    pub y_axis: Axis,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
}

impl Hist2 {
    /// Empty histogram over the two axes.
    pub fn new(name: impl Into<String>, x_axis: Axis, y_axis: Axis) -> Self {
        let n = x_axis.n_bins() * y_axis.n_bins();
        Self {
            name: name.into(),
            x_axis,
            y_axis,
            sumw: vec![0.0; n],
            sumw2: vec![0.0; n],
            entries: 0,
        }
    }

    /// Fill with unit weight. Out-of-range values are dropped.
    pub fn fill(&mut self, x: f64, y: f64) {
        self.fill_weighted(x, y, 1.0);
    }

    /// Fill with weight `w`. Out-of-range values are dropped.
    pub fn fill_weighted(&mut self, x: f64, y: f64, w: f64) {
        let (Some(ix), Some(iy)) = (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) else {
            return;
        };
        let idx = ix * self.y_axis.n_bins() + iy;
        self.sumw[idx] += w;
        self.sumw2[idx] += w * w;
        self.entries += 1;
    }

    /// Bin content at (x bin, y bin).
    pub fn content(&self, ix: usize, iy: usize) -> f64 {
        self.sumw[ix * self.y_axis.n_bins() + iy]
    }

    /// Total entries that landed in a bin.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Project the y distribution of one x bin into a 1-D histogram.
    pub fn projection_y(&self, name: impl Into<String>, x_bin: usize) -> Result<Hist1> {
        if x_bin >= self.x_axis.n_bins() {
            return Err(HistError::BinOutOfRange { index: x_bin, n_bins: self.x_axis.n_bins() });
        }
        let mut h = Hist1::new(name, self.y_axis.clone());
        for iy in 0..self.y_axis.n_bins() {
            let idx = x_bin * self.y_axis.n_bins() + iy;
            h.sumw[iy] = self.sumw[idx];
            h.sumw2[iy] = self.sumw2[idx];
        }
        Ok(h)
    }

    /// Per-x-bin mean and RMS of y.
    pub fn profile_x(&self, name: &str) -> Profile {
        let mut mean = Hist1::new(format!("{name}_mean"), self.x_axis.clone());
        let mut spread = Hist1::new(format!("{name}_rms"), self.x_axis.clone());
        for ix in 0..self.x_axis.n_bins() {
            // projection_y cannot fail for ix < n_bins
            let slice = match self.projection_y("slice", ix) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let n: f64 = (0..slice.n_bins()).map(|i| slice.content(i)).sum();
            let (m, r) = (slice.mean(), slice.rms());
            let mean_err = if n > 0.0 { r / n.sqrt() } else { 0.0 };
            let _ = mean.set_bin(ix, m, mean_err);
            let _ = spread.set_bin(ix, r, 0.0);
        }
        Profile { mean, spread }
    }
}
