//! Run summary: a JSON report of fit quality and degenerate/missing
//! entries across the extraction outputs. The process reports these at the
//! end instead of stopping at the first one; plot rendering is out of
//! scope here.

use serde::{Deserialize, Serialize};

use hx_core::{AnalysisConfig, Matter, Result};
use hx_io::Container;

/// Fit-quality summary of one species in one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesSummary {
    /// Namespace (`nuclei`, `nuclei0`, ...).
    pub namespace: String,
    /// Species directory name.
    pub species: String,
    /// Bins with a surviving TOF fit.
    pub n_tof_bins: usize,
    /// Bins inside the fit window left empty by failed fits.
    pub n_flagged_bins: usize,
    /// Mean sideband χ²/NDF over the filled bins.
    pub mean_chi2: f64,
    /// Largest χ²/NDF seen.
    pub max_chi2: f64,
}

/// The full run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Data-taking period.
    pub period: String,
    /// Reconstruction pass.
    pub reco_pass: String,
    /// Analysed species.
    pub species: String,
    /// Per-namespace, per-species summaries.
    pub summaries: Vec<SpeciesSummary>,
    /// Total flagged (missing) bins across the whole extraction.
    pub total_flagged: usize,
}

/// Summarize the signal-extraction container.
pub fn report_task(cfg: &AnalysisConfig, signal: &Container) -> Result<RunReport> {
    let species = cfg.run.species;
    let dirs = [species.name(), species.anti_name()];
    let mut summaries = Vec::new();
    let mut total_flagged = 0usize;

    for ns in signal.namespaces(&cfg.common.filter_list_name) {
        for (side, matter) in Matter::BOTH.into_iter().enumerate() {
            let letter = matter.letter();
            let Some(raw) =
                signal.try_h1(&format!("{ns}/{}/GausExp/hRawCounts{letter}0", dirs[side]))
            else {
                continue;
            };
            let chi2 =
                signal.try_h1(&format!("{ns}/{}/ChiSquare/hChiSquare{letter}0", dirs[side]));

            let mut n_filled = 0usize;
            let mut n_flagged = 0usize;
            for bin in 0..raw.n_bins() {
                let center = raw.axis.bin_center(bin);
                if center < cfg.common.pt_range[0] || center > cfg.common.pt_range[1] {
                    continue;
                }
                if raw.content(bin) > 0.0 {
                    n_filled += 1;
                } else {
                    n_flagged += 1;
                }
            }
            total_flagged += n_flagged;

            let (mut sum, mut max, mut n_chi) = (0.0f64, 0.0f64, 0usize);
            if let Some(chi2) = chi2 {
                for bin in 0..chi2.n_bins() {
                    let v = chi2.content(bin);
                    if v > 0.0 {
                        sum += v;
                        max = max.max(v);
                        n_chi += 1;
                    }
                }
            }
            summaries.push(SpeciesSummary {
                namespace: ns.clone(),
                species: dirs[side].to_string(),
                n_tof_bins: n_filled,
                n_flagged_bins: n_flagged,
                mean_chi2: if n_chi > 0 { sum / n_chi as f64 } else { 0.0 },
                max_chi2: max,
            });
        }
    }

    let report = RunReport {
        period: cfg.common.period.clone(),
        reco_pass: cfg.common.reco_pass.clone(),
        species: species.name().to_string(),
        summaries,
        total_flagged,
    };
    if report.total_flagged > 0 {
        tracing::warn!(flagged = report.total_flagged, "extraction left flagged bins");
    }
    Ok(report)
}

/// Serialize a report to pretty JSON at `path`, creating parent directories.
pub fn write_report(report: &RunReport, path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    Ok(())
}
