//! The immutable analysis configuration.
//!
//! Built once at process start (the CLI merges a TOML file over
//! [`AnalysisConfig::default`]) and passed by reference into every task; no
//! component reads ambient global state. All thresholds are typed values,
//! not expression strings.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::species::Species;

/// A named family of selection thresholds swept by the trial scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutFamily {
    /// Longitudinal DCA significance upper bound (`|nσ_DCAz| < v`).
    NsigmaDcaZ,
    /// TPC cluster-count lower bound (`clusters > v`, strict).
    TpcClusters,
    /// Inner-tracker cluster-count lower bound (`clusters ≥ v`).
    ItsClusters,
    /// TPC PID deviation window half-width (`|nσ| < v`).
    NsigmaTpc,
}

/// One cut family with its ordered list of candidate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutFamilyGrid {
    /// The threshold being varied.
    pub family: CutFamily,
    /// Candidate values, in sweep order.
    pub values: Vec<f64>,
}

/// Signal-extraction model identifiers.
///
/// The names double as stable histogram-name suffixes in the output
/// container (`hTPConlyA0_ExpGaus`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitModelKind {
    /// Gaussian signal + Gaussian background.
    GausGaus,
    /// Gaussian signal + exponential background.
    ExpGaus,
    /// Exponential-tail Gaussian signal + exponential background.
    ExpTailGaus,
    /// Log-normal signal + log-normal background.
    LognormalLognormal,
    /// Exponential-tail Gaussian signal + double-exponential background.
    ExpExpTailGaus,
    /// Exponential-tail Gaussian signal + exponential-plus-Chebyshev background.
    ExpChebTailGaus,
}

impl FitModelKind {
    /// Stable name used in container object names.
    pub fn name(self) -> &'static str {
        match self {
            FitModelKind::GausGaus => "GausGaus",
            FitModelKind::ExpGaus => "ExpGaus",
            FitModelKind::ExpTailGaus => "ExpTailGaus",
            FitModelKind::LognormalLognormal => "LognormalLognormal",
            FitModelKind::ExpExpTailGaus => "ExpExpTailGaus",
            FitModelKind::ExpChebTailGaus => "ExpChebTailGaus",
        }
    }
}

/// Dataset identifiers and kinematic binning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Data-taking period identifier.
    pub period: String,
    /// Reconstruction pass identifier.
    pub reco_pass: String,
    /// Monte-Carlo production identifier.
    pub mc_production: String,
    /// Free-form analysis variant tag appended to output names.
    pub variant: String,
    /// Namespace prefix selecting analysis directories in containers.
    pub filter_list_name: String,
    /// Transverse-momentum bin edges (GeV/c).
    pub pt_bins: Vec<f64>,
    /// Per-centrality pt upper limits for the TOF fits.
    pub cent_pt_limits: Vec<f64>,
    /// Upper pt bound of the TPC-only extraction.
    pub tpc_max_pt: f64,
    /// Lower pt bound below which TOF fit plots are not kept.
    pub tof_min_pt: f64,
    /// pt window processed by the signal extractor.
    pub pt_range: [f64; 2],
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            period: "LHC22".into(),
            reco_pass: "apass4".into(),
            mc_production: "LHC23j6b".into(),
            variant: String::new(),
            filter_list_name: "nuclei".into(),
            pt_bins: vec![
                1.5, 1.75, 2.0, 2.25, 2.5, 2.75, 3.0, 3.25, 3.5, 3.75, 4.0, 4.5, 5.0,
            ],
            cent_pt_limits: vec![7.0],
            tpc_max_pt: 7.0,
            tof_min_pt: 1.0,
            pt_range: [1.4, 7.0],
        }
    }
}

/// Run-level switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Species analysed by this pass.
    pub species: Species,
    /// Whether the trial scan runs (data and MC passes).
    pub enable_trials: bool,
    /// Whether the data pass writes a skimmed track table.
    pub skim: bool,
    /// Worker threads for the trial scan; 0 = all available.
    pub threads: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { species: Species::He3, enable_trials: true, skim: false, threads: 0 }
    }
}

/// Base track-quality thresholds (applied before everything else).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseCuts {
    /// `tpc_clusters ≥ v`.
    pub min_tpc_clusters: u16,
    /// `its_clusters ≥ v`.
    pub min_its_clusters: u8,
    /// `|η| < v`.
    pub max_abs_eta: f64,
    /// `|DCA_xy| < v` (cm).
    pub max_abs_dca_xy: f64,
    /// `pt > v` (GeV/c).
    pub pt_min: f64,
    /// `pt < v` (GeV/c).
    pub pt_max: f64,
}

impl Default for BaseCuts {
    fn default() -> Self {
        Self {
            min_tpc_clusters: 110,
            min_its_clusters: 5,
            max_abs_eta: 0.9,
            max_abs_dca_xy: 0.7,
            pt_min: 0.8,
            pt_max: 9.0,
        }
    }
}

/// Primary-candidate thresholds (the nominal selection the trials vary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryCuts {
    /// `tpc_clusters > v` (strict, unlike the base cut).
    pub min_tpc_clusters: f64,
    /// `its_clusters ≥ v`.
    pub min_its_clusters: f64,
    /// `|nσ_DCAz| < v`; the secondary selection uses the complement (`>`).
    pub max_dca_z_nsigma: f64,
    /// `|DCA_xy| < v` (cm).
    pub max_abs_dca_xy: f64,
}

impl Default for PrimaryCuts {
    fn default() -> Self {
        Self {
            min_tpc_clusters: 120.0,
            min_its_clusters: 6.0,
            max_dca_z_nsigma: 7.0,
            max_abs_dca_xy: 0.2,
        }
    }
}

/// Loosened thresholds used when exporting a skimmed track table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkimCuts {
    /// `|nσ_DCAz| < v`.
    pub max_dca_z_nsigma: f64,
    /// `|DCA_xy| < v` (cm).
    pub max_abs_dca_xy: f64,
    /// `|nσ_TPC| < v`.
    pub max_abs_nsigma: f64,
}

impl Default for SkimCuts {
    fn default() -> Self {
        Self { max_dca_z_nsigma: 8.0, max_abs_dca_xy: 0.2, max_abs_nsigma: 5.0 }
    }
}

/// Monte-Carlo pass thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McCuts {
    /// `|y| < v` for both reconstructed and generated candidates.
    pub max_abs_rapidity: f64,
    /// `|DCA_z| < v` (cm) in the tracking selection.
    pub max_abs_dca_z: f64,
}

impl Default for McCuts {
    fn default() -> Self {
        Self { max_abs_rapidity: 0.5, max_abs_dca_z: 0.7 }
    }
}

/// All selection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Base quality cuts.
    pub base: BaseCuts,
    /// Primary-candidate cuts.
    pub primary: PrimaryCuts,
    /// Skim-export cuts.
    pub skim: SkimCuts,
    /// MC-pass cuts.
    pub mc: McCuts,
    /// `|nσ_TPC| < v` preselection of the TOF-mass fills.
    pub tof_nsigma_cut: f64,
    /// Inclusive-exclusive nσ window `(lo, hi)` of the DCA template fills.
    pub tpc_window: (f64, f64),
    /// TOF-mass veto half-width: accept if no TOF hit or `|Δm| < v`.
    pub tof_mass_veto: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::defaults_for(Species::He3)
    }
}

impl SelectionConfig {
    fn defaults_for(species: Species) -> Self {
        let (tof_nsigma_cut, tof_mass_veto) = match species {
            Species::He4 => (3.0, 0.3),
            _ => (3.5, 0.6),
        };
        Self {
            base: BaseCuts::default(),
            primary: PrimaryCuts::default(),
            skim: SkimCuts::default(),
            mc: McCuts::default(),
            tof_nsigma_cut,
            tpc_window: (-0.5, 3.0),
            tof_mass_veto,
        }
    }
}

/// Fit-stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Model fitted to the TOF mass-deviation projections.
    pub tof_model: FitModelKind,
    /// Models fitted to the TPC nσ projections.
    pub tpc_models: Vec<FitModelKind>,
    /// TPC model whose yields seed the corrected spectrum.
    pub default_tpc_model: FitModelKind,
    /// Counting-window half-widths k (window `[μ−kσ, μ+(k+2)σ]`) swept for
    /// the range-widening systematic.
    pub n_sigma_sweep: Vec<f64>,
    /// Window shifts swept for the range-shifting systematic.
    pub shift_sweep: Vec<f64>,
    /// Below this pt-bin index the sideband background integral is taken as
    /// zero (background negligible at low mass deviation).
    pub bkg_min_bin: usize,
    /// Same threshold for the shifted-window scan.
    pub shift_bkg_min_bin: usize,
    /// TOF mass-deviation fit range (GeV/c²).
    pub tof_fit_range: (f64, f64),
    /// TPC nσ fit range.
    pub tpc_fit_range: (f64, f64),
    /// Restricted nσ range used by non-default models at low pt.
    pub tpc_special_range: (f64, f64),
    /// pt below which the restricted range applies.
    pub special_below_pt: f64,
    /// Upper bound of the signal-yield parameter in the TOF fits.
    pub max_signal_counts: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            tof_model: FitModelKind::ExpExpTailGaus,
            tpc_models: vec![
                FitModelKind::GausGaus,
                FitModelKind::ExpGaus,
                FitModelKind::ExpTailGaus,
                FitModelKind::LognormalLognormal,
            ],
            default_tpc_model: FitModelKind::ExpGaus,
            n_sigma_sweep: vec![3.0],
            shift_sweep: vec![],
            bkg_min_bin: 8,
            shift_bkg_min_bin: 7,
            tof_fit_range: (-1.2, 1.5),
            tpc_fit_range: (-5.0, 5.0),
            tpc_special_range: (-4.0, 5.0),
            special_below_pt: 1.8,
            max_signal_counts: 5000.0,
        }
    }
}

/// Event-count normalization of the corrected spectra.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Inspected trigger (TVX) count of the data sample.
    pub n_tvx: f64,
    /// Trigger efficiency correcting the TVX count.
    pub trigger_efficiency: f64,
    /// Vertexing efficiency (kept for cross-checks).
    pub vertexing_efficiency: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self { n_tvx: 0.0, trigger_efficiency: 0.756, vertexing_efficiency: 0.921 }
    }
}

/// Input/output locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Data track table (Parquet).
    pub data_tree: String,
    /// Data histogram container produced by `analyse-data`.
    pub data_histos: String,
    /// MC track table (Parquet).
    pub mc_tree: String,
    /// MC histogram container produced by `analyse-mc`.
    pub mc_histos: String,
    /// Signal-extraction output container.
    pub signal_output: String,
    /// Systematics output container.
    pub systematics_output: String,
    /// Checkpoint output container.
    pub checkpoint_output: String,
    /// Report (JSON) output path.
    pub report_output: String,
    /// Run-metadata (JSON) output path.
    pub metadata_output: String,
    /// Skimmed track table written when `run.skim` is set.
    pub skim_output: String,
    /// Minimum-bias ("sampled") track table for the trigger cross-check.
    pub sampled_tree: String,
    /// Triggered ("skimmed") track table for the trigger cross-check.
    pub skimmed_tree: String,
    /// Event count of the sampled dataset.
    pub sampled_n_events: f64,
    /// Event count of the skimmed dataset.
    pub skimmed_n_events: f64,
}

/// The complete analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Dataset identifiers and binning.
    pub common: CommonConfig,
    /// Run-level switches.
    pub run: RunConfig,
    /// Selection thresholds.
    pub selections: SelectionConfig,
    /// Cut-family grids driving the trial scan.
    pub cuts: Vec<CutFamilyGrid>,
    /// Fit-stage settings.
    pub fit: FitConfig,
    /// Spectrum normalization.
    pub normalization: NormalizationConfig,
    /// File locations.
    pub paths: PathsConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            run: RunConfig::default(),
            selections: SelectionConfig::defaults_for(Species::He3),
            cuts: vec![
                CutFamilyGrid { family: CutFamily::NsigmaDcaZ, values: vec![6.0, 7.0, 8.0] },
                CutFamilyGrid { family: CutFamily::TpcClusters, values: vec![110.0, 120.0, 130.0] },
                CutFamilyGrid { family: CutFamily::ItsClusters, values: vec![5.0, 6.0, 7.0] },
            ],
            fit: FitConfig::default(),
            normalization: NormalizationConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Default configuration for a given species (adjusts the species-specific
    /// TOF selection defaults).
    pub fn for_species(species: Species) -> Self {
        let mut cfg = Self::default();
        cfg.run.species = species;
        cfg.selections = SelectionConfig::defaults_for(species);
        cfg
    }

    /// Validate invariants that must hold before any data is read.
    pub fn validate(&self) -> Result<()> {
        if self.common.pt_bins.len() < 2 {
            return Err(Error::Config("common.pt_bins needs at least 2 edges".into()));
        }
        if !self.common.pt_bins.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::Config("common.pt_bins must be strictly increasing".into()));
        }
        if self.common.pt_range[0] >= self.common.pt_range[1] {
            return Err(Error::Config("common.pt_range must satisfy min < max".into()));
        }
        if self.common.cent_pt_limits.is_empty() {
            return Err(Error::Config("common.cent_pt_limits must not be empty".into()));
        }
        for grid in &self.cuts {
            if grid.values.is_empty() {
                return Err(Error::Config(format!(
                    "cut family {:?} has an empty threshold list",
                    grid.family
                )));
            }
        }
        if self.fit.tpc_models.is_empty() {
            return Err(Error::Config("fit.tpc_models must not be empty".into()));
        }
        if !self.fit.tpc_models.contains(&self.fit.default_tpc_model) {
            return Err(Error::Config(format!(
                "fit.default_tpc_model {} is not among fit.tpc_models",
                self.fit.default_tpc_model.name()
            )));
        }
        Ok(())
    }

    /// Number of kinematic bins.
    pub fn n_pt_bins(&self) -> usize {
        self.common.pt_bins.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn he4_defaults_tighten_tof_cuts() {
        let cfg = AnalysisConfig::for_species(Species::He4);
        assert_eq!(cfg.selections.tof_nsigma_cut, 3.0);
        assert_eq!(cfg.selections.tof_mass_veto, 0.3);
    }

    #[test]
    fn rejects_unsorted_pt_bins() {
        let mut cfg = AnalysisConfig::default();
        cfg.common.pt_bins = vec![1.0, 0.5];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_cut_grid() {
        let mut cfg = AnalysisConfig::default();
        cfg.cuts[0].values.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = AnalysisConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: AnalysisConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.common.pt_bins, cfg.common.pt_bins);
        assert_eq!(back.fit.default_tpc_model, cfg.fit.default_tpc_model);
    }
}
