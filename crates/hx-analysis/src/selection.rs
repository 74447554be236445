//! Typed selection predicates.
//!
//! Selections are immutable value objects over [`DerivedTrack`]s; applying
//! one never mutates its input, and an empty result set is valid. The
//! comparison conventions are part of the physics definition of each cut
//! and are preserved exactly:
//!
//! * base: `tpc_clusters ≥ v`, `its_clusters ≥ v`, `|η| < v`, `|DCA_xy| < v`,
//!   `pt_min < pt < pt_max`
//! * primary: `tpc_clusters > v` (strict), `its_clusters ≥ v`,
//!   `|nσ_DCAz| < v`, `|DCA_xy| < v`
//! * secondary: primary with the DCAz condition inverted (`|nσ_DCAz| > v`)
//! * TPC signal window: `lo < nσ < hi` (both exclusive)

use hx_core::config::{AnalysisConfig, BaseCuts, CutFamily, PrimaryCuts, SkimCuts};
use hx_core::Species;

use crate::columns::DerivedTrack;

/// The selection state applied to one pass (data or trial variant).
#[derive(Debug, Clone)]
pub struct Selection {
    /// Species whose derived columns the predicates read.
    pub species: Species,
    /// Base track-quality thresholds.
    pub base: BaseCuts,
    /// Primary-candidate thresholds (what the trials vary).
    pub primary: PrimaryCuts,
    /// `|nσ| < v` preselection of the TOF-mass fills.
    pub tof_nsigma_cut: f64,
    /// nσ window `(lo, hi)` of the DCA template fills.
    pub tpc_window: (f64, f64),
    /// TOF-mass veto half-width.
    pub tof_mass_veto: f64,
}

impl Selection {
    /// Baseline selection from the configuration.
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        Self {
            species: cfg.run.species,
            base: cfg.selections.base.clone(),
            primary: cfg.selections.primary.clone(),
            tof_nsigma_cut: cfg.selections.tof_nsigma_cut,
            tpc_window: cfg.selections.tpc_window,
            tof_mass_veto: cfg.selections.tof_mass_veto,
        }
    }

    /// Copy with one named threshold substituted — the operation the trial
    /// scanner drives. All other thresholds keep their baseline values.
    pub fn with_cut(&self, family: CutFamily, value: f64) -> Self {
        let mut sel = self.clone();
        match family {
            CutFamily::NsigmaDcaZ => sel.primary.max_dca_z_nsigma = value,
            CutFamily::TpcClusters => sel.primary.min_tpc_clusters = value,
            CutFamily::ItsClusters => sel.primary.min_its_clusters = value,
            CutFamily::NsigmaTpc => sel.tof_nsigma_cut = value,
        }
        sel
    }

    /// Base track-quality predicate.
    pub fn passes_base(&self, t: &DerivedTrack) -> bool {
        let pt = t.pt(self.species);
        t.track.tpc_clusters >= self.base.min_tpc_clusters
            && t.its_total >= u32::from(self.base.min_its_clusters)
            && t.track.eta.abs() < self.base.max_abs_eta
            && t.track.dca_xy.abs() < self.base.max_abs_dca_xy
            && pt > self.base.pt_min
            && pt < self.base.pt_max
    }

    fn primary_tracking(&self, t: &DerivedTrack) -> bool {
        f64::from(t.track.tpc_clusters) > self.primary.min_tpc_clusters
            && f64::from(t.its_total) >= self.primary.min_its_clusters
            && t.track.dca_xy.abs() < self.primary.max_abs_dca_xy
    }

    /// Primary-candidate predicate (includes the base cuts).
    pub fn passes_primary(&self, t: &DerivedTrack) -> bool {
        self.passes_base(t)
            && self.primary_tracking(t)
            && t.nsigma_dca_z.abs() < self.primary.max_dca_z_nsigma
    }

    /// Secondary-candidate predicate: the DCAz complement of the primary one.
    pub fn passes_secondary(&self, t: &DerivedTrack) -> bool {
        self.passes_base(t)
            && self.primary_tracking(t)
            && t.nsigma_dca_z.abs() > self.primary.max_dca_z_nsigma
    }

    /// nσ window of the DCA template fills: `lo < nσ < hi`.
    pub fn in_tpc_window(&self, t: &DerivedTrack) -> bool {
        let ns = t.nsigma(self.species);
        ns > self.tpc_window.0 && ns < self.tpc_window.1
    }

    /// `|nσ| < v` preselection of the TOF-mass fills.
    pub fn tof_preselected(&self, t: &DerivedTrack) -> bool {
        t.nsigma(self.species).abs() < self.tof_nsigma_cut
    }

    /// TOF-mass veto: accepted if there is no TOF hit or `|Δm| < v`.
    pub fn good_tof_mass(&self, t: &DerivedTrack) -> bool {
        !t.track.has_tof() || t.delta_mass(self.species).abs() < self.tof_mass_veto
    }

    /// Loosened skim-export predicate (on top of the base cuts).
    pub fn passes_skim(&self, t: &DerivedTrack, skim: &SkimCuts) -> bool {
        self.passes_base(t)
            && t.nsigma_dca_z.abs() < skim.max_dca_z_nsigma
            && t.track.dca_xy.abs() < skim.max_abs_dca_xy
            && t.nsigma(self.species).abs() < skim.max_abs_nsigma
    }
}
