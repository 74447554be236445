//! Derived per-track quantities.
//!
//! Pure, total functions of a [`TrackRecord`]; none of them mutates the
//! source record. Values that would be NaN/∞ for degenerate inputs (TOF
//! mass at β ≈ 0) saturate to sentinels so histogram fills stay finite.

use hx_core::{Matter, McTruth, Species, TrackRecord};

/// TOF-mass sentinel for β below the measurable range.
pub const TOF_MASS_SATURATED: f64 = 1.0e9;

/// Normalization of the Monte-Carlo spectrum reweighting.
const PT_WEIGHT_NORM: f64 = 5.04194 / 1.364_505_4;
/// Inverse slope of the Monte-Carlo spectrum reweighting.
const PT_WEIGHT_SLOPE: f64 = 1.359_34;

/// Parametrized energy-loss expectation as a function of βγ.
pub fn bethe_bloch(bg: f64, k: [f64; 5]) -> f64 {
    let [k1, k2, k3, k4, k5] = k;
    let beta = bg / (1.0 + bg * bg).sqrt();
    let aa = beta.powf(k4);
    let bb = (k3 + bg.powf(-k5)).ln();
    (k2 - aa - bb) * k1 / aa
}

/// Expected TPC signal for `species` at the given inner-wall rigidity.
pub fn expected_tpc_signal(species: Species, rigidity: f64) -> f64 {
    let bg = rigidity * species.rigidity_factor() / species.mass();
    bethe_bloch(bg, species.bethe_bloch_params())
}

/// Normalized TPC energy-loss deviation:
/// `(signal / expected − 1 − offset) / resolution`.
///
/// Doubling the resolution constant halves the magnitude for a fixed
/// numerator.
pub fn nsigma_tpc(species: Species, rigidity: f64, signal: f64) -> f64 {
    let expected = expected_tpc_signal(species, rigidity);
    (signal / expected - 1.0 - species.nsigma_offset()) / species.nsigma_resolution()
}

/// TOF mass from rigidity, charge factor and β.
///
/// Saturates to [`TOF_MASS_SATURATED`] for β below threshold and to 0 for
/// unphysical β ≥ 1, instead of producing ∞/NaN.
pub fn tof_mass(rigidity: f64, charge_factor: f64, beta: f64) -> f64 {
    if beta < 1.0e-3 {
        TOF_MASS_SATURATED
    } else if beta >= 1.0 {
        0.0
    } else {
        rigidity * charge_factor * (1.0 / (beta * beta) - 1.0).sqrt()
    }
}

/// Empirical corrected transverse momentum for `species` from the
/// charge-corrected raw value.
pub fn corrected_pt(species: Species, pt_uncorr: f64) -> f64 {
    match species {
        Species::He3 => pt_uncorr + 0.034_355_4 + 0.961_61 * (-1.512_86 * pt_uncorr).exp(),
        Species::He4 => {
            let step1 = pt_uncorr + 0.041_960_8 + 1.758_61 * (-1.4019 * pt_uncorr).exp();
            step1 + 0.003_852_23 - 0.442_353 * (-1.590_49 * step1).exp()
        }
        Species::Triton => pt_uncorr,
    }
}

/// Transverse impact-parameter resolution at `pt`, in cm.
pub fn dca_xy_resolution(pt: f64) -> f64 {
    let inv_pt = 1.0 / pt;
    7.627_83e-4 + 4.593_26e-3 * inv_pt + 6.891_63e-3 * inv_pt * inv_pt
}

/// Longitudinal impact-parameter resolution at `pt`, in cm.
pub fn dca_z_resolution(pt: f64) -> f64 {
    let inv_pt = 1.0 / pt;
    5.0e-4 + 8.736_90e-3 * inv_pt + 9.623_29e-4 * inv_pt * inv_pt
}

/// Inner-tracker cluster counts from the 7-bit presence map:
/// (innermost-barrel count over bits 0-2, total count over bits 0-6).
pub fn its_clusters(map: u32) -> (u32, u32) {
    let inner = (map & 0b111).count_ones();
    let total = (map & 0b111_1111).count_ones();
    (inner, total)
}

/// Rapidity at mass `m` from transverse momentum and pseudorapidity.
pub fn rapidity(pt: f64, mass: f64, eta: f64) -> f64 {
    (pt / pt.hypot(mass) * eta.sinh()).asinh()
}

/// Monte-Carlo spectrum reweighting at the generated pt.
pub fn pt_weight(gen_pt: f64) -> f64 {
    PT_WEIGHT_NORM * gen_pt * (-PT_WEIGHT_SLOPE * gen_pt).exp()
}

/// A track record plus its derived quantities.
#[derive(Debug, Clone)]
pub struct DerivedTrack {
    /// Source record.
    pub track: TrackRecord,
    /// Matter/antimatter state (sign of the rigidity).
    pub matter: Matter,
    /// Charge-corrected raw pt for charge-2 species (`2·|pt_signed|`).
    pub pt_uncorr: f64,
    /// Corrected pt for helium-3.
    pub pt_he3: f64,
    /// Corrected pt for helium-4.
    pub pt_he4: f64,
    /// TOF mass at the charge-2 rigidity (sentinel-saturated).
    pub tof_mass: f64,
    /// TPC deviation per species.
    pub nsigma_he3: f64,
    /// TPC deviation for tritons.
    pub nsigma_h3: f64,
    /// TPC deviation for helium-4.
    pub nsigma_he4: f64,
    /// Innermost-barrel inner-tracker cluster count.
    pub its_inner: u32,
    /// Total inner-tracker cluster count.
    pub its_total: u32,
    /// Transverse DCA significance.
    pub nsigma_dca_xy: f64,
    /// Longitudinal DCA significance.
    pub nsigma_dca_z: f64,
}

impl DerivedTrack {
    /// Compute every derived quantity of one record.
    pub fn derive(track: &TrackRecord) -> Self {
        let matter = if track.pt_signed > 0.0 { Matter::Matter } else { Matter::Antimatter };
        let pt_uncorr = 2.0 * track.pt_signed.abs();
        let pt_he3 = corrected_pt(Species::He3, pt_uncorr);
        let (its_inner, its_total) = its_clusters(track.its_cluster_map);
        Self {
            track: *track,
            matter,
            pt_uncorr,
            pt_he3,
            pt_he4: corrected_pt(Species::He4, pt_uncorr),
            tof_mass: tof_mass(track.tpc_inner_param, 2.0, track.beta),
            nsigma_he3: nsigma_tpc(Species::He3, track.tpc_inner_param, track.tpc_signal),
            nsigma_h3: nsigma_tpc(Species::Triton, track.tpc_inner_param, track.tpc_signal),
            nsigma_he4: nsigma_tpc(Species::He4, track.tpc_inner_param, track.tpc_signal),
            its_inner,
            its_total,
            nsigma_dca_xy: track.dca_xy / dca_xy_resolution(pt_he3),
            nsigma_dca_z: track.dca_z / dca_z_resolution(pt_he3),
        }
    }

    /// Corrected pt for the analysed species.
    pub fn pt(&self, species: Species) -> f64 {
        match species {
            Species::He3 => self.pt_he3,
            Species::He4 => self.pt_he4,
            Species::Triton => self.track.pt_signed.abs(),
        }
    }

    /// TPC deviation for the analysed species.
    pub fn nsigma(&self, species: Species) -> f64 {
        match species {
            Species::He3 => self.nsigma_he3,
            Species::Triton => self.nsigma_h3,
            Species::He4 => self.nsigma_he4,
        }
    }

    /// TOF mass deviation `m_TOF − m_species`.
    pub fn delta_mass(&self, species: Species) -> f64 {
        self.tof_mass - species.mass()
    }

    /// Candidate rapidity at the species mass.
    pub fn rapidity(&self, species: Species) -> f64 {
        rapidity(self.pt(species), species.mass(), self.track.eta)
    }

    /// Generated-particle rapidity at the species mass (MC only).
    pub fn gen_rapidity(&self, species: Species) -> Option<f64> {
        self.track.mc.map(|mc| rapidity(mc.gen_pt, species.mass(), mc.gen_eta))
    }

    /// Whether the generated particle is `species` (either charge state).
    pub fn is_species(&self, species: Species) -> bool {
        self.track.mc.is_some_and(|mc| mc.pdg_code.abs() == species.pdg_code())
    }

    /// MC truth, if present.
    pub fn mc(&self) -> Option<&McTruth> {
        self.track.mc.as_ref()
    }

    /// `pt_rec − pt_gen` (MC only).
    pub fn delta_pt(&self, species: Species) -> Option<f64> {
        self.track.mc.map(|mc| self.pt(species) - mc.gen_pt)
    }

    /// Spectrum reweighting at the generated pt (MC only).
    pub fn pt_weight(&self) -> Option<f64> {
        self.track.mc.map(|mc| pt_weight(mc.gen_pt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hx_core::track::flag_bits;

    fn track() -> TrackRecord {
        TrackRecord {
            pt_signed: 1.1,
            eta: 0.2,
            tpc_inner_param: 1.1,
            tpc_signal: 700.0,
            beta: 0.93,
            dca_xy: 0.01,
            dca_z: 0.02,
            tpc_clusters: 125,
            its_cluster_map: 0b0000_0111,
            flags: flag_bits::HAS_TOF,
            mc: None,
        }
    }

    #[test]
    fn cluster_count_popcounts() {
        assert_eq!(its_clusters(0b0000_0111), (3, 3));
        assert_eq!(its_clusters(0b0111_1111), (3, 7));
        assert_eq!(its_clusters(0b0100_1000), (0, 2));
        let (inner, total) = its_clusters(0b0111_1111);
        assert_eq!(inner + total, 10);
    }

    #[test]
    fn nsigma_scales_inversely_with_resolution() {
        // (ratio − 1 − offset) is the fixed numerator; doubling the
        // resolution constant must halve the returned magnitude.
        let num = 700.0 / expected_tpc_signal(Species::He3, 1.1) - 1.0
            - Species::He3.nsigma_offset();
        let ns = nsigma_tpc(Species::He3, 1.1, 700.0);
        assert_relative_eq!(ns, num / Species::He3.nsigma_resolution(), epsilon = 1e-12);
        assert_relative_eq!(
            num / (2.0 * Species::He3.nsigma_resolution()),
            ns / 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn nsigma_is_continuous_in_momentum() {
        let mut prev = nsigma_tpc(Species::He3, 0.5, 700.0);
        for i in 1..200 {
            let p = 0.5 + i as f64 * 0.02;
            let cur = nsigma_tpc(Species::He3, p, 700.0);
            assert!((cur - prev).abs() < 5.0, "jump at p = {p}");
            prev = cur;
        }
    }

    #[test]
    fn tof_mass_saturates_instead_of_nan() {
        assert_eq!(tof_mass(1.0, 2.0, 0.0), TOF_MASS_SATURATED);
        assert_eq!(tof_mass(1.0, 2.0, 1.0), 0.0);
        assert_eq!(tof_mass(1.0, 2.0, 1.5), 0.0);
        let m = tof_mass(1.3, 2.0, 0.68);
        assert!(m.is_finite() && m > 0.0);
    }

    #[test]
    fn tof_mass_recovers_the_mass_of_an_ideal_track() {
        // p = m·βγ ⇒ m_tof = p·sqrt(1/β² − 1) = m
        let mass = Species::He3.mass();
        let beta: f64 = 0.8;
        let gamma = 1.0 / (1.0f64 - beta * beta).sqrt();
        let momentum = mass * beta * gamma;
        assert_relative_eq!(tof_mass(momentum / 2.0, 2.0, beta), mass, epsilon = 1e-9);
    }

    #[test]
    fn matter_flag_follows_rigidity_sign() {
        let mut t = track();
        assert_eq!(DerivedTrack::derive(&t).matter, Matter::Matter);
        t.pt_signed = -t.pt_signed;
        assert_eq!(DerivedTrack::derive(&t).matter, Matter::Antimatter);
    }

    #[test]
    fn corrected_pt_adds_exponential_tail() {
        let pt_u = 2.2;
        let pt = corrected_pt(Species::He3, pt_u);
        assert!(pt > pt_u);
        // the correction decays with pt
        assert!(
            corrected_pt(Species::He3, 4.0) - 4.0 < pt - pt_u,
            "correction must shrink with pt"
        );
    }

    #[test]
    fn dca_significance_uses_pt_dependent_resolution() {
        let d = DerivedTrack::derive(&track());
        assert_relative_eq!(
            d.nsigma_dca_xy,
            0.01 / dca_xy_resolution(d.pt_he3),
            epsilon = 1e-12
        );
        assert_relative_eq!(d.nsigma_dca_z, 0.02 / dca_z_resolution(d.pt_he3), epsilon = 1e-12);
    }

    #[test]
    fn mc_accessors() {
        let mut t = track();
        t.mc = Some(McTruth { gen_pt: 2.0, gen_eta: 0.2, pdg_code: -1_000_020_030 });
        let d = DerivedTrack::derive(&t);
        assert!(d.is_species(Species::He3));
        assert!(!d.is_species(Species::He4));
        assert_relative_eq!(d.pt_weight().unwrap(), pt_weight(2.0));
        assert!(d.gen_rapidity(Species::He3).unwrap().abs() < 0.2);
    }
}
