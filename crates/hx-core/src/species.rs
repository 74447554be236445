//! Nuclei species constants: masses, TPC energy-loss calibrations, PDG codes.

use serde::{Deserialize, Serialize};

/// Nuclear species handled by the analysis.
///
/// The TPC measures rigidity (momentum / charge); for the doubly charged
/// helium isotopes the momentum is twice the stored rigidity, which is what
/// [`Species::rigidity_factor`] encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    /// Helium-3 (Z = 2)
    He3,
    /// Triton (Z = 1), used for PID cross-checks
    Triton,
    /// Helium-4 (Z = 2)
    He4,
}

/// Five calibration constants of the parametrized energy-loss expectation.
pub type BetheBlochParams = [f64; 5];

impl Species {
    /// Nuclear mass in GeV/c².
    pub fn mass(self) -> f64 {
        match self {
            Species::He3 => 2.808_39,
            Species::Triton => 2.808_92,
            Species::He4 => 3.727_38,
        }
    }

    /// Charge factor converting stored rigidity to momentum.
    pub fn rigidity_factor(self) -> f64 {
        match self {
            Species::He3 | Species::He4 => 2.0,
            Species::Triton => 1.0,
        }
    }

    /// Calibration constants of the energy-loss expectation curve.
    pub fn bethe_bloch_params(self) -> BetheBlochParams {
        match self {
            // He4 shares the helium calibration; only the mass differs.
            Species::He3 | Species::He4 => [-321.34, 0.6539, 1.591, 0.8225, 2.363],
            Species::Triton => [-136.71, 0.441, 0.2269, 1.347, 0.8035],
        }
    }

    /// Calibration offset subtracted from the relative energy-loss deviation
    /// before normalizing by the resolution.
    pub fn nsigma_offset(self) -> f64 {
        match self {
            Species::He3 => -2.203_76e-2,
            Species::Triton | Species::He4 => 0.0,
        }
    }

    /// Relative energy-loss resolution used to normalize the deviation.
    pub fn nsigma_resolution(self) -> f64 {
        match self {
            Species::He3 => 0.055,
            Species::Triton | Species::He4 => 0.07,
        }
    }

    /// PDG code of the matter state.
    pub fn pdg_code(self) -> i32 {
        match self {
            Species::He3 => 1_000_020_030,
            Species::Triton => 1_000_010_030,
            Species::He4 => 1_000_020_040,
        }
    }

    /// Short lowercase name used in container paths.
    pub fn name(self) -> &'static str {
        match self {
            Species::He3 => "he3",
            Species::Triton => "h3",
            Species::He4 => "he4",
        }
    }

    /// Name of the antimatter state used in container paths.
    pub fn anti_name(self) -> &'static str {
        match self {
            Species::He3 => "antihe3",
            Species::Triton => "antih3",
            Species::He4 => "antihe4",
        }
    }

    /// Histogram-name suffix ("He3" / "He4") used by the MC pass.
    pub fn hist_suffix(self) -> &'static str {
        match self {
            Species::He3 => "He3",
            Species::Triton => "H3",
            Species::He4 => "He4",
        }
    }
}

/// Matter / antimatter state of a candidate, from the sign of its rigidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Matter {
    /// Positive rigidity
    Matter,
    /// Negative rigidity
    Antimatter,
}

impl Matter {
    /// Both states, matter first (the ordering used in container layouts).
    pub const BOTH: [Matter; 2] = [Matter::Matter, Matter::Antimatter];

    /// Single-letter tag used in histogram names ('M' / 'A').
    pub fn letter(self) -> char {
        match self {
            Matter::Matter => 'M',
            Matter::Antimatter => 'A',
        }
    }

    /// Container directory name for this state of `species`.
    pub fn dir_name(self, species: Species) -> &'static str {
        match self {
            Matter::Matter => species.name(),
            Matter::Antimatter => species.anti_name(),
        }
    }

    /// Whether a signed PDG code belongs to this state.
    pub fn matches_pdg(self, pdg: i32) -> bool {
        match self {
            Matter::Matter => pdg > 0,
            Matter::Antimatter => pdg < 0,
        }
    }
}
