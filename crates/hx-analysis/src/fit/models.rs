//! Parametric signal + background models.
//!
//! Every model variant pairs a signal shape with a background shape behind
//! one interface; parameters carry a start value, a valid range and a
//! fixed/floating state. Densities are unnormalized — the fitter
//! normalizes numerically over the fitted region, and composite
//! backgrounds mix components normalized over the full fit range so the
//! mixture fraction keeps its meaning.

use hx_core::config::FitModelKind;
use statrs::function::erf::erf;

/// Index of the signal-yield parameter in every model.
pub const NSIG: usize = 0;
/// Index of the background-yield parameter in every model.
pub const NBKG: usize = 1;

/// One fit parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name.
    pub name: &'static str,
    /// Current (start or fitted) value.
    pub value: f64,
    /// Lower bound.
    pub lo: f64,
    /// Upper bound.
    pub hi: f64,
    /// Fixed parameters do not float in the fit.
    pub fixed: bool,
}

impl Param {
    fn new(name: &'static str, value: f64, lo: f64, hi: f64) -> Self {
        Self { name, value, lo, hi, fixed: false }
    }
}

/// A signal + background model with its parameter state.
#[derive(Debug, Clone)]
pub struct Model {
    /// Which shape pairing this is.
    pub kind: FitModelKind,
    /// Parameters; `params[NSIG]` and `params[NBKG]` are the yields.
    pub params: Vec<Param>,
}

impl Model {
    /// Model with the default starting values and ranges of `kind`
    /// (tuned for the TPC nσ projections).
    pub fn new(kind: FitModelKind) -> Self {
        let yields = [
            Param::new("n_sig", 500.0, 0.0, 1.0e7),
            Param::new("n_bkg", 500.0, 0.0, 1.0e7),
        ];
        let shape: Vec<Param> = match kind {
            FitModelKind::GausGaus => vec![
                Param::new("mu", 0.0, -0.5, 0.5),
                Param::new("sigma", 1.0, 0.2, 1.2),
                Param::new("mu_bkg", -7.0, -10.0, -4.0),
                Param::new("sigma_bkg", 1.0, 0.2, 6.0),
            ],
            FitModelKind::ExpGaus => vec![
                Param::new("mu", 0.0, -0.5, 0.5),
                Param::new("sigma", 1.0, 0.2, 1.2),
                Param::new("tau", -1.0, -5.0, -1.0e-5),
            ],
            FitModelKind::ExpTailGaus => vec![
                Param::new("mu", 0.0, -0.5, 0.5),
                Param::new("sigma", 1.0, 0.2, 1.2),
                Param::new("alpha", 2.0, 1.6, 3.0),
                Param::new("tau", -1.0, -10.0, -1.0e-5),
            ],
            FitModelKind::LognormalLognormal => vec![
                Param::new("mu", 0.25, 0.01, 0.5),
                Param::new("sigma", std::f64::consts::E, 1.01, 20.0),
                Param::new("mu_bkg", 0.1, 0.01, 6.0),
                Param::new("sigma_bkg", 2.0, 1.01, 20.0),
            ],
            FitModelKind::ExpExpTailGaus => vec![
                Param::new("mu", 0.1, -1.0, 1.0),
                Param::new("sigma", 0.1, 0.05, 0.40),
                Param::new("alpha", 1.2, 0.8, 3.0),
                Param::new("tau0", -2.0, -10.0, -0.5),
                Param::new("tau1", -0.1, -0.5, -0.01),
                Param::new("k_bkg", 0.5, 0.0, 1.0),
            ],
            FitModelKind::ExpChebTailGaus => vec![
                Param::new("mu", 0.1, -1.0, 1.0),
                Param::new("sigma", 0.1, 0.05, 0.40),
                Param::new("alpha", 2.0, 1.6, 3.0),
                Param::new("tau0", -3.0, -6.5, -0.5),
                Param::new("c0", -0.15, -2.0, -0.1),
                Param::new("k_bkg", 0.5, 0.0, 1.0),
            ],
        };
        let mut params = yields.to_vec();
        params.extend(shape);
        Self { kind, params }
    }

    /// The TOF mass-deviation model: exponential-tail Gaussian signal over
    /// a double-exponential background, with the signal-yield range capped.
    pub fn tof_default(kind: FitModelKind, max_signal_counts: f64) -> Self {
        let mut m = Self::new(kind);
        m.params[NSIG].hi = max_signal_counts;
        m
    }

    /// Background-only variant: the signal yield and every signal shape
    /// parameter are fixed, with the yield at zero.
    pub fn background_only(kind: FitModelKind) -> Self {
        let mut m = Self::new(kind);
        m.params[NSIG].value = 0.0;
        m.params[NSIG].fixed = true;
        for name in ["mu", "sigma", "alpha"] {
            if let Some(p) = m.param_mut(name) {
                p.fixed = true;
            }
        }
        m
    }

    /// Parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Mutable parameter by name.
    pub fn param_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    /// Current value of a named parameter (NaN if absent).
    pub fn value(&self, name: &str) -> f64 {
        self.param(name).map_or(f64::NAN, |p| p.value)
    }

    /// Set the value of a named parameter, clamped into its range.
    pub fn set(&mut self, name: &str, value: f64) {
        if let Some(p) = self.param_mut(name) {
            p.value = value.clamp(p.lo, p.hi);
        }
    }

    /// Number of floating parameters.
    pub fn n_floating(&self) -> usize {
        self.params.iter().filter(|p| !p.fixed).count()
    }

    /// Unnormalized signal density at `x` for the parameter vector `v`.
    pub fn signal_density(&self, x: f64, v: &[f64]) -> f64 {
        match self.kind {
            FitModelKind::GausGaus | FitModelKind::ExpGaus => gaussian(x, v[2], v[3]),
            FitModelKind::ExpTailGaus
            | FitModelKind::ExpExpTailGaus
            | FitModelKind::ExpChebTailGaus => gaus_exp(x, v[2], v[3], v[4]),
            FitModelKind::LognormalLognormal => lognormal(x, v[2], v[3]),
        }
    }

    /// Unnormalized background density at `x`. Composite backgrounds mix
    /// components normalized over `range`.
    pub fn background_density(&self, x: f64, v: &[f64], range: (f64, f64)) -> f64 {
        match self.kind {
            FitModelKind::GausGaus => gaussian(x, v[4], v[5]),
            FitModelKind::ExpGaus => (v[4] * x).exp(),
            FitModelKind::ExpTailGaus => (v[5] * x).exp(),
            FitModelKind::LognormalLognormal => lognormal(x, v[4], v[5]),
            FitModelKind::ExpExpTailGaus => {
                let (tau0, tau1, k) = (v[5], v[6], v[7]);
                k * exp_normalized(x, tau0, range) + (1.0 - k) * exp_normalized(x, tau1, range)
            }
            FitModelKind::ExpChebTailGaus => {
                let (tau0, c0, k) = (v[5], v[6], v[7]);
                k * exp_normalized(x, tau0, range) + (1.0 - k) * cheb_normalized(x, c0, range)
            }
        }
    }
}

/// Unit-height Gaussian.
fn gaussian(x: f64, mu: f64, sigma: f64) -> f64 {
    let t = (x - mu) / sigma;
    (-0.5 * t * t).exp()
}

/// Gaussian with an exponential tail on the high side: for
/// `(x−μ)/σ > α` the shape continues as `exp(α²/2 − α·(x−μ)/σ)`,
/// continuous and differentiable at the matching point.
fn gaus_exp(x: f64, mu: f64, sigma: f64, alpha: f64) -> f64 {
    let t = (x - mu) / sigma;
    if t <= alpha {
        (-0.5 * t * t).exp()
    } else {
        (0.5 * alpha * alpha - alpha * t).exp()
    }
}

/// Log-normal density (up to scale); zero outside its support.
fn lognormal(x: f64, median: f64, shape: f64) -> f64 {
    if x <= 0.0 || median <= 0.0 || shape <= 1.0 {
        return 0.0;
    }
    let ln_shape = shape.ln();
    let t = (x / median).ln() / ln_shape;
    (-0.5 * t * t).exp() / x
}

/// Exponential normalized to unit integral over `range`.
fn exp_normalized(x: f64, tau: f64, range: (f64, f64)) -> f64 {
    let (a, b) = range;
    let norm = if tau.abs() < 1.0e-12 {
        b - a
    } else {
        ((tau * b).exp() - (tau * a).exp()) / tau
    };
    (tau * x).exp() / norm
}

/// First-order Chebyshev background `1 + c0·T1(u)` over `range`, mapped to
/// `u ∈ [−1, 1]`, clamped at zero and normalized to unit integral.
fn cheb_normalized(x: f64, c0: f64, range: (f64, f64)) -> f64 {
    let (a, b) = range;
    let u = (2.0 * x - a - b) / (b - a);
    let val = (1.0 + c0 * u).max(0.0);
    // for |c0| ≤ 1 the linear term integrates to zero
    let norm = if c0.abs() <= 1.0 {
        b - a
    } else {
        // clamped region: integrate the positive part exactly
        let u0 = (-1.0 / c0).clamp(-1.0, 1.0);
        let (ulo, uhi) = if c0 > 0.0 { (u0, 1.0) } else { (-1.0, u0) };
        let prim = |u: f64| u + 0.5 * c0 * u * u;
        (prim(uhi) - prim(ulo)) * (b - a) / 2.0
    };
    val / norm
}

/// Gaussian integral over `[a, b]` (for closed-form cross-checks in tests).
pub fn gaussian_integral(mu: f64, sigma: f64, a: f64, b: f64) -> f64 {
    let s = sigma * std::f64::consts::SQRT_2;
    sigma * (std::f64::consts::PI / 2.0).sqrt() * (erf((b - mu) / s) - erf((a - mu) / s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn every_kind_constructs_with_yields_first() {
        for kind in [
            FitModelKind::GausGaus,
            FitModelKind::ExpGaus,
            FitModelKind::ExpTailGaus,
            FitModelKind::LognormalLognormal,
            FitModelKind::ExpExpTailGaus,
            FitModelKind::ExpChebTailGaus,
        ] {
            let m = Model::new(kind);
            assert_eq!(m.params[NSIG].name, "n_sig");
            assert_eq!(m.params[NBKG].name, "n_bkg");
            for p in &m.params {
                assert!(p.lo <= p.value && p.value <= p.hi, "{:?}/{}", kind, p.name);
            }
        }
    }

    #[test]
    fn gaus_exp_is_continuous_at_the_matching_point() {
        let (mu, sigma, alpha) = (0.1, 0.2, 1.5);
        let x0 = mu + alpha * sigma;
        let eps = 1.0e-9;
        let below = gaus_exp(x0 - eps, mu, sigma, alpha);
        let above = gaus_exp(x0 + eps, mu, sigma, alpha);
        assert_relative_eq!(below, above, epsilon = 1.0e-6);
        // tail decays slower than the Gaussian core
        assert!(gaus_exp(x0 + sigma, mu, sigma, alpha) > gaussian(x0 + sigma, mu, sigma));
    }

    #[test]
    fn background_only_freezes_the_signal() {
        let m = Model::background_only(FitModelKind::ExpExpTailGaus);
        assert_eq!(m.value("n_sig"), 0.0);
        assert!(m.param("n_sig").unwrap().fixed);
        assert!(m.param("mu").unwrap().fixed);
        assert!(m.param("sigma").unwrap().fixed);
        assert!(!m.param("n_bkg").unwrap().fixed);
        assert_eq!(m.n_floating(), 4);
    }

    #[test]
    fn double_exponential_mixes_unit_normalized_components() {
        let m = Model::new(FitModelKind::ExpExpTailGaus);
        let mut v: Vec<f64> = m.params.iter().map(|p| p.value).collect();
        let range = (-1.2, 1.5);
        // numeric integral of the mixture over the range must be 1 for any k
        for k in [0.0, 0.3, 1.0] {
            v[7] = k;
            let n = 4000;
            let step = (range.1 - range.0) / n as f64;
            let integral: f64 = (0..n)
                .map(|i| m.background_density(range.0 + (i as f64 + 0.5) * step, &v, range) * step)
                .sum();
            assert_relative_eq!(integral, 1.0, epsilon = 1.0e-3);
        }
    }

    #[test]
    fn set_clamps_into_bounds() {
        let mut m = Model::new(FitModelKind::ExpGaus);
        m.set("sigma", 50.0);
        assert_eq!(m.value("sigma"), 1.2);
        m.set("sigma", -1.0);
        assert_eq!(m.value("sigma"), 0.2);
    }

    #[test]
    fn gaussian_integral_matches_simpson() {
        let (mu, sigma) = (0.2, 0.5);
        let (a, b) = (-1.0, 1.5);
        let n = 10_000;
        let step = (b - a) / n as f64;
        let num: f64 =
            (0..n).map(|i| gaussian(a + (i as f64 + 0.5) * step, mu, sigma) * step).sum();
        assert_relative_eq!(gaussian_integral(mu, sigma, a, b), num, epsilon = 1.0e-6);
    }
}
