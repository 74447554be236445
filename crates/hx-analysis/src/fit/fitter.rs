//! Binned extended maximum-likelihood fitting.
//!
//! Minimizes the extended Poisson NLL of a [`Model`] against a 1-D
//! histogram with L-BFGS (More-Thuente line search, bounds by clamping)
//! and a central-difference gradient. Each call runs the optimizer twice,
//! the second pass seeded from the first. Parameter errors come from the
//! inverse of a finite-difference Hessian; a fit that does not converge is
//! reported as such, never as silent numbers.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DMatrix;

use hx_core::{Error, Result};
use hx_hist::Hist1;

use super::models::{Model, NBKG, NSIG};

/// Optimizer settings.
#[derive(Debug, Clone)]
pub struct FitterConfig {
    /// Maximum iterations per pass.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol: f64,
    /// L-BFGS history depth.
    pub m: usize,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1.0e-6, m: 10 }
    }
}

/// The fitted region: `[lo, hi]`, optionally with an excluded window
/// (sideband fits exclude the signal region).
#[derive(Debug, Clone, Copy)]
pub struct FitRange {
    /// Lower edge.
    pub lo: f64,
    /// Upper edge.
    pub hi: f64,
    /// Excluded `(lo, hi)` window, if any.
    pub exclude: Option<(f64, f64)>,
}

impl FitRange {
    /// Plain `[lo, hi]` range.
    pub fn full(lo: f64, hi: f64) -> Self {
        Self { lo, hi, exclude: None }
    }

    /// `[lo, hi]` minus the window — the sideband region.
    pub fn sidebands(lo: f64, hi: f64, window: (f64, f64)) -> Self {
        Self { lo, hi, exclude: Some(window) }
    }

    /// Whether `x` lies in the fitted region.
    pub fn includes(&self, x: f64) -> bool {
        if x < self.lo || x > self.hi {
            return false;
        }
        match self.exclude {
            Some((wlo, whi)) => x < wlo || x > whi,
            None => true,
        }
    }

    /// The fitted region as contiguous segments.
    pub fn segments(&self) -> Vec<(f64, f64)> {
        match self.exclude {
            Some((wlo, whi)) if wlo > self.lo && whi < self.hi => {
                vec![(self.lo, wlo), (whi, self.hi)]
            }
            Some((wlo, whi)) if wlo > self.lo => vec![(self.lo, wlo.min(self.hi))],
            Some((_, whi)) => vec![(whi.max(self.lo), self.hi)],
            None => vec![(self.lo, self.hi)],
        }
    }
}

/// One fitted parameter.
#[derive(Debug, Clone)]
pub struct FittedParam {
    /// Parameter name.
    pub name: &'static str,
    /// Fitted (or fixed) value.
    pub value: f64,
    /// Error from the covariance diagonal; 0 for fixed parameters.
    pub error: f64,
}

/// Result of one binned fit.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// All parameters, fitted values and errors.
    pub params: Vec<FittedParam>,
    /// Signal yield.
    pub signal_yield: f64,
    /// Signal-yield error.
    pub signal_yield_error: f64,
    /// χ²/NDF against the data errors.
    pub chi2_ndf: f64,
    /// Whether the optimizer converged.
    pub converged: bool,
    /// Number of floating parameters.
    pub n_floating: usize,
    /// NLL evaluations spent.
    pub n_fev: usize,
}

impl FitOutcome {
    /// Fitted value of a named parameter (NaN if absent).
    pub fn value(&self, name: &str) -> f64 {
        self.params.iter().find(|p| p.name == name).map_or(f64::NAN, |p| p.value)
    }
}

/// Composite-Simpson integral of `f` over `[a, b]`.
fn simpson(f: &dyn Fn(f64) -> f64, a: f64, b: f64, n: usize) -> f64 {
    if b <= a {
        return 0.0;
    }
    let n = n.max(2) & !1; // even
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let w = if i % 2 == 0 { 2.0 } else { 4.0 };
        sum += w * f(a + i as f64 * h);
    }
    sum * h / 3.0
}

struct BinDatum {
    lo: f64,
    hi: f64,
    count: f64,
}

struct NllEval<'a> {
    model: &'a Model,
    bins: Vec<BinDatum>,
    norm_segments: Vec<(f64, f64)>,
    full_range: (f64, f64),
    floating: Vec<usize>,
    base_values: Vec<f64>,
}

impl NllEval<'_> {
    fn assemble(&self, free: &[f64]) -> Vec<f64> {
        let mut values = self.base_values.clone();
        for (slot, &v) in self.floating.iter().zip(free) {
            values[*slot] = v;
        }
        values
    }

    fn norms(&self, values: &[f64]) -> (f64, f64) {
        let sig = |x: f64| self.model.signal_density(x, values);
        let bkg = |x: f64| self.model.background_density(x, values, self.full_range);
        let mut ns = 0.0;
        let mut nb = 0.0;
        for &(a, b) in &self.norm_segments {
            ns += simpson(&sig, a, b, 128);
            nb += simpson(&bkg, a, b, 128);
        }
        (ns.max(1.0e-300), nb.max(1.0e-300))
    }

    fn expected(&self, values: &[f64]) -> Vec<f64> {
        let (norm_sig, norm_bkg) = self.norms(values);
        let (n_sig, n_bkg) = (values[NSIG], values[NBKG]);
        self.bins
            .iter()
            .map(|bin| {
                let fs = simpson(&|x| self.model.signal_density(x, values), bin.lo, bin.hi, 4);
                let fb = simpson(
                    &|x| self.model.background_density(x, values, self.full_range),
                    bin.lo,
                    bin.hi,
                    4,
                );
                n_sig * fs / norm_sig + n_bkg * fb / norm_bkg
            })
            .collect()
    }

    fn nll(&self, free: &[f64]) -> f64 {
        let values = self.assemble(free);
        let expected = self.expected(&values);
        let mut nll = 0.0;
        for (bin, nu) in self.bins.iter().zip(&expected) {
            let nu = nu.max(1.0e-12);
            nll += nu - bin.count * nu.ln();
        }
        if nll.is_finite() {
            nll
        } else {
            1.0e30
        }
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

struct Problem<'a> {
    eval: &'a NllEval<'a>,
    bounds: &'a [(f64, f64)],
    counter: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(self.eval.nll(&clamp_params(p, self.bounds)))
    }
}

impl Gradient for Problem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, p: &Self::Param) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let x = clamp_params(p, self.bounds);
        let mut grad = vec![0.0; x.len()];
        for i in 0..x.len() {
            let eps = 1.0e-6 * x[i].abs().max(1.0);
            let mut plus = x.clone();
            plus[i] += eps;
            let mut minus = x.clone();
            minus[i] -= eps;
            grad[i] = (self.eval.nll(&plus) - self.eval.nll(&minus)) / (2.0 * eps);
            // zero components that would push a bound-pinned parameter outside
            if (x[i] <= self.bounds[i].0 && grad[i] > 0.0)
                || (x[i] >= self.bounds[i].1 && grad[i] < 0.0)
            {
                grad[i] = 0.0;
            }
        }
        Ok(grad)
    }
}

fn run_pass(
    eval: &NllEval<'_>,
    bounds: &[(f64, f64)],
    x0: Vec<f64>,
    cfg: &FitterConfig,
) -> Result<(Vec<f64>, bool, usize)> {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let problem = Problem { eval, bounds, counter: counter.clone() };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, cfg.m)
        .with_tolerance_grad(cfg.tol)
        .map_err(|e| Error::Computation(format!("invalid optimizer tolerance: {e}")))?;
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(clamp_params(&x0, bounds)).max_iters(cfg.max_iter))
        .run();
    match res {
        Ok(res) => {
            let state = res.state();
            let best = state
                .get_best_param()
                .map(|p| clamp_params(p, bounds))
                .unwrap_or(x0);
            let converged = matches!(
                state.get_termination_status(),
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
                    | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
            );
            let n_fev = counter.load(std::sync::atomic::Ordering::Relaxed);
            Ok((best, converged, n_fev))
        }
        // a line-search failure is a failed fit, not a pipeline error
        Err(e) => {
            tracing::debug!("optimizer pass failed: {e}");
            Ok((x0, false, 0))
        }
    }
}

/// Finite-difference Hessian of the NLL over the floating parameters.
fn hessian(eval: &NllEval<'_>, x: &[f64]) -> DMatrix<f64> {
    let n = x.len();
    let mut h = DMatrix::zeros(n, n);
    let step: Vec<f64> = x.iter().map(|v| 1.0e-4 * v.abs().max(1.0e-3)).collect();
    for i in 0..n {
        for j in i..n {
            let mut pp = x.to_vec();
            let mut pm = x.to_vec();
            let mut mp = x.to_vec();
            let mut mm = x.to_vec();
            pp[i] += step[i];
            pp[j] += step[j];
            pm[i] += step[i];
            pm[j] -= step[j];
            mp[i] -= step[i];
            mp[j] += step[j];
            mm[i] -= step[i];
            mm[j] -= step[j];
            let val = (eval.nll(&pp) - eval.nll(&pm) - eval.nll(&mp) + eval.nll(&mm))
                / (4.0 * step[i] * step[j]);
            h[(i, j)] = val;
            h[(j, i)] = val;
        }
    }
    h
}

/// Fit `model` to `hist` over `range`. Updates the model's parameter values
/// in place (so callers can read the fitted mean/width afterwards) and
/// returns the outcome. The yields start from half the in-range integral
/// unless they are fixed.
pub fn fit(
    model: &mut Model,
    hist: &Hist1,
    range: FitRange,
    cfg: &FitterConfig,
) -> Result<FitOutcome> {
    let bins: Vec<BinDatum> = (0..hist.n_bins())
        .filter(|&i| range.includes(hist.axis.bin_center(i)))
        .map(|i| BinDatum {
            lo: hist.axis.bin_low(i),
            hi: hist.axis.bin_high(i),
            count: hist.content(i),
        })
        .collect();
    if bins.is_empty() {
        return Err(Error::Computation(format!(
            "no bins of '{}' inside the fit range [{}, {}]",
            hist.name, range.lo, range.hi
        )));
    }

    let total: f64 = bins.iter().map(|b| b.count).sum();
    for slot in [NSIG, NBKG] {
        let p = &mut model.params[slot];
        if !p.fixed {
            p.value = (0.5 * total).clamp(p.lo, p.hi);
        }
    }

    let floating: Vec<usize> =
        (0..model.params.len()).filter(|&i| !model.params[i].fixed).collect();
    let bounds: Vec<(f64, f64)> =
        floating.iter().map(|&i| (model.params[i].lo, model.params[i].hi)).collect();
    let base_values: Vec<f64> = model.params.iter().map(|p| p.value).collect();

    let eval = NllEval {
        model,
        bins,
        norm_segments: range.segments(),
        full_range: (range.lo, range.hi),
        floating: floating.clone(),
        base_values,
    };

    // two passes: the first stabilizes the starting values
    let mut x: Vec<f64> = floating.iter().map(|&i| eval.model.params[i].value).collect();
    let mut converged = false;
    let mut n_fev = 0;
    for _ in 0..2 {
        let (best, ok, fev) = run_pass(&eval, &bounds, x, cfg)?;
        x = best;
        converged = ok;
        n_fev += fev;
    }

    // parameter errors from the inverse Hessian
    let mut errors = vec![0.0; floating.len()];
    if converged && !floating.is_empty() {
        let h = hessian(&eval, &x);
        match h.try_inverse() {
            Some(cov) => {
                for (k, err) in errors.iter_mut().enumerate() {
                    let var = cov[(k, k)];
                    *err = if var > 0.0 { var.sqrt() } else { f64::NAN };
                }
            }
            None => {
                tracing::warn!(hist = %hist.name, "Hessian inversion failed, using √N yield errors");
            }
        }
    }
    // fall back to Poisson-like yield errors when the covariance is unusable
    for (k, &slot) in floating.iter().enumerate() {
        if (slot == NSIG || slot == NBKG) && !errors[k].is_finite() {
            errors[k] = x[k].max(0.0).sqrt();
        } else if !errors[k].is_finite() {
            errors[k] = 0.0;
        }
    }

    let values = eval.assemble(&x);
    let expected = eval.expected(&values);

    // χ² against the data errors, NDF = included bins − floating parameters
    let mut chi2 = 0.0;
    let mut n_used = 0usize;
    for (bin, nu) in eval.bins.iter().zip(&expected) {
        if bin.count > 0.0 {
            let d = bin.count - nu;
            chi2 += d * d / bin.count;
            n_used += 1;
        }
    }
    let ndf = n_used.saturating_sub(floating.len());
    let chi2_ndf = if ndf > 0 { chi2 / ndf as f64 } else { 0.0 };

    // write fitted values back into the model
    for (k, &slot) in floating.iter().enumerate() {
        model.params[slot].value = x[k];
    }

    let params: Vec<FittedParam> = model
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| FittedParam {
            name: p.name,
            value: p.value,
            error: floating.iter().position(|&f| f == i).map_or(0.0, |k| errors[k]),
        })
        .collect();

    let signal_yield = model.params[NSIG].value;
    let signal_yield_error = params[NSIG].error;
    Ok(FitOutcome {
        params,
        signal_yield,
        signal_yield_error,
        chi2_ndf,
        converged,
        n_floating: floating.len(),
        n_fev,
    })
}

/// Expected background counts inside `window`, using the model's current
/// (fitted) parameters: `n_bkg · ∫_window f_bkg / ∫_full f_bkg`, with the
/// background normalized over the full range as in the sideband fit
/// convention.
pub fn background_window_counts(model: &Model, window: (f64, f64), full: (f64, f64)) -> f64 {
    let values: Vec<f64> = model.params.iter().map(|p| p.value).collect();
    let bkg = |x: f64| model.background_density(x, &values, full);
    let num = simpson(&bkg, window.0.max(full.0), window.1.min(full.1), 256);
    let den = simpson(&bkg, full.0, full.1, 512);
    if den <= 0.0 {
        return 0.0;
    }
    model.params[NBKG].value * num / den
}
