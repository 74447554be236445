//! Raw-yield extraction: TOF mass-deviation fits with sideband
//! bin-counting cross-checks, and TPC-only fits with the full model panel.
//!
//! Every `nuclei*` namespace of the data container is processed
//! independently and in parallel; writes happen after the parallel compute
//! completes. A fit that does not converge flags its bin as missing (the
//! bin stays empty and a warning is logged) and processing continues — only
//! a default-namespace extraction with no surviving TOF fit aborts the
//! task, since every downstream stage is normalized to it.

use rayon::prelude::*;

use hx_core::{AnalysisConfig, Error, Matter, Result};
use hx_hist::{Axis, Hist1};
use hx_io::Container;

use crate::fit::{
    background_window_counts, fit, FitOutcome, FitRange, FitterConfig, Model,
};

/// Population RMS (not sample-corrected).
fn population_rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.max(0.0).sqrt()
}

/// Snap a window to bin boundaries the way the counting is done: the left
/// edge of the bin containing `lo` and the right edge of the bin containing
/// `hi`, clamped onto the axis.
fn snapped_window(axis: &Axis, lo: f64, hi: f64) -> (usize, usize, f64, f64) {
    let last = axis.n_bins() - 1;
    let lo_bin = axis.find_bin(lo).unwrap_or(if lo < axis.low() { 0 } else { last });
    let hi_bin = axis.find_bin(hi).unwrap_or(if hi > axis.high() { last } else { 0 });
    let hi_bin = hi_bin.max(lo_bin);
    (lo_bin, hi_bin, axis.bin_low(lo_bin), axis.bin_high(hi_bin))
}

/// The per-species output histograms of one namespace.
struct SpeciesOut {
    letter: char,
    raw: Hist1,
    raw_bin_counting: Hist1,
    fit_yield: Hist1,
    fit_mu: Hist1,
    fit_sigma: Hist1,
    significance: Hist1,
    chi2: Hist1,
    chi2_tpc: Hist1,
    n_float: Hist1,
    widen: Hist1,
    shift: Hist1,
    widen_tpc: Hist1,
    shift_tpc: Hist1,
    tpc_only: Vec<Hist1>,
    converged_tof: usize,
    attempted_tof: usize,
}

fn book_species(cfg: &AnalysisConfig, pt_axis: &Axis, letter: char) -> SpeciesOut {
    let h = |name: String| Hist1::new(name, pt_axis.clone());
    SpeciesOut {
        letter,
        raw: h(format!("hRawCounts{letter}0")),
        raw_bin_counting: h(format!("hRawCountsBinCounting{letter}0")),
        fit_yield: h(format!("hSignalGausExpGaus{letter}0")),
        fit_mu: h(format!("hFitMu{letter}0")),
        fit_sigma: h(format!("hFitSigma{letter}0")),
        significance: h(format!("hSignificance{letter}0")),
        chi2: h(format!("hChiSquare{letter}0")),
        chi2_tpc: h(format!("hChiSquareTPC{letter}0")),
        n_float: h(format!("hNFloatPars{letter}0")),
        widen: h(format!("hWidenRangeSyst{letter}0")),
        shift: h(format!("hShiftRangeSyst{letter}0")),
        widen_tpc: h(format!("hWidenRangeSystTPC{letter}0")),
        shift_tpc: h(format!("hShiftRangeSystTPC{letter}0")),
        tpc_only: cfg
            .fit
            .tpc_models
            .iter()
            .map(|kind| h(format!("hTPConly{letter}0_{}", kind.name())))
            .collect(),
        converged_tof: 0,
        attempted_tof: 0,
    }
}

/// TOF extraction for one pt bin: fit, sideband cross-check, window sweeps.
fn extract_tof_bin(
    cfg: &AnalysisConfig,
    ns: &str,
    out: &mut SpeciesOut,
    dat: &Hist1,
    i_b: usize,
) -> Result<()> {
    let fitter = FitterConfig::default();
    let (lo, hi) = cfg.fit.tof_fit_range;
    let full = FitRange::full(lo, hi);

    out.attempted_tof += 1;
    let mut model = Model::tof_default(cfg.fit.tof_model, cfg.fit.max_signal_counts);
    let outcome = match fit(&mut model, dat, full, &fitter) {
        Ok(o) if o.converged => o,
        Ok(_) | Err(_) => {
            tracing::warn!(ns, bin = i_b, letter = %out.letter, "TOF fit did not converge, bin flagged");
            return Ok(());
        }
    };
    out.converged_tof += 1;

    out.raw.set_bin(i_b, outcome.signal_yield, outcome.signal_yield_error).ok();
    out.fit_yield.set_bin(i_b, outcome.signal_yield, outcome.signal_yield_error).ok();
    out.fit_mu.set_bin(i_b, outcome.value("mu"), 0.0).ok();
    out.fit_sigma.set_bin(i_b, outcome.value("sigma"), 0.0).ok();
    out.n_float.set_bin(i_b, outcome.n_floating as f64, 0.0).ok();

    let (mu, sigma) = (outcome.value("mu"), outcome.value("sigma"));

    // sideband background fit over the complement of the first counting window
    let k0 = cfg.fit.n_sigma_sweep.first().copied().unwrap_or(3.0);
    let (_, _, w0_lo, w0_hi) =
        snapped_window(&dat.axis, mu - k0 * sigma, mu + (k0 + 2.0) * sigma);
    let mut bkg_model = Model::background_only(cfg.fit.tof_model);
    let bkg_outcome: Option<FitOutcome> =
        match fit(&mut bkg_model, dat, FitRange::sidebands(lo, hi, (w0_lo, w0_hi)), &fitter) {
            Ok(o) if o.converged => Some(o),
            Ok(_) | Err(_) => {
                tracing::warn!(ns, bin = i_b, letter = %out.letter, "sideband fit did not converge");
                None
            }
        };

    // background subtraction is skipped below the configured bin index:
    // at low mass deviation the background is taken as negligible
    let subtract = i_b > cfg.fit.bkg_min_bin && bkg_outcome.is_some();
    if subtract {
        if let Some(b) = &bkg_outcome {
            out.chi2.set_bin(i_b, b.chi2_ndf, 0.0).ok();
        }
    }

    let mut residuals = Vec::with_capacity(cfg.fit.n_sigma_sweep.len());
    for (i_k, &k) in cfg.fit.n_sigma_sweep.iter().enumerate() {
        let (lo_bin, hi_bin, w_lo, w_hi) =
            snapped_window(&dat.axis, mu - k * sigma, mu + (k + 2.0) * sigma);
        let bkg = if subtract {
            background_window_counts(&bkg_model, (w_lo, w_hi), (lo, hi))
        } else {
            0.0
        };
        let tot = dat.integral(lo_bin, hi_bin);
        let sig = tot - bkg;
        if i_k == 0 {
            out.raw_bin_counting.set_bin(i_b, sig, (tot + bkg).max(0.0).sqrt()).ok();
            if tot > 0.0 {
                out.significance.set_bin(i_b, sig / tot.sqrt(), 0.0).ok();
            }
        }
        residuals.push(sig);
    }
    if outcome.signal_yield > 0.0 {
        out.widen
            .set_bin(i_b, population_rms(&residuals) / outcome.signal_yield, 0.0)
            .ok();
    }

    let mut shifted = Vec::with_capacity(cfg.fit.shift_sweep.len());
    for &delta in &cfg.fit.shift_sweep {
        let (lo_bin, hi_bin, w_lo, w_hi) =
            snapped_window(&dat.axis, mu - 3.0 * sigma - delta, mu + 5.0 * sigma - delta);
        let bkg = if i_b > cfg.fit.shift_bkg_min_bin && bkg_outcome.is_some() {
            background_window_counts(&bkg_model, (w_lo, w_hi), (lo, hi))
        } else {
            0.0
        };
        shifted.push(dat.integral(lo_bin, hi_bin) - bkg);
    }
    if !shifted.is_empty() && outcome.signal_yield > 0.0 {
        out.shift
            .set_bin(i_b, population_rms(&shifted) / outcome.signal_yield, 0.0)
            .ok();
    }
    Ok(())
}

/// TPC-only extraction for one pt bin: every configured model.
fn extract_tpc_bin(
    cfg: &AnalysisConfig,
    ns: &str,
    out: &mut SpeciesOut,
    dat: &Hist1,
    i_b: usize,
    center: f64,
) {
    let fitter = FitterConfig::default();
    for (i_t, &kind) in cfg.fit.tpc_models.iter().enumerate() {
        // non-default models use the restricted range at low pt
        let (lo, hi) = if i_t > 0 && center < cfg.fit.special_below_pt {
            cfg.fit.tpc_special_range
        } else {
            cfg.fit.tpc_fit_range
        };
        let mut model = Model::new(kind);
        match fit(&mut model, dat, FitRange::full(lo, hi), &fitter) {
            Ok(o) if o.converged => {
                out.tpc_only[i_t].set_bin(i_b, o.signal_yield, o.signal_yield_error).ok();
                if kind == cfg.fit.default_tpc_model {
                    out.chi2_tpc.set_bin(i_b, o.chi2_ndf, 0.0).ok();
                }
            }
            Ok(_) | Err(_) => {
                tracing::warn!(
                    ns,
                    bin = i_b,
                    model = kind.name(),
                    letter = %out.letter,
                    "TPC fit did not converge, bin flagged"
                );
            }
        }
    }
}

fn extract_namespace(
    cfg: &AnalysisConfig,
    data: &Container,
    ns: &str,
) -> Result<Option<[SpeciesOut; 2]>> {
    let tof_names = ["fMTOFsignal", "fATOFsignal"];
    let tpc_names = ["fMTPCcounts", "fATPCcounts"];

    // a namespace with missing inputs is a data-quality gap, not a crash
    for name in tof_names.into_iter().chain(tpc_names) {
        if data.get_h2(&format!("{ns}/{name}")).is_err() {
            tracing::warn!(ns, name, "missing input histogram, namespace skipped");
            return Ok(None);
        }
    }

    let h2 = |name: &str| {
        data.get_h2(&format!("{ns}/{name}")).map_err(|e| Error::Input(e.to_string()))
    };
    let tof = [h2(tof_names[0])?, h2(tof_names[1])?];
    let tpc = [h2(tpc_names[0])?, h2(tpc_names[1])?];

    let pt_axis = tof[0].x_axis.clone();
    let mut out = [
        book_species(cfg, &pt_axis, Matter::Matter.letter()),
        book_species(cfg, &pt_axis, Matter::Antimatter.letter()),
    ];

    for i_b in 0..pt_axis.n_bins() {
        let center = pt_axis.bin_center(i_b);
        if center < cfg.common.pt_range[0] || center > cfg.common.pt_range[1] {
            continue;
        }
        for side in 0..2 {
            if center <= cfg.common.cent_pt_limits[0] {
                let dat = tof[side]
                    .projection_y(format!("data0_{i_b}"), i_b)
                    .map_err(|e| Error::Computation(e.to_string()))?;
                extract_tof_bin(cfg, ns, &mut out[side], &dat, i_b)?;
            }
            if center < cfg.common.tpc_max_pt {
                let dat = tpc[side]
                    .projection_y(format!("tpc_data0_{i_b}"), i_b)
                    .map_err(|e| Error::Computation(e.to_string()))?;
                extract_tpc_bin(cfg, ns, &mut out[side], &dat, i_b, center);
            }
        }
    }
    Ok(Some(out))
}

fn write_species(out: &mut Container, ns: &str, dir: &str, sp: SpeciesOut) {
    let base = format!("{ns}/{dir}");
    for h in [sp.raw, sp.raw_bin_counting, sp.fit_yield, sp.fit_mu, sp.fit_sigma] {
        out.put_h1(&format!("{base}/GausExp"), h);
    }
    for h in [sp.shift, sp.widen, sp.widen_tpc, sp.shift_tpc] {
        out.put_h1(&format!("{base}/Systematic"), h);
    }
    out.put_h1(&format!("{base}/Significance"), sp.significance);
    for h in sp.tpc_only {
        out.put_h1(&format!("{base}/TPConly"), h);
    }
    for h in [sp.chi2, sp.chi2_tpc, sp.n_float] {
        out.put_h1(&format!("{base}/ChiSquare"), h);
    }
}

/// Run the signal extraction over every matching namespace of the data
/// container.
pub fn signal_task(cfg: &AnalysisConfig, data: &Container) -> Result<Container> {
    let filter = &cfg.common.filter_list_name;
    let namespaces = data.namespaces(filter);
    if namespaces.is_empty() {
        return Err(Error::Input(format!(
            "no '{filter}' namespaces in the data container"
        )));
    }

    let results: Vec<(String, Option<[SpeciesOut; 2]>)> = namespaces
        .par_iter()
        .map(|ns| extract_namespace(cfg, data, ns).map(|r| (ns.clone(), r)))
        .collect::<Result<_>>()?;

    // the default extraction is mandatory: everything downstream is
    // normalized to it
    match results.iter().find(|(ns, _)| ns == filter) {
        Some((_, Some(default))) => {
            let attempted: usize = default.iter().map(|s| s.attempted_tof).sum();
            let converged: usize = default.iter().map(|s| s.converged_tof).sum();
            if attempted > 0 && converged == 0 {
                return Err(Error::Computation(
                    "default-namespace TOF extraction failed in every bin".into(),
                ));
            }
        }
        _ => {
            return Err(Error::Input(format!(
                "default namespace '{filter}' missing or incomplete in the data container"
            )));
        }
    }

    let species = cfg.run.species;
    let dirs = [species.name(), species.anti_name()];
    let mut out = Container::new();
    for (ns, extracted) in results {
        let Some(extracted) = extracted else { continue };
        for (side, sp) in extracted.into_iter().enumerate() {
            write_species(&mut out, &ns, dirs[side], sp);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_hist::Hist2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.common.pt_bins = vec![1.5, 2.5, 3.5];
        cfg.common.pt_range = [1.4, 7.0];
        cfg.run.enable_trials = false;
        cfg
    }

    /// A data container with a clear Gaussian TPC signal and a TOF peak.
    fn synthetic_container(cfg: &AnalysisConfig, seed: u64) -> Container {
        let mut rng = StdRng::seed_from_u64(seed);
        let pt_axis = Axis::from_edges(&cfg.common.pt_bins).unwrap();
        let mut data = Container::new();
        for (tof_name, tpc_name) in
            [("fMTOFsignal", "fMTPCcounts"), ("fATOFsignal", "fATPCcounts")]
        {
            let mut tof =
                Hist2::new(tof_name, pt_axis.clone(), Axis::uniform(100, -0.9, 1.1).unwrap());
            let mut tpc =
                Hist2::new(tpc_name, pt_axis.clone(), Axis::uniform(100, -5.0, 5.0).unwrap());
            let peak = Normal::new(0.05, 0.12).unwrap();
            let ns_peak = Normal::new(0.0, 1.0).unwrap();
            for &pt in &[2.0, 3.0] {
                for _ in 0..400 {
                    tof.fill(pt, peak.sample(&mut rng));
                    tpc.fill(pt, ns_peak.sample(&mut rng));
                }
                for _ in 0..100 {
                    tof.fill(pt, rng.gen_range(-0.9..1.1));
                    tpc.fill(pt, rng.gen_range(-5.0..5.0));
                }
            }
            data.put_h2("nuclei", tof);
            data.put_h2("nuclei", tpc);
        }
        data
    }

    #[test]
    fn population_rms_matches_definition() {
        assert_eq!(population_rms(&[]), 0.0);
        assert_eq!(population_rms(&[3.0, 3.0, 3.0]), 0.0);
        // {1, 3}: mean 2, population variance 1
        approx::assert_relative_eq!(population_rms(&[1.0, 3.0]), 1.0);
    }

    #[test]
    fn snapped_window_clamps_onto_the_axis() {
        let axis = Axis::uniform(10, 0.0, 10.0).unwrap();
        let (lo_bin, hi_bin, lo, hi) = snapped_window(&axis, 2.3, 4.7);
        assert_eq!((lo_bin, hi_bin), (2, 4));
        assert_eq!((lo, hi), (2.0, 5.0));
        let (lo_bin, hi_bin, lo, hi) = snapped_window(&axis, -5.0, 50.0);
        assert_eq!((lo_bin, hi_bin), (0, 9));
        assert_eq!((lo, hi), (0.0, 10.0));
    }

    #[test]
    fn extracts_yields_from_a_synthetic_peak() {
        let cfg = config();
        let data = synthetic_container(&cfg, 42);
        let out = signal_task(&cfg, &data).unwrap();

        let raw = out.get_h1("nuclei/he3/GausExp/hRawCountsM0").unwrap();
        let bc = out.get_h1("nuclei/he3/GausExp/hRawCountsBinCountingM0").unwrap();
        for bin in 0..raw.n_bins() {
            // 400 injected signal per bin; fit and bin counting both close
            assert!(
                (raw.content(bin) - 400.0).abs() < 80.0,
                "fit yield {} in bin {bin}",
                raw.content(bin)
            );
            assert!(
                (bc.content(bin) - 400.0).abs() < 90.0,
                "bin-counting yield {} in bin {bin}",
                bc.content(bin)
            );
        }

        // TPC panel present for every configured model, with yields from the
        // well-conditioned Gaussian-signal models
        for kind in &cfg.fit.tpc_models {
            assert!(out
                .get_h1(&format!("nuclei/antihe3/TPConly/hTPConlyA0_{}", kind.name()))
                .is_ok());
        }
        for name in ["GausGaus", "ExpGaus"] {
            let h = out.get_h1(&format!("nuclei/antihe3/TPConly/hTPConlyA0_{name}")).unwrap();
            assert!((h.content(0) - 400.0).abs() < 120.0, "{name} yield {}", h.content(0));
        }

        // significance and float-parameter diagnostics filled
        assert!(out.get_h1("nuclei/he3/Significance/hSignificanceM0").unwrap().content(0) > 5.0);
        assert!(out.get_h1("nuclei/he3/ChiSquare/hNFloatParsM0").unwrap().content(0) >= 6.0);
    }

    #[test]
    fn missing_namespace_inputs_degrade_to_a_gap() {
        let cfg = config();
        let mut data = synthetic_container(&cfg, 1);
        // a trial namespace missing its TPC histogram is skipped, not fatal
        let pt_axis = Axis::from_edges(&cfg.common.pt_bins).unwrap();
        data.put_h2(
            "nuclei0",
            Hist2::new("fMTOFsignal", pt_axis.clone(), Axis::uniform(100, -0.9, 1.1).unwrap()),
        );
        let out = signal_task(&cfg, &data).unwrap();
        assert!(out.get_h1("nuclei/he3/GausExp/hRawCountsM0").is_ok());
        assert!(out.get_h1("nuclei0/he3/GausExp/hRawCountsM0").is_err());
    }

    #[test]
    fn empty_container_is_an_input_error() {
        let cfg = config();
        assert!(signal_task(&cfg, &Container::new()).is_err());
    }
}
