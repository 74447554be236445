//! Systematic-uncertainty aggregation over the trial ensemble, the
//! corrected spectra, and the trigger/sampling cross-check.
//!
//! Per kinematic bin, every trial namespace and every alternative
//! extraction model contributes the relative deviation of its corrected
//! yield from the default; the per-bin systematic is the population RMS of
//! that deviation distribution. Missing trial entries are logged and leave
//! a gap in the band instead of aborting the run.

use rayon::prelude::*;

use hx_core::{AnalysisConfig, Error, Matter, Result};
use hx_hist::{correlated_subset_ratio, Axis, Hist1, Hist2};
use hx_io::{read_tracks, Container};

use crate::columns::DerivedTrack;
use crate::selection::Selection;

fn input<T>(r: std::result::Result<T, hx_io::IoError>) -> Result<T> {
    r.map_err(|e| Error::Input(e.to_string()))
}

/// Corrected copy `raw / eff` (independent-Poisson ratio errors).
fn corrected(raw: &Hist1, eff: &Hist1, name: &str) -> Result<Hist1> {
    let mut h = raw.clone_named(name);
    h.divide(eff).map_err(|e| Error::Computation(e.to_string()))?;
    Ok(h)
}

struct SpeciesDefaults {
    eff_tpc: Hist1,
    eff_tof: Hist1,
    tpc_uncorr: Hist1,
    tof_uncorr: Hist1,
    tpc: Hist1,
    tof: Hist1,
}

fn load_defaults(
    cfg: &AnalysisConfig,
    signal: &Container,
    mc: &Container,
    dir: &str,
    letter: char,
) -> Result<SpeciesDefaults> {
    let filter = &cfg.common.filter_list_name;
    let eff_tpc = input(signal_eff(mc, filter, letter, "TPC"))?.clone();
    let eff_tof = input(signal_eff(mc, filter, letter, "TOF"))?.clone();
    let tof_uncorr = input(signal.get_h1(&format!(
        "{filter}/{dir}/GausExp/hRawCounts{letter}0"
    )))?
    .clone();
    let tpc_uncorr = input(signal.get_h1(&format!(
        "{filter}/{dir}/TPConly/hTPConly{letter}0_{}",
        cfg.fit.default_tpc_model.name()
    )))?
    .clone();
    let tpc = corrected(&tpc_uncorr, &eff_tpc, &format!("defaultTPC{dir}"))?;
    let tof = corrected(&tof_uncorr, &eff_tof, &format!("defaultTOF{dir}"))?;
    Ok(SpeciesDefaults { eff_tpc, eff_tof, tpc_uncorr, tof_uncorr, tpc, tof })
}

fn signal_eff<'a>(
    mc: &'a Container,
    ns: &str,
    letter: char,
    detector: &str,
) -> std::result::Result<&'a Hist1, hx_io::IoError> {
    mc.get_h1(&format!("{ns}/eff{detector}{letter}"))
}

/// Fill the deviation distributions of one species from every namespace.
fn fill_deviations(
    cfg: &AnalysisConfig,
    signal: &Container,
    mc: &Container,
    dir: &str,
    letter: char,
    defaults: &SpeciesDefaults,
    syst_tpc: &mut Hist2,
    syst_tof: &mut Hist2,
) {
    let filter = &cfg.common.filter_list_name;
    for ns in signal.namespaces(filter) {
        let (Ok(eff_tpc), Ok(eff_tof)) = (
            signal_eff(mc, &ns, letter, "TPC"),
            signal_eff(mc, &ns, letter, "TOF"),
        ) else {
            tracing::warn!(%ns, "missing efficiency curves, namespace left out of the band");
            continue;
        };

        for tof_name in ["hRawCounts", "hRawCountsBinCounting"] {
            let path = format!("{ns}/{dir}/GausExp/{tof_name}{letter}0");
            let Some(raw) = signal.try_h1(&path) else {
                tracing::warn!(%path, "missing TOF yields, entry left out of the band");
                continue;
            };
            let Ok(corr) = corrected(raw, eff_tof, "tmp") else { continue };
            for bin in 0..corr.n_bins() {
                let d = defaults.tof.content(bin);
                if d != 0.0 {
                    let pt = corr.axis.bin_center(bin);
                    syst_tof.fill(pt, (corr.content(bin) - d) / d);
                }
            }
        }

        for kind in &cfg.fit.tpc_models {
            let path = format!("{ns}/{dir}/TPConly/hTPConly{letter}0_{}", kind.name());
            let Some(raw) = signal.try_h1(&path) else {
                tracing::warn!(%path, "missing TPC yields, entry left out of the band");
                continue;
            };
            let Ok(corr) = corrected(raw, eff_tpc, "tmp") else { continue };
            for bin in 0..corr.n_bins() {
                let d = defaults.tpc.content(bin);
                if d != 0.0 {
                    let pt = corr.axis.bin_center(bin);
                    syst_tpc.fill(pt, (corr.content(bin) - d) / d);
                }
            }
        }
    }
}

/// Corrected spectrum with statistical or systematic errors; empty or
/// near-empty efficiency bins get the zero sentinel.
fn spectrum(
    uncorr: &Hist1,
    eff: &Hist1,
    band: Option<&Hist1>,
    name: String,
    norm: f64,
) -> Hist1 {
    let mut h = uncorr.clone_named(name);
    for bin in 0..h.n_bins() {
        let e = eff.content(bin);
        if e >= 1.0e-2 {
            let y = uncorr.content(bin) / e;
            let err = match band {
                None => uncorr.error(bin) / e,
                Some(b) => b.content(bin) * y,
            };
            let _ = h.set_bin(bin, y, err);
        } else {
            let _ = h.set_bin(bin, 0.0, 0.0);
        }
    }
    h.scale_by_width(1.0 / norm);
    h
}

/// The trigger/sampling-efficiency cross-check: normalized pt distribution
/// of the triggered (skimmed) dataset over the minimum-bias (sampled) one,
/// with correlated-subset error propagation.
fn trigger_check(cfg: &AnalysisConfig, out: &mut Container) -> Result<()> {
    let paths = &cfg.paths;
    if paths.sampled_tree.is_empty() || paths.skimmed_tree.is_empty() {
        return Ok(());
    }
    if paths.sampled_n_events <= 0.0 || paths.skimmed_n_events <= 0.0 {
        return Err(Error::Config(
            "trigger cross-check needs positive sampled/skimmed event counts".into(),
        ));
    }
    let species = cfg.run.species;
    let sel = Selection::from_config(cfg);
    let axis = Axis::from_edges(&cfg.common.pt_bins)
        .map_err(|e| Error::Config(format!("invalid pt binning: {e}")))?;

    let fill = |path: &str, name: &str, n_events: f64| -> Result<Hist1> {
        let table = input(read_tracks(path, false))?;
        let mut h = Hist1::new(name, axis.clone());
        let derived: Vec<DerivedTrack> =
            table.records().par_iter().map(DerivedTrack::derive).collect();
        for t in &derived {
            let ns = t.nsigma(species);
            if t.matter == Matter::Antimatter
                && sel.passes_primary(t)
                && ns > -2.0
                && ns < 3.0
            {
                h.fill(t.pt(species));
            }
        }
        h.scale(1.0 / n_events);
        Ok(h)
    };

    let sampled = fill(&paths.sampled_tree, "hPtDist_sampled", paths.sampled_n_events)?;
    let skimmed = fill(&paths.skimmed_tree, "hPtDist_skimmed", paths.skimmed_n_events)?;
    let mut ratio = correlated_subset_ratio(&sampled, &skimmed)
        .map_err(|e| Error::Computation(e.to_string()))?;
    ratio.name = "hTriggerEfficiency".into();
    out.put_h1("", sampled);
    out.put_h1("", skimmed);
    out.put_h1("", ratio);
    Ok(())
}

/// Aggregate the trial ensemble into the systematic band and produce the
/// corrected spectra.
pub fn systematics_task(
    cfg: &AnalysisConfig,
    signal: &Container,
    mc: &Container,
) -> Result<Container> {
    let norm = cfg.normalization.n_tvx / cfg.normalization.trigger_efficiency;
    if !(norm > 0.0) {
        return Err(Error::Config(format!(
            "invalid event normalization: n_tvx = {}, trigger_efficiency = {}",
            cfg.normalization.n_tvx, cfg.normalization.trigger_efficiency
        )));
    }

    let species = cfg.run.species;
    let dirs = [species.name(), species.anti_name()];
    let pt_axis = Axis::from_edges(&cfg.common.pt_bins)
        .map_err(|e| Error::Config(format!("invalid pt binning: {e}")))?;
    let dev_axis =
        Axis::uniform(50, -0.5, 0.5).map_err(|e| Error::Computation(e.to_string()))?;

    let mut out = Container::new();

    for (side, matter) in Matter::BOTH.into_iter().enumerate() {
        let dir = dirs[side];
        let letter = matter.letter();
        let defaults = load_defaults(cfg, signal, mc, dir, letter)?;

        let mut syst_tpc =
            Hist2::new(format!("systTPC{dir}"), pt_axis.clone(), dev_axis.clone());
        let mut syst_tof =
            Hist2::new(format!("systTOF{dir}"), pt_axis.clone(), dev_axis.clone());
        fill_deviations(
            cfg, signal, mc, dir, letter, &defaults, &mut syst_tpc, &mut syst_tof,
        );

        // the band: population RMS of the per-bin deviation distribution
        let mut band_tpc = Hist1::new(format!("hSystTPC{letter}"), pt_axis.clone());
        let mut band_tof = Hist1::new(format!("hSystTOF{letter}"), pt_axis.clone());
        for bin in 0..pt_axis.n_bins() {
            let tpc_slice = syst_tpc
                .projection_y("slice", bin)
                .map_err(|e| Error::Computation(e.to_string()))?;
            let tof_slice = syst_tof
                .projection_y("slice", bin)
                .map_err(|e| Error::Computation(e.to_string()))?;
            let _ = band_tpc.set_bin(bin, tpc_slice.rms(), 0.0);
            let _ = band_tof.set_bin(bin, tof_slice.rms(), 0.0);
        }

        let mut matching = defaults.tof_uncorr.clone_named(format!("TOFmatching{dir}"));
        matching
            .divide(&defaults.tpc_uncorr)
            .map_err(|e| Error::Computation(e.to_string()))?;

        out.put_h1(
            "",
            spectrum(&defaults.tpc_uncorr, &defaults.eff_tpc, None, format!("fStatTPC{letter}"), norm),
        );
        out.put_h1(
            "",
            spectrum(
                &defaults.tpc_uncorr,
                &defaults.eff_tpc,
                Some(&band_tpc),
                format!("fSystTPC{letter}"),
                norm,
            ),
        );
        out.put_h1(
            "",
            spectrum(&defaults.tof_uncorr, &defaults.eff_tof, None, format!("fStatTOF{letter}"), norm),
        );
        out.put_h1(
            "",
            spectrum(
                &defaults.tof_uncorr,
                &defaults.eff_tof,
                Some(&band_tof),
                format!("fSystTOF{letter}"),
                norm,
            ),
        );
        out.put_h2("", syst_tpc);
        out.put_h2("", syst_tof);
        out.put_h1("", band_tpc);
        out.put_h1("", band_tof);
        out.put_h1("", matching);
    }

    trigger_check(cfg, &mut out)?;
    Ok(out)
}
