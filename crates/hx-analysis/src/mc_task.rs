//! The Monte-Carlo histogram pass: reconstructed and generated spectra,
//! efficiency × acceptance curves (plain and spectrum-reweighted), TOF
//! matching ratios, and the pt-resolution profile, per trial.

use rayon::prelude::*;

use hx_core::{AnalysisConfig, Error, Matter, Result};
use hx_hist::{efficiency, EffMode, Axis, Hist1, Hist2};
use hx_io::{Container, TrackTable};

use crate::columns::DerivedTrack;
use crate::selection::Selection;
use crate::trials::{scan, CutGrid, Ensemble};

/// Reconstructed-level histograms of one selection state, matter first.
struct RecoHists {
    tpc: [Hist1; 2],
    tof: [Hist1; 2],
    tpc_w: [Hist1; 2],
    tof_w: [Hist1; 2],
}

/// Generated-level histograms, shared by every trial.
struct GenHists {
    gen: [Hist1; 2],
    gen_w: [Hist1; 2],
}

fn pt_axis(cfg: &AnalysisConfig) -> Result<Axis> {
    Axis::from_edges(&cfg.common.pt_bins)
        .map_err(|e| Error::Config(format!("invalid pt binning: {e}")))
}

fn book_reco(cfg: &AnalysisConfig) -> Result<RecoHists> {
    let axis = pt_axis(cfg)?;
    let suffix = cfg.run.species.hist_suffix();
    let h = |prefix: &str, weighted: bool| -> [Hist1; 2] {
        Matter::BOTH.map(|m| {
            let w = if weighted { "W" } else { "" };
            Hist1::new(format!("{prefix}{}{suffix}{w}", m.letter()), axis.clone())
        })
    };
    Ok(RecoHists {
        tpc: h("TPC", false),
        tof: h("TOF", false),
        tpc_w: h("TPC", true),
        tof_w: h("TOF", true),
    })
}

/// Whether the reconstructed candidate enters the efficiency numerator:
/// reconstructed physical primary of the right species inside the fiducial
/// region, passing the trial's tracking thresholds.
fn passes_mc_reco(cfg: &AnalysisConfig, sel: &Selection, t: &DerivedTrack) -> bool {
    let species = cfg.run.species;
    t.track.is_reconstructed()
        && t.track.is_primary()
        && t.is_species(species)
        && t.track.eta.abs() < cfg.selections.base.max_abs_eta
        && t.rapidity(species).abs() < cfg.selections.mc.max_abs_rapidity
        && f64::from(t.track.tpc_clusters) > sel.primary.min_tpc_clusters
        && f64::from(t.its_total) >= sel.primary.min_its_clusters
        && t.track.dca_z.abs() < cfg.selections.mc.max_abs_dca_z
        && t.nsigma_dca_z.abs() < sel.primary.max_dca_z_nsigma
}

fn fill_reco(
    cfg: &AnalysisConfig,
    sel: &Selection,
    tracks: &[DerivedTrack],
) -> Result<RecoHists> {
    let mut h = book_reco(cfg)?;
    let species = cfg.run.species;
    for t in tracks {
        if !passes_mc_reco(cfg, sel, t) {
            continue;
        }
        let side = match t.matter {
            Matter::Matter => 0,
            Matter::Antimatter => 1,
        };
        let pt = t.pt(species);
        let w = t.pt_weight().unwrap_or(0.0);
        h.tpc[side].fill(pt);
        h.tpc_w[side].fill_weighted(pt, w);
        if t.track.has_tof() {
            h.tof[side].fill(pt);
            h.tof_w[side].fill_weighted(pt, w);
        }
    }
    Ok(h)
}

fn fill_gen(cfg: &AnalysisConfig, tracks: &[DerivedTrack]) -> Result<GenHists> {
    let axis = pt_axis(cfg)?;
    let species = cfg.run.species;
    let suffix = species.hist_suffix();
    let mut gen = Matter::BOTH.map(|m| Hist1::new(format!("gen{}{suffix}", m.letter()), axis.clone()));
    let mut gen_w =
        Matter::BOTH.map(|m| Hist1::new(format!("gen{}{suffix}W", m.letter()), axis.clone()));
    for t in tracks {
        let Some(mc) = t.mc() else { continue };
        if !t.is_species(species) || !t.track.is_primary() {
            continue;
        }
        let Some(y_gen) = t.gen_rapidity(species) else { continue };
        if y_gen.abs() >= cfg.selections.mc.max_abs_rapidity {
            continue;
        }
        let side = if mc.pdg_code > 0 { 0 } else { 1 };
        gen[side].fill(mc.gen_pt);
        gen_w[side].fill_weighted(mc.gen_pt, t.pt_weight().unwrap_or(0.0));
    }
    Ok(GenHists { gen, gen_w })
}

/// Write one namespace: reco + gen spectra, efficiencies (binomial errors,
/// reconstructed ⊆ generated), and the TOF-matching ratios.
fn write_namespace(
    out: &mut Container,
    ns: &str,
    reco: &RecoHists,
    gen: &GenHists,
    trial: Option<usize>,
) -> Result<()> {
    let div = |num: &Hist1, den: &Hist1, name: String| -> Result<Hist1> {
        let mut eff = efficiency(num, den, EffMode::Binomial)
            .map_err(|e| Error::Computation(e.to_string()))?;
        eff.name = name;
        Ok(eff)
    };

    for side in 0..2 {
        let letter = Matter::BOTH[side].letter();
        out.put_h1(ns, gen.gen[side].clone());
        out.put_h1(ns, gen.gen_w[side].clone());
        out.put_h1(ns, reco.tpc[side].clone());
        out.put_h1(ns, reco.tof[side].clone());
        out.put_h1(ns, reco.tpc_w[side].clone());
        out.put_h1(ns, reco.tof_w[side].clone());

        let eff_tpc = div(&reco.tpc[side], &gen.gen[side], format!("effTPC{letter}"))?;
        let eff_tof = div(&reco.tof[side], &gen.gen[side], format!("effTOF{letter}"))?;
        let eff_w_tpc = div(&reco.tpc_w[side], &gen.gen_w[side], format!("WeffTPC{letter}"))?;
        let eff_w_tof = div(&reco.tof_w[side], &gen.gen_w[side], format!("WeffTOF{letter}"))?;

        if let Some(i) = trial {
            let mut matching = reco.tof[side].clone_named(format!("matchingTOF{letter}{i}"));
            matching.divide(&eff_tpc).map_err(|e| Error::Computation(e.to_string()))?;
            out.put_h1(ns, matching);
            let mut matching_w =
                reco.tof_w[side].clone_named(format!("matchingWTOF{letter}{i}"));
            matching_w.divide(&eff_w_tpc).map_err(|e| Error::Computation(e.to_string()))?;
            out.put_h1(ns, matching_w);
        }

        out.put_h1(ns, eff_tpc);
        out.put_h1(ns, eff_tof);
        out.put_h1(ns, eff_w_tpc);
        out.put_h1(ns, eff_w_tof);
    }
    Ok(())
}

/// Run the MC pass: reconstructed/generated spectra and efficiencies for
/// the default selection and every trial, plus the pt-resolution profile.
pub fn analyse_mc(cfg: &AnalysisConfig, table: &TrackTable) -> Result<Container> {
    let species = cfg.run.species;
    let baseline = Selection::from_config(cfg);
    let derived: Vec<DerivedTrack> = table
        .records()
        .par_iter()
        .map(DerivedTrack::derive)
        .filter(|t| t.is_species(species))
        .collect();
    tracing::info!(rows = derived.len(), species = species.name(), "MC pass: columns ready");

    let gen = fill_gen(cfg, &derived)?;

    // pt resolution of reconstructed candidates under the default selection
    let mut delta_pt = Hist2::new(
        format!("hDeltaPt{}", species.hist_suffix()),
        Axis::uniform(44, 0.9, 5.3).map_err(|e| Error::Computation(e.to_string()))?,
        Axis::uniform(80, -0.2, 0.2).map_err(|e| Error::Computation(e.to_string()))?,
    );
    for t in &derived {
        if passes_mc_reco(cfg, &baseline, t) {
            if let Some(dpt) = t.delta_pt(species) {
                delta_pt.fill(t.pt(species), dpt);
            }
        }
    }

    let grid = CutGrid::from_config(if cfg.run.enable_trials { &cfg.cuts } else { &[] });
    let ensemble: Ensemble<Result<RecoHists>> =
        scan(&grid, &baseline, |sel, _| fill_reco(cfg, sel, &derived));

    let mut out = Container::new();
    let filter = &cfg.common.filter_list_name;

    let default = ensemble.default?;
    let default_ns = Ensemble::<()>::namespace(filter, None);
    write_namespace(&mut out, &default_ns, &default, &gen, None)?;
    let profile = delta_pt.profile_x(&format!("hDeltaPt{}", species.hist_suffix()));
    out.put_h2(&default_ns, delta_pt);
    out.put_h1(&default_ns, profile.mean);
    out.put_h1(&default_ns, profile.spread);

    for (i, trial) in ensemble.trials.into_iter().enumerate() {
        let ns = Ensemble::<()>::namespace(filter, Some(i));
        write_namespace(&mut out, &ns, &trial?, &gen, Some(i))?;
    }
    tracing::info!(trials = grid.n_trials(), "MC pass complete");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_core::track::flag_bits;
    use hx_core::{McTruth, TrackRecord};

    fn mc_track(pt_signed: f64, reconstructed: bool, with_tof: bool) -> TrackRecord {
        let mut flags = flag_bits::IS_PRIMARY;
        if reconstructed {
            flags |= flag_bits::IS_RECONSTRUCTED;
        }
        if with_tof {
            flags |= flag_bits::HAS_TOF;
        }
        let pdg = if pt_signed > 0.0 { 1_000_020_030 } else { -1_000_020_030 };
        TrackRecord {
            pt_signed,
            eta: 0.2,
            tpc_inner_param: pt_signed.abs() * 1.2,
            tpc_signal: 700.0,
            beta: 0.9,
            dca_xy: 0.01,
            dca_z: 0.01,
            tpc_clusters: 125,
            its_cluster_map: 0x3f,
            flags,
            mc: Some(McTruth { gen_pt: 2.0 * pt_signed.abs(), gen_eta: 0.2, pdg_code: pdg }),
        }
    }

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.common.pt_bins = vec![1.0, 2.0, 3.0, 4.0];
        cfg.run.enable_trials = false;
        cfg
    }

    #[test]
    fn efficiency_counts_reconstructed_over_generated() {
        let cfg = config();
        let mut records = vec![mc_track(1.1, true, true)];
        for _ in 0..3 {
            records.push(mc_track(1.1, false, false));
        }
        let out = analyse_mc(&cfg, &TrackTable::from_records(records)).unwrap();
        let gen = out.get_h1("nuclei/genMHe3").unwrap();
        let reco = out.get_h1("nuclei/TPCMHe3").unwrap();
        let eff = out.get_h1("nuclei/effTPCM").unwrap();
        // generated entries: every primary He3 row; reconstructed: 1
        assert_eq!(gen.entries(), 4);
        assert_eq!(reco.entries(), 1);
        let bin = gen.axis.find_bin(2.2).unwrap();
        assert!((eff.content(bin) - 0.25).abs() < 1e-12);
        // binomial error at p = 1/4, N = 4
        assert!((eff.error(bin) - (0.25f64 * 0.75 / 4.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn rows_without_truth_never_enter_the_histograms() {
        let cfg = config();
        let mut t = mc_track(1.1, true, true);
        t.mc = None;
        let out = analyse_mc(&cfg, &TrackTable::from_records(vec![t])).unwrap();
        assert_eq!(out.get_h1("nuclei/genMHe3").unwrap().entries(), 0);
        assert_eq!(out.get_h1("nuclei/TPCMHe3").unwrap().entries(), 0);
    }

    #[test]
    fn weighted_efficiencies_use_the_w_prefix() {
        let cfg = config();
        let out = analyse_mc(
            &cfg,
            &TrackTable::from_records(vec![mc_track(1.1, true, true), mc_track(-1.1, true, false)]),
        )
        .unwrap();
        assert!(out.get_h1("nuclei/WeffTPCM").is_ok());
        assert!(out.get_h1("nuclei/WeffTOFA").is_ok());
        assert!(out.get_h1("nuclei/hDeltaPtHe3_mean").is_ok());
        assert!(out.get_h2("nuclei/hDeltaPtHe3").is_ok());
    }

    #[test]
    fn trials_write_matching_ratios() {
        let mut cfg = config();
        cfg.run.enable_trials = true;
        let out = analyse_mc(
            &cfg,
            &TrackTable::from_records(vec![mc_track(1.1, true, true)]),
        )
        .unwrap();
        assert!(out.get_h1("nuclei0/matchingTOFM0").is_ok());
        assert!(out.get_h1("nuclei26/matchingTOFM26").is_ok());
        assert!(out.get_h1("nuclei0/effTPCA").is_ok());
        // the default namespace has no matching ratios, as in the layout
        assert!(out.get_h1("nuclei/matchingTOFM0").is_err());
    }
}
