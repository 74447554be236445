//! The data histogram pass: derived columns, selection, and the
//! trial-scanned histogram fills.

use rayon::prelude::*;

use hx_core::{AnalysisConfig, Error, Matter, Result};
use hx_hist::{Axis, Hist2};
use hx_io::{write_tracks, Container, TrackTable};

use crate::columns::DerivedTrack;
use crate::selection::Selection;
use crate::trials::{scan, CutGrid, Ensemble};

/// The histogram set of one selection state, matter first.
struct PassHists {
    tpc: [Hist2; 2],
    tof: [Hist2; 2],
    dca_xy: [Hist2; 2],
    dca_z: [Hist2; 2],
    dca_xy_secondary: Option<[Hist2; 2]>,
}

fn book(cfg: &AnalysisConfig, with_secondary: bool) -> Result<PassHists> {
    let pt_axis = Axis::from_edges(&cfg.common.pt_bins)
        .map_err(|e| Error::Config(format!("invalid pt binning: {e}")))?;
    let nsigma_axis =
        Axis::uniform(100, -5.0, 5.0).map_err(|e| Error::Computation(e.to_string()))?;
    let dmass_axis =
        Axis::uniform(100, -0.9, 1.1).map_err(|e| Error::Computation(e.to_string()))?;
    let dca_axis =
        Axis::uniform(100, -0.2, 0.2).map_err(|e| Error::Computation(e.to_string()))?;
    let suffix = cfg.run.species.hist_suffix();

    let per_matter = |prefix: &str, tag: &str, y: &Axis| -> [Hist2; 2] {
        Matter::BOTH.map(|m| {
            let l = m.letter();
            Hist2::new(format!("{prefix}{l}{tag}"), pt_axis.clone(), y.clone())
        })
    };

    Ok(PassHists {
        tpc: Matter::BOTH.map(|m| {
            Hist2::new(format!("f{}TPCcounts", m.letter()), pt_axis.clone(), nsigma_axis.clone())
        }),
        tof: Matter::BOTH.map(|m| {
            Hist2::new(format!("f{}TOFsignal", m.letter()), pt_axis.clone(), dmass_axis.clone())
        }),
        dca_xy: per_matter("hDCAxy", suffix, &dca_axis),
        dca_z: per_matter("hDCAz", suffix, &dca_axis),
        dca_xy_secondary: with_secondary
            .then(|| per_matter("hDCAxySecondary", suffix, &dca_axis)),
    })
}

fn fill_pass(
    cfg: &AnalysisConfig,
    sel: &Selection,
    tracks: &[DerivedTrack],
    with_secondary: bool,
) -> Result<PassHists> {
    let mut h = book(cfg, with_secondary)?;
    let species = cfg.run.species;
    for t in tracks {
        let side = match t.matter {
            Matter::Matter => 0,
            Matter::Antimatter => 1,
        };
        let pt = t.pt(species);
        if sel.passes_primary(t) {
            if sel.in_tpc_window(t) && sel.good_tof_mass(t) {
                h.dca_xy[side].fill(pt, t.track.dca_xy);
                h.dca_z[side].fill(pt, t.track.dca_z);
            }
            if sel.good_tof_mass(t) {
                h.tpc[side].fill(pt, t.nsigma(species));
            }
            if sel.tof_preselected(t) {
                h.tof[side].fill(pt, t.delta_mass(species));
            }
        } else if let Some(secondary) = h.dca_xy_secondary.as_mut() {
            if sel.passes_secondary(t) && sel.in_tpc_window(t) && sel.good_tof_mass(t) {
                secondary[side].fill(pt, t.track.dca_xy);
            }
        }
    }
    Ok(h)
}

fn write_pass(out: &mut Container, ns: &str, hists: PassHists) {
    for h in hists.tpc.into_iter().chain(hists.tof) {
        out.put_h2(ns, h);
    }
    for h in hists.dca_xy.into_iter().chain(hists.dca_z) {
        out.put_h2(ns, h);
    }
    if let Some(secondary) = hists.dca_xy_secondary {
        for h in secondary {
            out.put_h2(ns, h);
        }
    }
}

/// Run the data pass: one default histogram set plus one per trial, written
/// under `nuclei` / `nuclei<i>` namespaces with identical object names.
pub fn analyse_data(cfg: &AnalysisConfig, table: &TrackTable) -> Result<Container> {
    let baseline = Selection::from_config(cfg);
    let derived: Vec<DerivedTrack> =
        table.records().par_iter().map(DerivedTrack::derive).collect();
    tracing::info!(
        rows = derived.len(),
        species = cfg.run.species.name(),
        "data pass: derived columns ready"
    );

    if cfg.run.skim && !cfg.paths.skim_output.is_empty() {
        let skimmed: Vec<_> = derived
            .iter()
            .filter(|t| baseline.passes_skim(t, &cfg.selections.skim))
            .map(|t| t.track)
            .collect();
        tracing::info!(rows = skimmed.len(), path = %cfg.paths.skim_output, "writing skim");
        write_tracks(&cfg.paths.skim_output, &TrackTable::from_records(skimmed))
            .map_err(|e| Error::Input(e.to_string()))?;
    }

    let grid = CutGrid::from_config(if cfg.run.enable_trials { &cfg.cuts } else { &[] });
    // only the default namespace carries the secondary-template histograms
    let ensemble: Ensemble<Result<PassHists>> = scan(&grid, &baseline, |sel, index| {
        fill_pass(cfg, sel, &derived, index.is_none())
    });

    let mut out = Container::new();
    let filter = &cfg.common.filter_list_name;
    write_pass(&mut out, &Ensemble::<()>::namespace(filter, None), ensemble.default?);
    for (i, trial) in ensemble.trials.into_iter().enumerate() {
        write_pass(&mut out, &Ensemble::<()>::namespace(filter, Some(i)), trial?);
    }
    tracing::info!(trials = grid.n_trials(), "data pass complete");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_core::{McTruth, Species, TrackRecord};

    /// A clean helium-3 candidate at the given signed rigidity.
    pub(crate) fn he3_track(pt_signed: f64, nsigma_target: f64) -> TrackRecord {
        // invert the nσ definition to place the candidate at a chosen deviation
        let rigidity = pt_signed.abs() * 1.2;
        let expected = crate::columns::expected_tpc_signal(Species::He3, rigidity);
        let offset = Species::He3.nsigma_offset();
        let res = Species::He3.nsigma_resolution();
        let signal = expected * (1.0 + offset + nsigma_target * res);
        TrackRecord {
            pt_signed,
            eta: 0.3,
            tpc_inner_param: rigidity,
            tpc_signal: signal,
            beta: 0.0, // no TOF information
            dca_xy: 0.01,
            dca_z: 0.01,
            tpc_clusters: 125,
            its_cluster_map: 0x3f,
            flags: 0,
            mc: None,
        }
    }

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.common.pt_bins = vec![1.0, 2.0, 3.0, 4.0];
        cfg
    }

    #[test]
    fn default_namespace_carries_all_histograms() {
        let cfg = config();
        let table = TrackTable::from_records(vec![he3_track(1.1, 0.0), he3_track(-1.1, 0.5)]);
        let out = analyse_data(&cfg, &table).unwrap();
        for name in
            ["fMTPCcounts", "fATPCcounts", "fMTOFsignal", "fATOFsignal", "hDCAxyMHe3", "hDCAzAHe3"]
        {
            assert!(out.get_h2(&format!("nuclei/{name}")).is_ok(), "missing {name}");
        }
        assert!(out.get_h2("nuclei/hDCAxySecondaryMHe3").is_ok());
        // trials exist with identical object names and no secondary templates
        assert!(out.get_h2("nuclei0/fATPCcounts").is_ok());
        assert!(out.get_h2("nuclei26/fATPCcounts").is_ok());
        assert!(out.get_h2("nuclei0/hDCAxySecondaryMHe3").is_err());
        assert_eq!(out.namespaces("nuclei").len(), 28);
    }

    #[test]
    fn matter_and_antimatter_fill_their_own_histograms() {
        let cfg = config();
        let table = TrackTable::from_records(vec![
            he3_track(1.1, 0.0),
            he3_track(1.1, 0.0),
            he3_track(-1.1, 0.0),
        ]);
        let out = analyse_data(&cfg, &table).unwrap();
        let matter = out.get_h2("nuclei/fMTPCcounts").unwrap();
        let anti = out.get_h2("nuclei/fATPCcounts").unwrap();
        assert_eq!(matter.entries(), 2);
        assert_eq!(anti.entries(), 1);
    }

    #[test]
    fn trials_are_disabled_by_config() {
        let mut cfg = config();
        cfg.run.enable_trials = false;
        let table = TrackTable::from_records(vec![he3_track(1.1, 0.0)]);
        let out = analyse_data(&cfg, &table).unwrap();
        assert_eq!(out.namespaces("nuclei"), vec!["nuclei"]);
    }

    #[test]
    fn loose_trials_select_at_least_as_many_rows() {
        let cfg = config();
        // one track passing only the loosest cluster threshold
        let mut borderline = he3_track(1.1, 0.0);
        borderline.tpc_clusters = 115;
        let table = TrackTable::from_records(vec![he3_track(1.1, 0.0), borderline]);
        let out = analyse_data(&cfg, &table).unwrap();
        // trial 0: (dcaz 6, tpc > 110, its ≥ 5) accepts both tracks
        let loose = out.get_h2("nuclei0/fMTPCcounts").unwrap();
        // trial 3: (dcaz 6, tpc > 120, its ≥ 5) drops the 115-cluster track
        let tight = out.get_h2("nuclei3/fMTPCcounts").unwrap();
        assert_eq!(loose.entries(), 2);
        assert_eq!(tight.entries(), 1);
    }

    #[test]
    fn mc_flagged_tracks_do_not_leak_into_data_histograms() {
        let cfg = config();
        let mut t = he3_track(1.1, 0.0);
        t.mc = Some(McTruth { gen_pt: 1.0, gen_eta: 0.2, pdg_code: 1_000_020_030 });
        let out = analyse_data(&cfg, &TrackTable::from_records(vec![t])).unwrap();
        // MC truth is ignored by the data pass, the track still fills
        assert_eq!(out.get_h2("nuclei/fMTPCcounts").unwrap().entries(), 1);
    }
}
