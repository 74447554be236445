//! End-to-end parameter recovery on a synthetic track stream: data pass,
//! signal extraction, MC efficiencies, systematics and checkpoint, chained
//! through saved containers exactly like the CLI tasks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use hx_analysis::{checkpoint, data_task, mc_task, report, signal, systematics};
use hx_core::config::FitModelKind;
use hx_core::track::flag_bits;
use hx_core::{AnalysisConfig, McTruth, Species, TrackRecord};
use hx_io::{Container, TrackTable};

fn config() -> AnalysisConfig {
    let mut cfg = AnalysisConfig::default();
    cfg.common.pt_bins = vec![1.5, 2.5, 3.5];
    cfg.common.pt_range = [1.4, 7.0];
    cfg.run.enable_trials = false;
    cfg.normalization.n_tvx = 1.0e6;
    cfg
}

/// A helium-3 candidate at a chosen TPC deviation and TOF mass deviation.
fn candidate(pt_signed: f64, nsigma: f64, delta_mass: f64) -> TrackRecord {
    let rigidity = pt_signed.abs() * 1.15;
    let expected = hx_analysis::columns::expected_tpc_signal(Species::He3, rigidity);
    let offset = Species::He3.nsigma_offset();
    let res = Species::He3.nsigma_resolution();
    let signal = expected * (1.0 + offset + nsigma * res);
    // β that reproduces the requested TOF mass at this rigidity
    let momentum = 2.0 * rigidity;
    let mass = Species::He3.mass() + delta_mass;
    let beta = momentum / momentum.hypot(mass);
    TrackRecord {
        pt_signed,
        eta: 0.2,
        tpc_inner_param: rigidity,
        tpc_signal: signal,
        beta,
        dca_xy: 0.01,
        dca_z: 0.01,
        tpc_clusters: 125,
        its_cluster_map: 0x3f,
        flags: flag_bits::HAS_TOF,
        mc: None,
    }
}

/// 500 matter + 500 antimatter signal candidates plus 200 flat background.
fn synthetic_data(seed: u64) -> TrackTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let ns_peak = Normal::new(0.0, 1.0).unwrap();
    let dm_peak = Normal::new(0.03, 0.12).unwrap();
    let mut records = Vec::new();
    for side in [1.0, -1.0] {
        for _ in 0..500 {
            records.push(candidate(
                side * rng.gen_range(0.9..1.2),
                ns_peak.sample(&mut rng),
                dm_peak.sample(&mut rng),
            ));
        }
        for _ in 0..100 {
            records.push(candidate(
                side * rng.gen_range(0.9..1.2),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-0.9..1.1),
            ));
        }
    }
    TrackTable::from_records(records)
}

/// Simulated sample: every generated row, half of them reconstructed.
fn synthetic_mc(seed: u64) -> TrackTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::new();
    for i in 0..800 {
        let side = if i % 2 == 0 { 1.0 } else { -1.0 };
        let mut t = candidate(side * rng.gen_range(0.9..1.2), 0.0, 0.0);
        t.flags |= flag_bits::IS_PRIMARY;
        if i % 4 < 2 {
            t.flags |= flag_bits::IS_RECONSTRUCTED;
        }
        t.mc = Some(McTruth {
            gen_pt: 2.0 * t.pt_signed.abs(),
            gen_eta: t.eta,
            pdg_code: if side > 0.0 { 1_000_020_030 } else { -1_000_020_030 },
        });
        records.push(t);
    }
    TrackTable::from_records(records)
}

#[test]
fn full_chain_recovers_injected_yields() {
    let cfg = config();
    let dir = tempfile::tempdir().unwrap();

    // data pass → container on disk, as the CLI does
    let data = data_task::analyse_data(&cfg, &synthetic_data(42)).unwrap();
    let data_path = dir.path().join("data.json");
    data.save(&data_path).unwrap();

    // signal extraction from the reloaded container
    let data = Container::open(&data_path).unwrap();
    let extracted = signal::signal_task(&cfg, &data).unwrap();

    for (dir_name, letter) in [("he3", 'M'), ("antihe3", 'A')] {
        // TPC Gaussian-signal models recover the 500 injected candidates
        for model in [FitModelKind::GausGaus, FitModelKind::ExpGaus] {
            let h = extracted
                .get_h1(&format!(
                    "nuclei/{dir_name}/TPConly/hTPConly{letter}0_{}",
                    model.name()
                ))
                .unwrap();
            let y = h.content(0);
            assert!(
                (y - 500.0).abs() < 50.0,
                "{dir_name} {} yield {y} outside 10% of 500",
                model.name()
            );
        }
        // TOF fit and bin counting agree with the injected signal
        let raw = extracted
            .get_h1(&format!("nuclei/{dir_name}/GausExp/hRawCounts{letter}0"))
            .unwrap();
        assert!(
            (raw.content(0) - 500.0).abs() < 75.0,
            "{dir_name} TOF yield {}",
            raw.content(0)
        );
        let bc = extracted
            .get_h1(&format!(
                "nuclei/{dir_name}/GausExp/hRawCountsBinCounting{letter}0"
            ))
            .unwrap();
        assert!(bc.content(0) > 0.0);
        let chi2 = extracted
            .get_h1(&format!("nuclei/{dir_name}/ChiSquare/hChiSquareTPC{letter}0"))
            .unwrap();
        assert!(chi2.content(0) < 3.0, "chi2/ndf = {}", chi2.content(0));
    }

    // MC pass → efficiencies around 1/2
    let mc = mc_task::analyse_mc(&cfg, &synthetic_mc(7)).unwrap();
    let eff = mc.get_h1("nuclei/effTPCM").unwrap();
    let bin = eff.axis.find_bin(2.1).unwrap();
    assert!(
        (eff.content(bin) - 0.5).abs() < 0.1,
        "efficiency {} not near 0.5",
        eff.content(bin)
    );

    // systematics: corrected spectra and bands, all finite
    let syst = systematics::systematics_task(&cfg, &extracted, &mc).unwrap();
    for name in ["fStatTPCA", "fSystTPCA", "fStatTOFM", "hSystTPCM", "TOFmatchinghe3"] {
        let h = syst.get_h1(name).unwrap();
        for b in 0..h.n_bins() {
            assert!(h.content(b).is_finite(), "{name} bin {b} not finite");
            assert!(h.error(b).is_finite(), "{name} bin {b} error not finite");
        }
    }

    // checkpoint finds everything it needs
    let cp = checkpoint::checkpoint_task(&cfg, &syst, &mc, &extracted).unwrap();
    assert!(cp.get_h1("Data/tof_rawcounts").unwrap().content(0) > 0.0);

    // report sees no flagged bins in the fitted window
    let rep = report::report_task(&cfg, &extracted).unwrap();
    assert!(!rep.summaries.is_empty());
    let default_summaries: Vec<_> =
        rep.summaries.iter().filter(|s| s.namespace == "nuclei").collect();
    assert_eq!(default_summaries.len(), 2);
}

#[test]
fn trial_ensemble_layout_matches_across_containers() {
    let mut cfg = config();
    cfg.run.enable_trials = true;
    // a small 2×2 grid keeps this a layout test, not a fit test
    cfg.cuts.truncate(2);
    cfg.cuts[0].values.truncate(2);
    cfg.cuts[1].values.truncate(2);

    let data = data_task::analyse_data(&cfg, &synthetic_data(3)).unwrap();
    let mc = mc_task::analyse_mc(&cfg, &synthetic_mc(3)).unwrap();

    let namespaces = data.namespaces(&cfg.common.filter_list_name);
    assert_eq!(namespaces, vec!["nuclei", "nuclei0", "nuclei1", "nuclei2", "nuclei3"]);
    assert_eq!(namespaces, mc.namespaces(&cfg.common.filter_list_name));

    // identical object names across trial namespaces, addressable by path
    for ns in &namespaces {
        assert!(data.get_h2(&format!("{ns}/fATPCcounts")).is_ok());
        assert!(mc.get_h1(&format!("{ns}/effTOFA")).is_ok());
    }
}
