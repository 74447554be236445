//! Checkpoint export: the published set of histograms cherry-picked into a
//! flat container with stable names.

use hx_core::{AnalysisConfig, Error, Result};
use hx_io::Container;

fn pick(
    out: &mut Container,
    dir: &str,
    source: &Container,
    path: &str,
    name: &str,
) -> Result<()> {
    let h = source
        .get_h1(path)
        .map_err(|e| Error::Input(format!("checkpoint entry missing: {e}")))?;
    out.put_h1_as(dir, name, h.clone());
    Ok(())
}

/// Assemble the checkpoint container from the systematics, MC and signal
/// outputs. Missing entries fail fast — a checkpoint is an explicit export,
/// not a best-effort one.
pub fn checkpoint_task(
    cfg: &AnalysisConfig,
    syst: &Container,
    mc: &Container,
    signal: &Container,
) -> Result<Container> {
    let filter = &cfg.common.filter_list_name;
    let species = cfg.run.species;
    let anti = species.anti_name();
    let suffix = species.hist_suffix();
    let model = cfg.fit.default_tpc_model.name();

    let mut out = Container::new();
    pick(&mut out, "", syst, "fStatTPCA", "tpc_spectrum_stat")?;
    pick(&mut out, "", syst, "fSystTPCA", "tpc_spectrum_syst")?;
    pick(&mut out, "", syst, "fStatTOFA", "tof_spectrum_stat")?;
    pick(&mut out, "", syst, "fSystTOFA", "tof_spectrum_syst")?;
    pick(&mut out, "", mc, &format!("{filter}/effTPCA"), "tpc_efficiency")?;
    pick(&mut out, "", mc, &format!("{filter}/effTOFA"), "tof_efficiency")?;

    pick(&mut out, "MC", mc, &format!("{filter}/genA{suffix}"), "generated")?;
    pick(&mut out, "MC", mc, &format!("{filter}/TPCA{suffix}"), "tpc_reconstructed")?;
    pick(&mut out, "MC", mc, &format!("{filter}/TOFA{suffix}"), "tof_reconstructed")?;

    pick(
        &mut out,
        "Data",
        signal,
        &format!("{filter}/{anti}/TPConly/hTPConlyA0_{model}"),
        "tpc_rawcounts",
    )?;
    pick(
        &mut out,
        "Data",
        signal,
        &format!("{filter}/{anti}/GausExp/hRawCountsA0"),
        "tof_rawcounts",
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_hist::Hist1;

    fn h(name: &str) -> Hist1 {
        let mut h = Hist1::new_binned(name, &[1.0, 2.0, 3.0]).unwrap();
        h.set_bin(0, 5.0, 1.0).unwrap();
        h
    }

    fn populated() -> (AnalysisConfig, Container, Container, Container) {
        let cfg = AnalysisConfig::default();
        let mut syst = Container::new();
        for name in ["fStatTPCA", "fSystTPCA", "fStatTOFA", "fSystTOFA"] {
            syst.put_h1("", h(name));
        }
        let mut mc = Container::new();
        for name in ["effTPCA", "effTOFA", "genAHe3", "TPCAHe3", "TOFAHe3"] {
            mc.put_h1("nuclei", h(name));
        }
        let mut signal = Container::new();
        signal.put_h1("nuclei/antihe3/TPConly", h("hTPConlyA0_ExpGaus"));
        signal.put_h1("nuclei/antihe3/GausExp", h("hRawCountsA0"));
        (cfg, syst, mc, signal)
    }

    #[test]
    fn assembles_the_published_set() {
        let (cfg, syst, mc, signal) = populated();
        let out = checkpoint_task(&cfg, &syst, &mc, &signal).unwrap();
        for path in [
            "tpc_spectrum_stat",
            "tof_spectrum_syst",
            "tpc_efficiency",
            "MC/generated",
            "MC/tpc_reconstructed",
            "Data/tpc_rawcounts",
            "Data/tof_rawcounts",
        ] {
            assert!(out.get_h1(path).is_ok(), "missing {path}");
        }
        assert_eq!(out.get_h1("Data/tof_rawcounts").unwrap().content(0), 5.0);
    }

    #[test]
    fn missing_entry_fails_fast_with_its_path() {
        let (cfg, syst, mc, mut signal) = populated();
        signal.mkdir("nuclei/antihe3/GausExp").h1.clear();
        let err = checkpoint_task(&cfg, &syst, &mc, &signal).unwrap_err();
        assert!(err.to_string().contains("hRawCountsA0"), "{err}");
    }
}
