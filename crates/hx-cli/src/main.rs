//! heliox CLI

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use hx_analysis::{checkpoint, data_task, mc_task, report, signal, systematics};
use hx_core::AnalysisConfig;
use hx_io::{read_tracks, Container};

#[derive(Parser)]
#[command(name = "heliox")]
#[command(about = "heliox - nuclei spectra analysis pipeline")]
#[command(version)]
struct Cli {
    /// Analysis configuration (TOML), merged over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    dump_default_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Data pass: selection + histogramming with the trial scan
    #[command(alias = "analyse_data")]
    AnalyseData {
        /// Input track table; overrides `paths.data_tree`
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output container; overrides `paths.data_histos`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Monte-Carlo pass: efficiencies per trial
    #[command(alias = "analyse_mc")]
    AnalyseMc {
        /// Input MC track table; overrides `paths.mc_tree`
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output container; overrides `paths.mc_histos`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Signal extraction over every trial namespace
    Signal,

    /// Systematic band, corrected spectra, trigger cross-check
    Systematics,

    /// Export the published histogram set
    Checkpoint,

    /// Summarize fit quality and flagged bins as JSON
    Report,

    /// Run the whole chain: data, MC, signal, systematics, checkpoint, report
    #[command(alias = "full_chain")]
    FullChain,
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    status: &'a str,
    error: String,
    task: String,
    started_unix: u64,
    duration_sec: f64,
    config: &'a AnalysisConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<AnalysisConfig> {
    let cfg = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

fn open(path: &str, what: &str) -> Result<Container> {
    if path.is_empty() {
        bail!("no path configured for the {what} container");
    }
    Container::open(path).with_context(|| format!("opening {what} container {path}"))
}

fn task_name(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::AnalyseData { .. } => "analyse-data",
        Commands::AnalyseMc { .. } => "analyse-mc",
        Commands::Signal => "signal",
        Commands::Systematics => "systematics",
        Commands::Checkpoint => "checkpoint",
        Commands::Report => "report",
        Commands::FullChain => "full-chain",
    }
}

fn run_analyse_data(cfg: &AnalysisConfig, input: Option<&PathBuf>, output: Option<&PathBuf>) -> Result<()> {
    let input = input
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| cfg.paths.data_tree.clone());
    let output = output
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| cfg.paths.data_histos.clone());
    if input.is_empty() || output.is_empty() {
        bail!("analyse-data needs paths.data_tree and paths.data_histos (or --input/--output)");
    }
    let table = read_tracks(&input, false)?;
    let out = data_task::analyse_data(cfg, &table)?;
    out.save(&output)?;
    tracing::info!(%output, "analyse-data done");
    Ok(())
}

fn run_analyse_mc(cfg: &AnalysisConfig, input: Option<&PathBuf>, output: Option<&PathBuf>) -> Result<()> {
    let input = input
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| cfg.paths.mc_tree.clone());
    let output = output
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| cfg.paths.mc_histos.clone());
    if input.is_empty() || output.is_empty() {
        bail!("analyse-mc needs paths.mc_tree and paths.mc_histos (or --input/--output)");
    }
    let table = read_tracks(&input, true)?;
    let out = mc_task::analyse_mc(cfg, &table)?;
    out.save(&output)?;
    tracing::info!(%output, "analyse-mc done");
    Ok(())
}

fn run_signal(cfg: &AnalysisConfig) -> Result<()> {
    let data = open(&cfg.paths.data_histos, "data")?;
    let out = signal::signal_task(cfg, &data)?;
    out.save(&cfg.paths.signal_output)?;
    tracing::info!(output = %cfg.paths.signal_output, "signal done");
    Ok(())
}

fn run_systematics(cfg: &AnalysisConfig) -> Result<()> {
    let signal_c = open(&cfg.paths.signal_output, "signal")?;
    let mc = open(&cfg.paths.mc_histos, "MC")?;
    let out = systematics::systematics_task(cfg, &signal_c, &mc)?;
    out.save(&cfg.paths.systematics_output)?;
    tracing::info!(output = %cfg.paths.systematics_output, "systematics done");
    Ok(())
}

fn run_checkpoint(cfg: &AnalysisConfig) -> Result<()> {
    let syst = open(&cfg.paths.systematics_output, "systematics")?;
    let mc = open(&cfg.paths.mc_histos, "MC")?;
    let signal_c = open(&cfg.paths.signal_output, "signal")?;
    let out = checkpoint::checkpoint_task(cfg, &syst, &mc, &signal_c)?;
    let path = if cfg.paths.checkpoint_output.is_empty() {
        "checkpoint.json".to_string()
    } else {
        cfg.paths.checkpoint_output.clone()
    };
    out.save(&path)?;
    tracing::info!(output = %path, "checkpoint done");
    Ok(())
}

fn run_report(cfg: &AnalysisConfig) -> Result<()> {
    let signal_c = open(&cfg.paths.signal_output, "signal")?;
    let rep = report::report_task(cfg, &signal_c)?;
    let path = if cfg.paths.report_output.is_empty() {
        "report.json".to_string()
    } else {
        cfg.paths.report_output.clone()
    };
    report::write_report(&rep, &path)?;
    tracing::info!(output = %path, flagged = rep.total_flagged, "report done");
    Ok(())
}

fn run(cfg: &AnalysisConfig, cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::AnalyseData { input, output } => {
            run_analyse_data(cfg, input.as_ref(), output.as_ref())
        }
        Commands::AnalyseMc { input, output } => {
            run_analyse_mc(cfg, input.as_ref(), output.as_ref())
        }
        Commands::Signal => run_signal(cfg),
        Commands::Systematics => run_systematics(cfg),
        Commands::Checkpoint => run_checkpoint(cfg),
        Commands::Report => run_report(cfg),
        Commands::FullChain => {
            run_analyse_data(cfg, None, None)?;
            run_analyse_mc(cfg, None, None)?;
            run_signal(cfg)?;
            run_systematics(cfg)?;
            run_checkpoint(cfg)?;
            run_report(cfg)
        }
    }
}

fn write_metadata(cfg: &AnalysisConfig, meta: &RunMetadata<'_>) {
    if cfg.paths.metadata_output.is_empty() {
        return;
    }
    let write = || -> Result<()> {
        let path = std::path::Path::new(&cfg.paths.metadata_output);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), meta)?;
        Ok(())
    };
    if let Err(e) = write() {
        tracing::error!("failed to write run metadata: {e}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    if cli.dump_default_config {
        print!("{}", toml::to_string_pretty(&AnalysisConfig::default())?);
        return Ok(());
    }

    let Some(command) = cli.command.as_ref() else {
        bail!("no task given; see --help for the available tasks");
    };

    let cfg = load_config(cli.config.as_ref())?;
    if cfg.run.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.run.threads)
            .build_global()
            .context("configuring the worker pool")?;
    }

    let task = task_name(command);
    tracing::info!(task, species = cfg.run.species.name(), "starting");
    let started = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    let clock = Instant::now();
    let result = run(&cfg, command);

    let (status, error) = match &result {
        Ok(()) => ("success", String::new()),
        Err(e) => ("failed", format!("{e:#}")),
    };
    write_metadata(
        &cfg,
        &RunMetadata {
            status,
            error,
            task: task.to_string(),
            started_unix: started,
            duration_sec: clock.elapsed().as_secs_f64(),
            config: &cfg,
        },
    );
    tracing::info!(task, status, elapsed_sec = clock.elapsed().as_secs_f64(), "finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&AnalysisConfig::default()).unwrap();
        let back: AnalysisConfig = toml::from_str(&text).unwrap();
        back.validate().unwrap();
        assert_eq!(back.common.pt_bins, AnalysisConfig::default().common.pt_bins);
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "[common]\nperiod = \"LHC23\"\n\n[normalization]\nn_tvx = 1.0e11\n",
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.common.period, "LHC23");
        assert_eq!(cfg.normalization.n_tvx, 1.0e11);
        // untouched sections keep their defaults
        assert_eq!(cfg.selections.tof_nsigma_cut, 3.5);
        assert_eq!(cfg.cuts.len(), 3);
    }

    #[test]
    fn malformed_config_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[common]\npt_bins = [2.0, 1.0]\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
