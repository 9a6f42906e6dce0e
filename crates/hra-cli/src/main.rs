use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hra_lib::{
    annotation::BeatAnnotation,
    config::{read_config, AnalysisConfig},
    io::{export_rr, load_snapshot, read_rr_file, read_trace_csv, save_snapshot},
    metrics::{
        hrv::HRVTime,
        poincare::{poincare, Poincare, PoincareDescriptors},
        runs::{runs, Runs},
        spectral::{FftSpectrum, LombScargleSpectrum},
    },
    rr::RRSeries,
    session::{EditOutcome, Orientation, Session},
};
use log::{info, warn};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "hra",
    version,
    about = "HRA: ECG beat detection and heart rate asymmetry analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and classify R waves in a two-column ECG CSV
    DetectBeats {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Detect on the polarity-flipped trace
        #[arg(long)]
        invert: bool,
    },
    /// Full session analysis: beats, RR, Poincaré, runs and band powers
    Analyze {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        invert: bool,
        /// Restore beats from a snapshot instead of detecting them
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Write the session snapshot here
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
    },
    /// Write the RR intervals of a recording as tab-separated milliseconds
    ExportRr {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Export the filtered series instead of the raw one
        #[arg(long)]
        filtered: bool,
    },
    /// Apply one manual edit to a session stored in a snapshot file
    Edit {
        #[arg(long)]
        input: PathBuf,
        /// Snapshot read (when present) and rewritten after the edit
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(subcommand)]
        action: EditAction,
    },
    /// Poincaré plot and asymmetry descriptors of an RR file
    Poincare {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Monotonic run histograms of an RR file
    Runs {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Lomb-Scargle band powers (and optionally an FFT spectrum) of an RR file
    Spectrum {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Band edges; overrides the config
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        cuts: Option<Vec<f64>>,
        /// Also compute the FFT spectrum at this resampling rate (Hz)
        #[arg(long)]
        resample_hz: Option<f64>,
    },
    /// Analyze every RR file of a directory, one JSON line per file
    Batch {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value = ".txt")]
        ext: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum EditAction {
    /// Set the annotation code of one beat
    Classify {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        code: u8,
    },
    /// Insert a beat at the R wave nearest a time (seconds)
    Insert {
        #[arg(long)]
        time: f64,
        #[arg(long)]
        ignore_radius: Option<usize>,
    },
    /// Remove the first beat at or after a time (seconds)
    Remove {
        #[arg(long)]
        time: f64,
    },
}

#[derive(Serialize)]
struct BeatReport {
    orientation: Orientation,
    positions: Vec<f64>,
    values: Vec<f64>,
    annotations: Vec<BeatAnnotation>,
}

#[derive(Serialize)]
struct AnalysisReport {
    orientation: Orientation,
    beats: usize,
    rr: RRSeries,
    descriptors: PoincareDescriptors,
    runs: Option<Runs>,
    bands: Vec<f64>,
    summary: HRVTime,
}

#[derive(Serialize)]
struct EditReport {
    outcome: EditOutcome,
    beats: usize,
    changes: u64,
}

#[derive(Serialize)]
struct SpectrumReport {
    cuts: Vec<f64>,
    bands: Vec<f64>,
    lomb_scargle: LombScargleSpectrum,
    #[serde(skip_serializing_if = "Option::is_none")]
    fft: Option<FftSpectrum>,
}

#[derive(Serialize)]
struct BatchLine {
    file: String,
    #[serde(flatten)]
    result: BatchResult,
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchResult {
    Ok {
        poincare: Box<Poincare>,
        runs: Option<Runs>,
        bands: Vec<f64>,
    },
    Err {
        error: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::DetectBeats {
            input,
            config,
            invert,
        } => cmd_detect_beats(&input, config.as_deref(), invert)?,
        Commands::Analyze {
            input,
            config,
            invert,
            snapshot,
            snapshot_out,
        } => cmd_analyze(
            &input,
            config.as_deref(),
            invert,
            snapshot.as_deref(),
            snapshot_out.as_deref(),
        )?,
        Commands::ExportRr {
            input,
            out,
            config,
            snapshot,
            filtered,
        } => cmd_export_rr(&input, &out, config.as_deref(), snapshot.as_deref(), filtered)?,
        Commands::Edit {
            input,
            snapshot,
            config,
            action,
        } => cmd_edit(&input, &snapshot, config.as_deref(), action)?,
        Commands::Poincare { input, config } => cmd_poincare(&input, config.as_deref())?,
        Commands::Runs { input, config } => cmd_runs(&input, config.as_deref())?,
        Commands::Spectrum {
            input,
            config,
            cuts,
            resample_hz,
        } => cmd_spectrum(&input, config.as_deref(), cuts, resample_hz)?,
        Commands::Batch { dir, ext, config } => cmd_batch(&dir, &ext, config.as_deref())?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => read_config(path),
        None => Ok(AnalysisConfig::default()),
    }
}

fn open_session(
    input: &Path,
    config: AnalysisConfig,
    snapshot: Option<&Path>,
) -> Result<Session> {
    let trace = read_trace_csv(input)?;
    let session = match snapshot {
        Some(path) => Session::from_snapshot(trace, config, load_snapshot(path)?),
        None => Session::new(trace, config),
    };
    session.with_context(|| format!("analyzing {}", input.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn cmd_detect_beats(input: &Path, config: Option<&Path>, invert: bool) -> Result<()> {
    let mut session = open_session(input, load_config(config)?, None)?;
    if invert {
        session.invert();
    }
    print_json(&BeatReport {
        orientation: session.orientation(),
        positions: session.beats().positions.clone(),
        values: session.beats().values.clone(),
        annotations: session.annotations().to_vec(),
    })
}

fn cmd_analyze(
    input: &Path,
    config: Option<&Path>,
    invert: bool,
    snapshot: Option<&Path>,
    snapshot_out: Option<&Path>,
) -> Result<()> {
    let mut session = open_session(input, load_config(config)?, snapshot)?;
    if invert {
        session.invert();
    }
    if let Some(out) = snapshot_out {
        save_snapshot(out, &session.snapshot())?;
        info!("snapshot written to {}", out.display());
    }
    print_json(&AnalysisReport {
        orientation: session.orientation(),
        beats: session.beats().len(),
        rr: session.rr().clone(),
        descriptors: session.poincare().descriptors,
        runs: session.runs().cloned(),
        bands: session.bands().to_vec(),
        summary: *session.summary(),
    })
}

fn cmd_export_rr(
    input: &Path,
    out: &Path,
    config: Option<&Path>,
    snapshot: Option<&Path>,
    filtered: bool,
) -> Result<()> {
    let session = open_session(input, load_config(config)?, snapshot)?;
    let series = if filtered {
        session.filtered_rr()
    } else {
        session.rr()
    };
    export_rr(out, series)?;
    info!("{} RR intervals written to {}", series.len(), out.display());
    Ok(())
}

fn cmd_edit(input: &Path, snapshot: &Path, config: Option<&Path>, action: EditAction) -> Result<()> {
    let existing = snapshot.exists().then_some(snapshot);
    let mut session = open_session(input, load_config(config)?, existing)?;
    let outcome = match action {
        EditAction::Classify { index, code } => {
            let annotation = BeatAnnotation::try_from(code)?;
            session.classify(index, annotation)?
        }
        EditAction::Insert {
            time,
            ignore_radius: Some(radius),
        } => session.insert_beat_with_radius(time, radius)?,
        EditAction::Insert { time, .. } => session.insert_beat(time)?,
        EditAction::Remove { time } => session.remove_beat(time),
    };
    save_snapshot(snapshot, &session.snapshot())?;
    print_json(&EditReport {
        outcome,
        beats: session.beats().len(),
        changes: session.change_count(),
    })
}

fn filtered_rr_file(input: &Path, config: &AnalysisConfig) -> Result<RRSeries> {
    let series = read_rr_file(input)?;
    Ok(config.filter.apply(&series))
}

fn cmd_poincare(input: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let series = filtered_rr_file(input, &config)?;
    print_json(&poincare(&series))
}

fn cmd_runs(input: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let series = filtered_rr_file(input, &config)?;
    let runs = runs(&series).with_context(|| format!("runs of {}", input.display()))?;
    print_json(&runs)
}

fn cmd_spectrum(
    input: &Path,
    config: Option<&Path>,
    cuts: Option<Vec<f64>>,
    resample_hz: Option<f64>,
) -> Result<()> {
    let config = load_config(config)?;
    let cuts = cuts.unwrap_or_else(|| config.spectral.cuts.clone());
    let series = filtered_rr_file(input, &config)?;
    let lomb_scargle = LombScargleSpectrum::from_rr(&series);
    let bands = lomb_scargle.get_bands(&cuts, None)?;
    let fft = match resample_hz {
        Some(rate) if rate > 0.0 => Some(FftSpectrum::from_rr(&series, rate)),
        Some(rate) => bail!("resampling rate must be positive, got {rate}"),
        None => None,
    };
    print_json(&SpectrumReport {
        cuts,
        bands,
        lomb_scargle,
        fft,
    })
}

fn analyze_rr_file(path: &Path, config: &AnalysisConfig) -> Result<BatchResult> {
    let series = filtered_rr_file(path, config)?;
    let poincare = poincare(&series);
    let runs = match runs(&series) {
        Ok(runs) => Some(runs),
        Err(err) => {
            warn!("{}: {err}", path.display());
            None
        }
    };
    let bands = LombScargleSpectrum::from_rr(&series).get_bands(&config.spectral.cuts, None)?;
    Ok(BatchResult::Ok {
        poincare: Box::new(poincare),
        runs,
        bands,
    })
}

fn cmd_batch(dir: &Path, ext: &str, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let wanted = ext.trim_start_matches('.');
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(wanted))
        })
        .collect();
    files.sort();
    info!("batch: {} files in {}", files.len(), dir.display());

    for path in files {
        let result = analyze_rr_file(&path, &config).unwrap_or_else(|err| BatchResult::Err {
            error: format!("{err:#}"),
        });
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        print_json(&BatchLine { file, result })?;
    }
    Ok(())
}
