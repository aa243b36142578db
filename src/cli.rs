use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use gammafit::{AnalysisConfig, FitError, FitReport, Spectrum, SpectrumAnalysis};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gamma-ray spectrum peak fitting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit peaks in a text spectrum
    Fit(FitArgs),

    /// Print the default configuration as YAML
    Config,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    /// Spectrum file, either `energy count` rows or one count per channel
    pub spectrum: PathBuf,

    /// YAML analysis configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma separated peak energies in keV (default: run the peak finder)
    #[arg(short, long, value_delimiter = ',')]
    pub peaks: Vec<f64>,

    /// Estimate every ROI from the spectrum curvature before fitting
    #[arg(long, default_value_t = false)]
    pub auto_roi: bool,

    /// Write the fit reports to this file as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Override the basin-hopping seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the global optimizer time budget (seconds per ROI)
    #[arg(long)]
    pub time_budget: Option<f64>,
}

pub fn run(cli: Cli) -> Result<(), FitError> {
    match cli.command {
        Commands::Fit(args) => fit(args),
        Commands::Config => {
            print!("{}", AnalysisConfig::default().to_yaml()?);
            Ok(())
        }
    }
}

fn fit(args: FitArgs) -> Result<(), FitError> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_yaml_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.optimizer.seed = seed;
    }
    if args.time_budget.is_some() {
        config.optimizer.time_budget_secs = args.time_budget;
    }

    let spectrum = Spectrum::load_text(&args.spectrum, config.calibration.clone())?;
    let peak_finding = config.peak_finding.clone();
    let mut analysis = SpectrumAnalysis::new(spectrum, config);

    if args.peaks.is_empty() {
        let found = analysis.auto_peaks(&peak_finding);
        log::info!("Using {} peaks from the peak finder", found.len());
    } else {
        for &energy in &args.peaks {
            if let Err(e) = analysis.add_peak(energy) {
                log::warn!("Ignoring peak at {energy:.3} keV: {e}");
            }
        }
    }

    if args.auto_roi {
        let estimated = analysis.auto_roi();
        log::info!("Estimated {estimated}/{} ROIs", analysis.rois().len());
    }

    let pb = ProgressBar::new(analysis.rois().len() as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }
    pb.set_message("Fitting ROIs");
    let results = analysis.fit_all(None, Some(&pb));
    pb.finish_with_message("Fits complete");

    let mut reports: Vec<&FitReport> = Vec::new();
    for (roi, result) in analysis.rois().iter().zip(&results) {
        match result {
            Ok(report) => {
                println!("{report}");
                reports.push(report);
            }
            Err(e) => log::error!("ROI at {:.3} keV was not fitted: {e}", roi.centroid()),
        }
    }

    let succeeded = reports.iter().filter(|r| r.is_success()).count();
    let low_confidence = reports.iter().filter(|r| r.low_confidence).count();
    println!(
        "{} ROIs, {succeeded} fitted, {low_confidence} low confidence",
        results.len()
    );

    if let Some(path) = &args.json {
        std::fs::write(path, serde_json::to_string_pretty(&reports)?)?;
        log::info!("Wrote {} reports to {}", reports.len(), path.display());
    }
    Ok(())
}
