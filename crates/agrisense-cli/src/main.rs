//! agrisense-cli: compute an NDVI report from two image files on disk.
//!
//! Runs the same pipeline as the HTTP service, without farm metadata
//! enrichment or alert delivery.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin agrisense-cli -- --nir nir.png --red red.png [--json]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use agrisense_ndvi::stats::DEFAULT_STRESS_THRESHOLD;
use agrisense_ndvi::{BandInput, IndexEngineKind, NdviOutcome, PipelineConfig, ReportRequest};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Compute an NDVI report from a near-infrared and a red image.
#[derive(Debug, Parser)]
#[command(name = "agrisense-cli", version)]
struct Cli {
    /// Near-infrared band image (PNG, JPEG, BMP, WebP, TIFF).
    #[arg(long)]
    nir: PathBuf,

    /// Red band image.
    #[arg(long)]
    red: PathBuf,

    /// Cells with NDVI below this value count as stressed.
    #[arg(long, default_value_t = DEFAULT_STRESS_THRESHOLD)]
    threshold: f64,

    /// Farm id used in the report id.
    #[arg(long)]
    farm_id: Option<String>,

    /// Capture timestamp; defaults to now (UTC).
    #[arg(long)]
    capture_date: Option<String>,

    /// Write the colorized preview PNG here.
    #[arg(long)]
    preview_out: Option<PathBuf>,

    /// Index engine (`sequential` or `parallel`); detected when omitted.
    #[arg(long)]
    engine: Option<IndexEngineKind>,

    /// Print the report as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn report_request(&self) -> ReportRequest {
        ReportRequest {
            farm_id: self.farm_id.clone(),
            capture_date: self.capture_date.clone(),
            stress_threshold: Some(self.threshold),
            tiles_url: None,
            save_preview: self.json,
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            engine: self.engine.unwrap_or_else(IndexEngineKind::detect),
            ..PipelineConfig::default()
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

/// Human-readable summary of one outcome.
fn summary(outcome: &NdviOutcome) -> String {
    let report = &outcome.report;
    let mut out = String::new();
    let _ = writeln!(out, "Report:       {}", report.report_id);
    let _ = writeln!(out, "Capture date: {}", report.capture_date);
    let _ = writeln!(out, "Grid:         {}", outcome.index.dimensions());
    let _ = writeln!(out, "Mean NDVI:    {:.4}", report.mean_ndvi);
    let _ = writeln!(out, "Median NDVI:  {:.4}", report.median_ndvi);
    let _ = writeln!(
        out,
        "Stress:       {}% of cells below {:.2}",
        report.stress_percent(),
        report.stress_threshold
    );
    let _ = writeln!(out, "Histogram:");
    let histogram = &report.histogram;
    for (count, edges) in histogram.bins.iter().zip(histogram.edges.windows(2)) {
        let _ = writeln!(out, "  [{:>5.2}, {:>5.2})  {count}", edges[0], edges[1]);
    }
    out
}

fn run(cli: &Cli) -> Result<(), String> {
    let input = BandInput::Images {
        nir: read(&cli.nir)?,
        red: read(&cli.red)?,
    };
    let config = cli.pipeline_config();
    tracing::debug!(engine = %config.engine, "pipeline configured");
    let outcome = agrisense_ndvi::process(input, &cli.report_request(), &config)
        .map_err(|e| format!("NDVI processing failed: {e}"))?;

    if let Some(path) = &cli.preview_out {
        let png = agrisense_ndvi::preview::render_png(&outcome.index, &config.preview)
            .map_err(|e| format!("Error rendering preview: {e}"))?;
        std::fs::write(path, png).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        eprintln!("Preview written to {}", path.display());
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome.report)
            .map_err(|e| format!("Error serializing report: {e}"))?;
        println!("{json}");
    } else {
        print!("{}", summary(&outcome));
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
