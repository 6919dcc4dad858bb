mod config;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use mileage_core::{Money, ReceiptRecord};
use mileage_ocr::{
    ExtractedReceipt, Extractor, OcrBackend, ReceiptPipeline, Rotation, ScanResult,
    TimeoutRecognizer,
};

use config::{Config, LogSettings, OcrSettings};

#[derive(Parser)]
#[command(name = "mileage-scan")]
#[command(about = "Read store, date and total from receipt photos")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run orientation search, OCR and extraction on receipt images
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Extract fields from already recognized text (a file, or stdin)
    Extract { file: Option<PathBuf> },
}

/// One JSON line per scanned image.
#[derive(Serialize)]
struct ScanReport<'a> {
    file: &'a Path,
    rotation: Option<Rotation>,
    orientation_confidence: Option<f32>,
    extracted: ExtractedReceipt,
    record: ReceiptRecord,
}

#[derive(Serialize)]
struct ExtractReport {
    extracted: ExtractedReceipt,
    date: NaiveDate,
    total: Option<Money>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    init_tracing(cli.verbose, &config.log);

    match cli.command {
        Commands::Scan { images } => scan(&images, &config.ocr).await,
        Commands::Extract { file } => extract(file.as_deref()),
    }
}

fn init_tracing(verbose: u8, log: &LogSettings) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_filter(verbose, log))),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn fallback_filter(verbose: u8, log: &LogSettings) -> String {
    match verbose {
        0 => log.filter.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

async fn scan(images: &[PathBuf], settings: &OcrSettings) -> Result<()> {
    let pipeline = ReceiptPipeline::new(build_backend(settings)?);
    info!(count = images.len(), "Scanning receipts");

    let mut failed = 0usize;
    for path in images {
        match pipeline.process_file(path).await {
            Ok(result) => println!("{}", serde_json::to_string(&scan_report(path, result))?),
            Err(e) => {
                error!(file = %path.display(), error = %e, "receipt scan failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} receipts could not be scanned", images.len());
    }
    Ok(())
}

fn scan_report(path: &Path, result: ScanResult) -> ScanReport<'_> {
    let now = Local::now().naive_local();
    let record = result.extracted.to_record(now.date(), now);
    ScanReport {
        file: path,
        rotation: result.rotation,
        orientation_confidence: result.orientation_confidence,
        extracted: result.extracted,
        record,
    }
}

fn extract(file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
    };

    let report = extract_report(&text, Local::now().date_naive());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn extract_report(text: &str, today: NaiveDate) -> ExtractReport {
    let extracted = Extractor::extract(text);
    ExtractReport {
        date: extracted.date_or(today),
        total: extracted.total(),
        extracted,
    }
}

#[cfg(feature = "tesseract")]
fn build_backend(settings: &OcrSettings) -> Result<Box<dyn OcrBackend>> {
    use mileage_ocr::TesseractRecognizer;

    info!(language = %settings.language, "Using Tesseract OCR backend");
    let engine = TesseractRecognizer::new(settings.data_path.clone(), &settings.language);
    Ok(with_timeout(engine, settings.timeout()))
}

#[cfg(not(feature = "tesseract"))]
fn build_backend(_settings: &OcrSettings) -> Result<Box<dyn OcrBackend>> {
    Err(mileage_ocr::OcrError::NotAvailable.into())
}

fn with_timeout<R: OcrBackend + 'static>(engine: R, timeout: Option<Duration>) -> Box<dyn OcrBackend> {
    match timeout {
        Some(timeout) => Box::new(TimeoutRecognizer::new(engine, timeout)),
        None => Box::new(engine),
    }
}
