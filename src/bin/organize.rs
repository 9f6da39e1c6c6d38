use anyhow::{Context, Result};
use clap::Parser;
use photobook_lib::file_filter;
use photobook_lib::{
    BatchOutcome, HttpGeocoder, PhotoPipeline, PipelineConfig, RawImageInput, ReverseGeocoder,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "organize")]
#[command(version)]
#[command(about = "Extract photo metadata, group photos into events and suggest an album layout")]
struct Cli {
    /// Increase verbosity (-v=INFO, -vv=DEBUG, -vvv=TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip reverse geocoding
    #[arg(long)]
    offline: bool,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,

    /// Directories to scan for photos
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
}

#[derive(Serialize)]
struct Report<'a> {
    files: Vec<String>,
    failed: Vec<String>,
    #[serde(flatten)]
    outcome: &'a BatchOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => PipelineConfig::default(),
    };

    let found = collect_images(&cli.dirs)?;
    if found.is_empty() {
        anyhow::bail!("No supported images found in {:?}", cli.dirs);
    }
    log::info!("Found {} images", found.len());

    let (paths, inputs) = load_inputs(found).await;
    if inputs.is_empty() {
        anyhow::bail!("None of the images in {:?} could be read", cli.dirs);
    }

    let geocoder: Option<Arc<dyn ReverseGeocoder>> = if cli.offline {
        None
    } else {
        let client = HttpGeocoder::new(&config.geocoding).context("Failed to build geocoding client")?;
        Some(Arc::new(client) as Arc<dyn ReverseGeocoder>)
    };

    let started = Instant::now();
    let progress = |resolved: usize| log::info!("Resolved {} locations", resolved);
    let pipeline = PhotoPipeline::new(config, geocoder);
    let outcome = pipeline.run(inputs, Some(&progress)).await?;
    log::info!("Pipeline finished in {:?}", started.elapsed());

    for failure in &outcome.failures {
        log::error!("Could not read {:?}: {}", paths[failure.input_index], failure.error);
    }

    let report = Report {
        files: outcome
            .records
            .iter()
            .map(|r| paths[r.input_index].display().to_string())
            .collect(),
        failed: outcome
            .failures
            .iter()
            .map(|f| paths[f.input_index].display().to_string())
            .collect(),
        outcome: &outcome,
    };

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    Ok(())
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

/// Stat every path, skipping the ones that fail. Returned paths line up with the inputs.
async fn load_inputs(found: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<RawImageInput>) {
    let mut paths = Vec::with_capacity(found.len());
    let mut inputs = Vec::with_capacity(found.len());
    for path in found {
        match RawImageInput::from_path(&path).await {
            Ok(input) => {
                inputs.push(input);
                paths.push(path);
            }
            Err(e) => log::error!("Could not read {:?}: {}", path, e),
        }
    }
    (paths, inputs)
}

/// Recursively find supported images, in a stable order
fn collect_images(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {:?}", dir);
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
            let path = entry.path();
            if !entry.file_type().is_file() || is_hidden(path) {
                continue;
            }
            if file_filter::is_supported_image(path) {
                paths.push(path.to_path_buf());
            } else {
                log::debug!("Skipping unsupported file: {:?}", path);
            }
        }
    }
    Ok(paths)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
