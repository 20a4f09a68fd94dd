use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use container_puid::presentation::cli::Cli;
use container_puid::{
    ContainerContentIdentifier, ContainerSignatureDefinitions, IdentificationResultCollection,
    IdentifierOptions, RequestMetaData, ScanBudget,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            tracing::warn!(failed, "some files could not be identified");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Identifies every file on the command line and returns how many failed
fn run(cli: &Cli) -> Result<usize> {
    let defs = load_definitions(&cli.signatures)?;

    let mut options =
        IdentifierOptions::default().with_scan_budget(ScanBudget::from(cli.scan_budget));
    if let Some(dir) = &cli.scratch_dir {
        options.scratch_dir = dir.clone();
    }
    if cli.no_crc {
        options = options.without_crc_check();
    }

    let identifier = ContainerContentIdentifier::from_kind_name(&cli.kind, &defs, options)
        .context("Failed to build container identifier")?;

    let mut out = io::stdout().lock();
    let mut failed = 0;
    for path in &cli.files {
        match identify_file(&identifier, path) {
            Ok(results) => {
                for result in &results {
                    serde_json::to_writer(&mut out, result)?;
                    writeln!(out)?;
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(path = %path.display(), "{e:#}");
            }
        }
    }
    out.flush()?;

    Ok(failed)
}

fn load_definitions(path: &Path) -> Result<ContainerSignatureDefinitions> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open signature file {}", path.display()))?;
    let defs: ContainerSignatureDefinitions = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse signature file {}", path.display()))?;

    tracing::info!(
        signatures = defs.container_signatures.len(),
        mappings = defs.format_mappings.len(),
        "loaded signature definitions"
    );
    Ok(defs)
}

fn identify_file(
    identifier: &ContainerContentIdentifier,
    path: &Path,
) -> Result<IdentificationResultCollection> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata()?.len();
    let metadata = RequestMetaData::for_path(path).with_size(size);

    let mut results = IdentificationResultCollection::new();
    identifier
        .process_with_metadata(BufReader::new(file), metadata, &mut results)
        .with_context(|| format!("Failed to identify {}", path.display()))?;
    Ok(results)
}
