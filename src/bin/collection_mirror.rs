use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use collection_mirror::catalog::ArchiveCatalogClient;
use collection_mirror::config::ConfigLoader;
use collection_mirror::error::SyncError;
use collection_mirror::fetch::HttpFetcher;
use collection_mirror::output::{ConsoleOutput, JsonOutput};
use collection_mirror::sync::SyncEngine;

#[derive(Parser)]
#[command(name = "collection-mirror")]
#[command(about = "Mirror an archive.org collection, fetching only new or updated items")]
#[command(version)]
struct Cli {
    /// Collection to mirror (defaults to the configured collection)
    collection: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        err if err.is_catalog() => 3,
        SyncError::InvalidCollection(_)
        | SyncError::UnknownFormat(_)
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(None, cli.collection.as_deref())?;
    if cli.collection.is_none() {
        println!("Using default collection {}", config.collection);
    }

    let json = std::env::var("COLLECTION_MIRROR_JSON")
        .map(|value| value == "1")
        .unwrap_or(false);

    let catalog = ArchiveCatalogClient::new(config.catalog_url.clone())?;
    let fetcher = HttpFetcher::new()?;
    let engine = SyncEngine::new(config, catalog, fetcher);

    if json {
        let report = engine.run(&JsonOutput)?;
        JsonOutput::print_report(&report).into_diagnostic()?;
    } else {
        let report = engine.run(&ConsoleOutput)?;
        ConsoleOutput::print_summary(&report);
    }
    Ok(())
}
