//! pagethumb - thumbnail cache maintenance.
//!
//! Lists, purges and removes the per-document cache regions that the
//! pagethumb library writes, and fingerprints documents into GUIDs.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagethumb::{
    config::{Cli, Command, FingerprintConfig, OutputFormat, PurgeConfig, RegionsConfig, RemoveConfig},
    DocumentGuid, RegionInfo, ThumbCache,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Regions(config) => run_regions(config).await,
        Command::Purge(config) => run_purge(config).await,
        Command::Remove(config) => run_remove(config).await,
        Command::Fingerprint(config) => run_fingerprint(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pagethumb=debug"
    } else {
        "pagethumb=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Regions Command
// =============================================================================

async fn run_regions(config: RegionsConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    let cache = ThumbCache::new(config.cache.cache_root());
    let regions = match cache.regions().await {
        Ok(regions) => regions,
        Err(e) => {
            error!("Failed to list regions: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&regions) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize regions: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Text => print_regions(&cache, &regions),
    }

    ExitCode::SUCCESS
}

fn print_regions(cache: &ThumbCache, regions: &[RegionInfo]) {
    println!("Cache root: {}", cache.root().display());
    println!("─────────────────────────────────────────────────────────────");

    if regions.is_empty() {
        println!("  (no regions)");
        return;
    }

    println!("  {:<34} {:>7} {:>10} {:>10}", "GUID", "FILES", "SIZE", "AGE");
    for region in regions {
        println!(
            "  {:<34} {:>7} {:>10} {:>10}",
            region.guid,
            region.files,
            format_bytes(region.bytes),
            format_age(region.age_secs)
        );
    }

    let total: u64 = regions.iter().map(|r| r.bytes).sum();
    println!();
    println!("Total: {} region(s), {}", regions.len(), format_bytes(total));
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1}MB", b / MB)
    } else if b >= KB {
        format!("{:.1}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

fn format_age(secs: u64) -> String {
    match secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

// =============================================================================
// Purge / Remove Commands
// =============================================================================

async fn run_purge(config: PurgeConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    let cache = ThumbCache::new(config.cache.cache_root());
    match cache.purge_older_than(config.max_age).await {
        Ok(purged) => {
            for guid in &purged {
                println!("{}", guid);
            }
            info!(
                "Purged {} region(s) older than {}s",
                purged.len(),
                config.max_age.as_secs()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Purge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_remove(config: RemoveConfig) -> ExitCode {
    init_logging(config.cache.verbose);

    let cache = ThumbCache::new(config.cache.cache_root());
    let guid = DocumentGuid::new(config.guid.as_str());
    match cache.remove_region(&guid).await {
        Ok(true) => {
            info!("Removed region for {}", guid);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            info!("No region for {}", guid);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to remove region for {}: {}", guid, e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Fingerprint Command
// =============================================================================

fn run_fingerprint(config: FingerprintConfig) -> ExitCode {
    match DocumentGuid::fingerprint(&config.path) {
        Ok(guid) => {
            println!("{}", guid);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
