//! Configuration management for pagethumb.
//!
//! Two layers:
//! - [`ThumbConfig`]: tunables of the cache and queue (memory budget, pool
//!   sizes, I/O retries), built in code with `with_*` methods
//! - [`Cli`]: command-line arguments for the maintenance binary via clap,
//!   with environment variables under the `PAGETHUMB_` prefix
//!
//! # Environment Variables
//!
//! - `PAGETHUMB_CACHE_ROOT` - Directory holding per-document cache regions
//!   (default: `<temp dir>/pagethumb`)
//!
//! # Example
//!
//! ```
//! use pagethumb::ThumbConfig;
//!
//! let config = ThumbConfig::default()
//!     .with_memory_budget(8 * 1024 * 1024)
//!     .with_render_workers(2);
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{DEFAULT_IO_RETRIES, DEFAULT_MEMORY_BUDGET};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of fetch-tier workers (disk lookups).
pub const DEFAULT_FETCH_WORKERS: usize = 4;

/// Default render-tier workers per available CPU core.
pub const DEFAULT_RENDER_WORKERS_PER_CORE: usize = 1;

/// Name of the cache directory under the system temp dir.
pub const DEFAULT_CACHE_DIR_NAME: &str = "pagethumb";

/// Default cache root: `<temp dir>/pagethumb`.
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// Library Configuration
// =============================================================================

/// Tunables for [`ThumbCache`](crate::ThumbCache) and
/// [`ThumbQueue`](crate::ThumbQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbConfig {
    /// Memory tier budget in bytes (RGBA8 pixel cost)
    pub memory_budget_bytes: usize,

    /// Concurrent disk lookups
    pub fetch_workers: usize,

    /// Concurrent rasterizations
    pub render_workers: usize,

    /// Retries for transient disk I/O failures
    pub io_retries: u32,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            fetch_workers: DEFAULT_FETCH_WORKERS,
            render_workers: available_cores() * DEFAULT_RENDER_WORKERS_PER_CORE,
            io_retries: DEFAULT_IO_RETRIES,
        }
    }
}

impl ThumbConfig {
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn with_fetch_workers(mut self, workers: usize) -> Self {
        self.fetch_workers = workers;
        self
    }

    pub fn with_render_workers(mut self, workers: usize) -> Self {
        self.render_workers = workers;
        self
    }

    /// Size the render pool as a multiple of the available CPU cores.
    pub fn with_render_workers_per_core(mut self, per_core: usize) -> Self {
        self.render_workers = available_cores() * per_core;
        self
    }

    pub fn with_io_retries(mut self, retries: u32) -> Self {
        self.io_retries = retries;
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_budget_bytes == 0 {
            return Err("memory_budget_bytes must be greater than 0".to_string());
        }
        if self.fetch_workers == 0 {
            return Err("fetch_workers must be greater than 0".to_string());
        }
        if self.render_workers == 0 {
            return Err("render_workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// pagethumb - Thumbnail cache maintenance.
///
/// Inspects and prunes the per-document thumbnail cache regions written by
/// applications using the pagethumb library.
#[derive(Parser, Debug, Clone)]
#[command(name = "pagethumb")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List cache regions with their size and last-touch age
    Regions(RegionsConfig),

    /// Delete regions untouched for longer than a given age
    Purge(PurgeConfig),

    /// Delete the region of one document
    Remove(RemoveConfig),

    /// Print the stable GUID of a document file
    Fingerprint(FingerprintConfig),
}

/// Options shared by every command that touches the cache root.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Directory holding per-document cache regions.
    #[arg(long, env = "PAGETHUMB_CACHE_ROOT")]
    pub cache_root: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CacheArgs {
    /// The configured cache root, or the default one.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_root.clone().unwrap_or_else(default_cache_root)
    }
}

/// Output format for `regions`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Text,
    /// JSON array
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct RegionsConfig {
    #[command(flatten)]
    pub cache: CacheArgs,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct PurgeConfig {
    #[command(flatten)]
    pub cache: CacheArgs,

    /// Maximum age of a region since its last touch (e.g. 90s, 15m, 12h, 7d).
    #[arg(long, value_parser = parse_age)]
    pub max_age: Duration,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveConfig {
    #[command(flatten)]
    pub cache: CacheArgs,

    /// GUID of the document whose region should be deleted.
    pub guid: String,
}

#[derive(Args, Debug, Clone)]
pub struct FingerprintConfig {
    /// Document file to fingerprint.
    pub path: PathBuf,
}

/// Parse an age such as `90s`, `15m`, `12h`, `7d`, or bare seconds.
pub fn parse_age(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 60 * 60),
        Some((i, 'd')) => (&s[..i], 24 * 60 * 60),
        Some(_) => (s, 1),
        None => return Err("age must not be empty".to_string()),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid age '{}': expected e.g. 90s, 15m, 12h, 7d", s))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("age '{}' is too large", s))
}

// =============================================================================
// Tests
// =============================================================================
