//! # filedrop CLI
//!
//! Stages local files into a data directory, hashes them on a bounded worker
//! pool and prints the resulting metadata records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filedrop_config::logging::{init_logging, LogLevel};
use filedrop_config::Config;
use filedrop_core::{CancelToken, DigestAlgorithm, StreamHasher};

mod ingest;

/// filedrop - upload staging with asynchronous content hashing
#[derive(Parser)]
#[command(name = "filedrop")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage files into the data directory and hash them
    Ingest {
        /// Files or directories (walked recursively)
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Number of hashing workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Where staged uploads are written
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Digest algorithm (sha256, blake3)
        #[arg(long)]
        algorithm: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the content digest of a single file
    Hash {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Digest algorithm (sha256, blake3)
        #[arg(long)]
        algorithm: Option<String>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    let level: LogLevel = cli
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str())
        .parse()?;
    init_logging(level);

    match cli.command {
        Commands::Ingest {
            paths,
            workers,
            data_dir,
            algorithm,
            json,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.pool.workers = workers;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            if let Some(algorithm) = algorithm {
                config.hashing.algorithm = algorithm;
            }
            ingest::cmd_ingest(&config, &paths, json)
        }
        Commands::Hash { path, algorithm } => {
            let algorithm = algorithm.unwrap_or_else(|| config.hashing.algorithm.clone());
            cmd_hash(&config, &path, &algorithm)
        }
        Commands::Config => {
            print!("{}", Config::default_toml()?);
            Ok(())
        }
    }
}

fn cmd_hash(config: &Config, path: &std::path::Path, algorithm: &str) -> Result<()> {
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let hasher = StreamHasher::new(algorithm).with_chunk_size(config.hashing.chunk_size);
    let digest = hasher
        .digest_file(path, &CancelToken::new())
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    println!("{}  {}", digest, path.display());
    Ok(())
}
