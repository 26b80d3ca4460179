//! `filedrop ingest`: stage every file under the given paths and wait for
//! the pool to finish hashing them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use filedrop_config::{log_cli_info, log_cli_warn, Config};
use filedrop_core::{
    DigestAlgorithm, FileRecord, FileStatus, IngestCoordinator, Ingestor, MemoryStore,
    MetadataStore, PoolConfig, PoolStatsSnapshot, StreamHasher, WorkerPool,
};
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Serialize)]
struct IngestedFile {
    source: PathBuf,
    #[serde(flatten)]
    record: FileRecord,
}

#[derive(Serialize)]
struct IngestReport {
    files: Vec<IngestedFile>,
    stats: PoolStatsSnapshot,
}

/// Expand directories into the regular files beneath them
fn collect_sources(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    for root in paths {
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => sources.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => {
                    log_cli_warn!("skipping unreadable entry", error = tracing::field::display(&e))
                }
            }
        }
    }
    sources
}

pub fn cmd_ingest(config: &Config, paths: &[PathBuf], json: bool) -> Result<()> {
    let algorithm: DigestAlgorithm = config.hashing.algorithm.parse()?;
    let hasher = StreamHasher::new(algorithm).with_chunk_size(config.hashing.chunk_size);
    let pool = Arc::new(
        WorkerPool::with_hasher(PoolConfig::from(&config.pool), Arc::new(hasher))
            .context("Failed to start worker pool")?,
    );
    let store = Arc::new(MemoryStore::new());
    let ingestor = Ingestor::new(
        &config.storage.data_dir,
        store.clone(),
        IngestCoordinator::new(pool.clone()),
    );

    let sources = collect_sources(paths);
    log_cli_info!(
        "ingest starting",
        files = sources.len(),
        workers = pool.worker_count(),
        algorithm = algorithm.as_str(),
    );

    let mut accepted = Vec::with_capacity(sources.len());
    for source in sources {
        let receipt = ingestor
            .ingest_path(&source)
            .with_context(|| format!("Failed to ingest {}", source.display()))?;
        accepted.push((source, receipt.id));
    }

    pool.shutdown();
    let stats = pool.stats();

    let mut files = Vec::with_capacity(accepted.len());
    for (source, id) in accepted {
        let record = store
            .get_file(&id)
            .with_context(|| format!("Record for {} disappeared", source.display()))?;
        files.push(IngestedFile { source, record });
    }

    if json {
        let report = IngestReport { files, stats };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&files, &stats, ingestor.data_dir());
    }
    Ok(())
}

fn print_table(files: &[IngestedFile], stats: &PoolStatsSnapshot, data_dir: &Path) {
    for file in files {
        let hash = if file.record.hash.is_empty() {
            "-"
        } else {
            file.record.hash.as_str()
        };
        println!(
            "{:<9} {} {} {}",
            file.record.status.as_str(),
            file.record.id,
            hash,
            file.source.display()
        );
    }

    let pending = files
        .iter()
        .filter(|f| f.record.status == FileStatus::Pending)
        .count();
    println!();
    println!("Data dir:  {}", data_dir.display());
    println!(
        "Processed: {} completed, {} failed, {} pending",
        stats.completed, stats.failed, pending
    );
    println!("Peak in flight: {}", stats.peak_in_flight);
}
