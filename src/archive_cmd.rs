//! `sei fetch` and `sei status`: archive maintenance from the command line.

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::download::{DownloadSupervisor, StartOutcome};
use crate::fetch::ArchiveFetcher;
use crate::listing::DOCUMENT_SUFFIX;

/// Download the archive unless it is already present (or `force` is set).
pub async fn run_fetch(config: &Config, force: bool) -> Result<()> {
    let fetcher = ArchiveFetcher::from_config(&config.archive)?;
    let supervisor = DownloadSupervisor::new(fetcher);

    if force {
        let report = supervisor.force_refresh().await?;
        println!("fetch");
        println!("  entries:   {}", report.entries);
        println!("  documents: {}", report.documents);
        println!("  size:      {}", format_bytes(report.bytes));
        return Ok(());
    }

    match supervisor.ensure_started() {
        StartOutcome::AlreadyPresent => {
            println!("fetch");
            println!(
                "  archive already present at {} (use --force to download again)",
                config.archive.root.display()
            );
            return Ok(());
        }
        StartOutcome::Spawned | StartOutcome::Unchanged => supervisor.join().await,
    }

    let status = supervisor.status();
    if let Some(error) = status.error() {
        anyhow::bail!("download failed: {}", error);
    }
    let summary = ArchiveSummary::scan(config);
    println!("fetch");
    println!("  processes: {}", summary.processes);
    println!("  documents: {}", summary.documents);
    println!("  size:      {}", format_bytes(summary.bytes));
    Ok(())
}

/// Print what is on disk under the archive root.
pub fn run_status(config: &Config) -> Result<()> {
    let fetcher = ArchiveFetcher::from_config(&config.archive)?;
    let summary = ArchiveSummary::scan(config);

    println!("SEI archive");
    println!("===========");
    println!();
    println!("  Root:        {}", config.archive.root.display());
    println!(
        "  Present:     {}",
        if fetcher.archive_present() { "yes" } else { "no" }
    );
    println!("  Processes:   {}", summary.processes);
    println!("  Documents:   {}", summary.documents);
    println!("  Size:        {}", format_bytes(summary.bytes));
    if fetcher.staging_path().exists() || fetcher.download_path().exists() {
        println!("  Leftovers:   interrupted download (purged on next fetch)");
    }
    println!();
    Ok(())
}

/// Counts over the extracted archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub processes: usize,
    pub documents: usize,
    pub bytes: u64,
}

impl ArchiveSummary {
    pub fn scan(config: &Config) -> Self {
        let root = &config.archive.root;
        let mut summary = Self::default();
        if let Ok(entries) = std::fs::read_dir(root) {
            summary.processes = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .filter(|e| e.file_name().to_string_lossy().starts_with("SEI_"))
                .count();
        }
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            summary.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            if entry.file_name().to_string_lossy().ends_with(DOCUMENT_SUFFIX) {
                summary.documents += 1;
            }
        }
        summary
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
