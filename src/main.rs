//! Command-line front end: list, probe and stream archive entries.

use anyhow::{Result, bail};
use chrono::DateTime;
use clap::Parser;
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use archivefs::diagnostics::StderrNotifier;
use archivefs::{ArchiveVfs, Cli, DefaultProvider, VirtualDirEntry, VirtualUrl};

const PIPE_BUFFER: usize = 64 * 1024;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.debug || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(if cli.debug {
                    "archivefs=debug".parse()?
                } else {
                    "archivefs=warn".parse()?
                }),
            )
            .init();
    }

    let config = cli.config();
    let provider = DefaultProvider::shared(&config)?;
    let mut vfs = ArchiveVfs::new(provider.clone(), config);
    if !cli.is_quiet() {
        vfs = vfs.with_notifier(Box::new(StderrNotifier));
    }

    let url = cli.url();
    let transferred_before = provider.http().transferred_bytes();

    let code = if cli.exists {
        exists(&vfs, &url, &cli)
    } else if cli.pipe {
        pipe(&vfs, &url, &cli)?
    } else if cli.recursive {
        probe(&vfs, &url, &cli)
    } else {
        list(&vfs, &url, &cli)
    };

    // Display network transfer statistics for HTTP sources
    if cli.is_http_url() && !cli.is_quiet() {
        let transferred = provider.http().transferred_bytes() - transferred_before;
        eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
    }

    Ok(code)
}

fn exists(vfs: &ArchiveVfs, url: &VirtualUrl, cli: &Cli) -> ExitCode {
    let found = vfs.exists(url);
    if !cli.quiet {
        println!("{}: {}", url.path(), if found { "exists" } else { "not found" });
    }
    if found { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn pipe(vfs: &ArchiveVfs, url: &VirtualUrl, cli: &Cli) -> Result<ExitCode> {
    if url.inner.is_empty() {
        bail!("no entry given to pipe");
    }
    let Some(mut session) = vfs.open(url) else {
        eprintln!("archivefs: {} not found in {}", url.inner, url.container);
        return Ok(ExitCode::FAILURE);
    };

    if let Some(offset) = cli.offset {
        let (offset, whence) = if offset < 0 { (offset, 2) } else { (offset, 0) };
        if vfs.seek(Some(&mut session), offset, whence) < 0 {
            vfs.close(Some(session));
            bail!("cannot seek to {offset} in {}", url.inner);
        }
    }

    let mut stdout = std::io::stdout().lock();
    let mut buf = vec![0u8; PIPE_BUFFER];
    let result = loop {
        let n = vfs.read(Some(&mut session), &mut buf);
        if n < 0 {
            break Err(anyhow::anyhow!("error reading {}", url.inner));
        }
        if n == 0 {
            break Ok(());
        }
        if let Err(e) = stdout.write_all(&buf[..n as usize]) {
            break Err(e.into());
        }
    };
    vfs.close(Some(session));
    result?;
    stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn probe(vfs: &ArchiveVfs, url: &VirtualUrl, cli: &Cli) -> ExitCode {
    let Some(probe) = vfs.contains_files(&url.container) else {
        if !cli.quiet {
            eprintln!("archivefs: {} has no browsable contents", url.container);
        }
        return ExitCode::FAILURE;
    };
    if !cli.quiet {
        println!("{}", probe.root);
    }
    print_entries(&probe.entries, cli.verbose);
    ExitCode::SUCCESS
}

fn list(vfs: &ArchiveVfs, url: &VirtualUrl, cli: &Cli) -> ExitCode {
    let entries = vfs.get_directory(url);
    if entries.is_empty() {
        if !cli.quiet {
            eprintln!("archivefs: nothing to list at {}", url.path());
        }
        return ExitCode::FAILURE;
    }
    print_entries(&entries, cli.verbose);
    ExitCode::SUCCESS
}

/// Print entry labels, or a table with sizes and timestamps in verbose mode.
fn print_entries(entries: &[VirtualDirEntry], verbose: bool) {
    if !verbose {
        for entry in entries {
            if entry.is_folder {
                println!("{}/", entry.label);
            } else {
                println!("{}", entry.label);
            }
        }
        return;
    }

    println!("{:>10}  {:>10}  {:>5}  Name", "Length", "Date", "Time");
    println!("{}", "-".repeat(50));

    let mut total = 0u64;
    let mut files = 0usize;
    let mut folders = 0usize;
    for entry in entries {
        let name = if entry.is_folder {
            format!("{}/", entry.label)
        } else {
            entry.label.clone()
        };
        println!("{:>10}  {}  {}", entry.size, format_mtime(entry.mtime), name);
        if entry.is_folder {
            folders += 1;
        } else {
            total += entry.size;
            files += 1;
        }
    }

    println!("{}", "-".repeat(50));
    println!("{:>10}  {:>17}  {} files, {} folders", total, "", files, folders);
}

/// UTC listing timestamp, 17 columns wide.
fn format_mtime(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(time) => time.format("%Y-%m-%d  %H:%M").to_string(),
        None => format!("{:>17}", "-"),
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn listing_timestamps() {
        assert_eq!(format_mtime(0), "1970-01-01  00:00");
        assert_eq!(format_mtime(1_715_953_530), "2024-05-17  13:45");
        assert_eq!(format_mtime(951_782_400), "2000-02-29  00:00");
        assert_eq!(format_mtime(i64::MAX).len(), 17);
    }
}
