//! Main entry point for the stowzip CLI application.
//!
//! Creates archives from local files and directories, and lists, extracts
//! or tests archives on the local filesystem or at HTTP URLs.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use jiff::Timestamp;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use walkdir::WalkDir;

use stowzip::cli::{Command, CreateArgs, ExtractArgs, ListArgs, TestArgs, is_http_url};
use stowzip::logging::{Level, setup_logging};
use stowzip::{
    ArchiveWriter, CdHeader, Cli, Entry, HttpRangeReader, LocalFileReader, ReadAt, ZipError,
    ZipExtractor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(if cli.verbose {
        Level::Verbose
    } else {
        Level::Default
    });

    match cli.command {
        Command::Create(args) => create(&args).await,
        Command::List(args) => {
            let source = Source::open(&args.file).await?;
            list(&source, &args).await?;
            source.report_transfer(false);
            Ok(())
        }
        Command::Extract(args) => {
            let source = Source::open(&args.file).await?;
            extract(&source, &args).await?;
            source.report_transfer(args.is_quiet());
            Ok(())
        }
        Command::Test(args) => {
            let source = Source::open(&args.file).await?;
            test(&source, &args).await?;
            source.report_transfer(args.quiet);
            Ok(())
        }
    }
}

/// An archive on disk or behind an HTTP URL.
enum Source {
    Local(LocalFileReader),
    Http(HttpRangeReader),
}

impl Source {
    async fn open(file: &str) -> Result<Arc<Self>> {
        let source = if is_http_url(file) {
            Source::Http(HttpRangeReader::new(file.to_string()).await?)
        } else {
            Source::Local(
                LocalFileReader::new(Path::new(file))
                    .with_context(|| format!("Failed to open `{file}`"))?,
            )
        };
        Ok(Arc::new(source))
    }

    /// Display network transfer statistics for HTTP sources.
    fn report_transfer(&self, quiet: bool) {
        if let Source::Http(reader) = self {
            if !quiet {
                eprintln!(
                    "\nTotal bytes transferred: {}",
                    format_size(reader.transferred_bytes())
                );
            }
        }
    }
}

#[async_trait]
impl ReadAt for Source {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Local(reader) => reader.read_at(offset, buf).await,
            Source::Http(reader) => reader.read_at(offset, buf).await,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Source::Local(reader) => reader.size(),
            Source::Http(reader) => reader.size(),
        }
    }
}

/// Archive every path in order, walking directories in sorted order.
async fn create(args: &CreateArgs) -> Result<()> {
    let file = tokio::fs::File::create(&args.archive)
        .await
        .with_context(|| format!("Failed to create `{}`", args.archive))?;
    let archive_path = std::fs::canonicalize(&args.archive).ok();
    let mut writer = ArchiveWriter::new(tokio::io::BufWriter::new(file));

    for path in &args.paths {
        let root = Path::new(path);
        // `export/` is archived as `export/...`; `.` contributes only its children.
        let prefix = root.file_name().map(PathBuf::from);

        for dir_entry in WalkDir::new(root).sort_by_file_name() {
            let dir_entry = dir_entry?;
            let relative = dir_entry.path().strip_prefix(root)?;
            let name = match &prefix {
                Some(prefix) => archive_name(&prefix.join(relative)),
                None => archive_name(relative),
            };
            if name.is_empty() {
                continue;
            }
            if archive_path.is_some()
                && std::fs::canonicalize(dir_entry.path()).ok() == archive_path
            {
                continue;
            }

            let metadata = dir_entry.metadata()?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|time| Timestamp::try_from(time).ok())
                .unwrap_or_else(Timestamp::now);

            let entry = if metadata.is_dir() {
                Entry::directory(name, mtime)
            } else if metadata.is_file() {
                let file = tokio::fs::File::open(dir_entry.path())
                    .await
                    .with_context(|| format!("Failed to open `{}`", dir_entry.path().display()))?;
                Entry::from_reader(name, mtime, file)
            } else {
                warn!("Skipping `{}`: not a regular file", dir_entry.path().display());
                continue;
            };

            if !args.quiet {
                println!("  adding: {}", entry.name);
            }
            writer.write_entry(entry).await?;
        }
    }

    let entries = writer.entry_count();
    let mut sink = writer.finish(args.comment.as_deref()).await?;
    sink.shutdown().await?;

    if !args.quiet {
        println!("{} entries written to {}", entries, args.archive);
    }
    Ok(())
}

/// Name of a relative path inside the archive: normal components joined by `/`.
fn archive_name(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// List files in the archive.
///
/// Supports two output formats:
/// - Simple format: just file names, one per line
/// - Verbose format (`-v`): table with size, timestamp and CRC-32
async fn list(source: &Arc<Source>, args: &ListArgs) -> Result<()> {
    let extractor = ZipExtractor::open(source.clone()).await?;
    let entries = extractor.list_files().await?;

    if !args.long_format {
        for entry in &entries {
            println!("{}", entry.name());
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>8}  Name",
        "Length", "Date", "Time", "CRC-32"
    );
    println!("{}", "-".repeat(60));

    let mut total = 0u64;
    let mut file_count = 0usize;
    for entry in &entries {
        println!(
            "{:>10}  {}  {:08x}  {}",
            entry.uncompressed_size,
            entry.mtime().strftime("%Y-%m-%d  %H:%M"),
            entry.crc32,
            entry.name()
        );

        // Accumulate totals (excluding directories)
        if !entry.is_directory() {
            total += entry.uncompressed_size as u64;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(60));
    println!("{:>10}  {:>29}  {} files", total, "", file_count);

    if !extractor.comment().is_empty() {
        println!("\n{}", extractor.comment());
    }

    Ok(())
}

/// Extract the entries selected by the positional filters and `-x` patterns.
async fn extract(source: &Arc<Source>, args: &ExtractArgs) -> Result<()> {
    let extractor = ZipExtractor::open(source.clone()).await?;
    let entries = extractor.list_files().await?;

    // Apply filters to determine which files to extract:
    // 1. If specific files are requested, only include matching entries
    // 2. Exclude files matching the exclusion patterns
    let selected: Vec<_> = entries
        .iter()
        .filter(|e| {
            if !args.files.is_empty() {
                let matches = args.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        glob_match(f, e.name())
                    } else {
                        // No wildcards: exact match on filename or full path
                        e.name() == f.as_str() || base_name(e.name()) == f.as_str()
                    }
                });
                if !matches {
                    return false;
                }
            }

            !args
                .exclude
                .iter()
                .any(|x| e.name().contains(x.as_str()) || glob_match(x, e.name()))
        })
        .collect();

    // Pipe mode concatenates files on stdout; mark boundaries when there are several.
    let show_filename = args.pipe && selected.iter().filter(|e| !e.is_directory()).count() > 1;
    for entry in selected {
        extract_entry(&extractor, entry, args, show_filename).await?;
    }

    Ok(())
}

/// Extract a single entry, honoring the pipe, directory, junk-path and overwrite options.
async fn extract_entry<R: ReadAt + 'static>(
    extractor: &ZipExtractor<R>,
    entry: &CdHeader,
    args: &ExtractArgs,
    show_filename: bool,
) -> Result<()> {
    if !is_safe_name(entry.name()) {
        warn!("Skipping `{}`: path escapes the extraction directory", entry.name());
        return Ok(());
    }

    if args.pipe {
        if entry.is_directory() {
            return Ok(());
        }
        if show_filename {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("--- {} ---\n", entry.name()).as_bytes())
                .await?;
        }
        return Ok(extractor.extract_to_stdout(entry).await?);
    }

    // Junk paths: use only the base filename, ignore directory structure
    if args.junk_paths && entry.is_directory() {
        return Ok(());
    }
    let file_name = if args.junk_paths {
        base_name(entry.name())
    } else {
        entry.name()
    };
    let output_path = match &args.extract_dir {
        Some(dir) => PathBuf::from(dir).join(file_name),
        None => PathBuf::from(file_name),
    };

    if output_path.exists() && !entry.is_directory() {
        if args.never_overwrite {
            if !args.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.name());
            }
            return Ok(());
        }
        if !args.overwrite {
            if !args.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name());
            }
            return Ok(());
        }
    }

    if !args.is_quiet() {
        if entry.is_directory() {
            println!("   creating: {}", entry.name());
        } else {
            println!("  extracting: {}", entry.name());
        }
    }

    extractor.extract_to_file(entry, &output_path).await?;
    Ok(())
}

/// Verify every entry's CRC32, like `unzip -t`.
async fn test(source: &Arc<Source>, args: &TestArgs) -> Result<()> {
    let extractor = ZipExtractor::open(source.clone()).await?;
    let entries = extractor.list_files().await?;

    let mut failures = 0usize;
    for entry in &entries {
        match extractor.verify_entry(entry).await {
            Ok(()) => {
                if !args.quiet {
                    println!("    testing: {:<50} OK", entry.name());
                }
            }
            Err(err @ ZipError::ChecksumMismatch { .. }) => {
                failures += 1;
                println!("    testing: {:<50} {}", entry.name(), err);
            }
            Err(err) => return Err(err.into()),
        }
    }

    if failures > 0 {
        bail!("{failures} of {} entries failed the CRC check", entries.len());
    }
    if !args.quiet {
        println!("No errors detected in {} entries of {}", entries.len(), args.file);
    }
    Ok(())
}

/// Only plain relative paths may be written to disk.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn base_name(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Iterative matcher with single-star backtracking.
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
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
