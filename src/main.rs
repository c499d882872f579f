//! CLI entry point for `gmail-archiver`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use gmail_archiver::archive::inspect::{list_entries, read_lzma_header, ArchivedEntry, EntryKind};
use gmail_archiver::archive::{compressor_for, xz, ArchiveReport, CompressionKind, MessageOutcome};
use gmail_archiver::config::{self, Config};
use gmail_archiver::error::Result as ArchiveResult;
use gmail_archiver::model::message::{MessageBlob, MessageSummary};
use gmail_archiver::model::thread::Threads;
use gmail_archiver::source::mbox::{build_thread_index, MboxFetcher};
use gmail_archiver::source::{MessageFetcher, SourceFilter};

#[derive(Parser)]
#[command(
    name = "gmail-archiver",
    version,
    about = "Archive Gmail threads as compressed tar files",
    long_about = "Archive Gmail threads from a Takeout MBOX export as compressed tar files.\n\
                  Each thread becomes a directory and each message an .eml file inside it."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, or TOML when it ends in .toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive the threads of an MBOX file
    Archive(ArchiveArgs),
    /// List the threads of an MBOX file
    Threads {
        mbox: PathBuf,
        /// Only include messages carrying this Gmail label
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List the entries of an archive produced by this tool
    Inspect {
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args)]
struct ArchiveArgs {
    /// Gmail Takeout MBOX file
    mbox: PathBuf,
    /// Output archive (default: gmail-archive-<timestamp>.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Compression: lzma, gzip, bzip2 or xz
    #[arg(short, long)]
    compression: Option<String>,
    /// Messages above this size (MiB) are streamed from disk
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=1000))]
    max_message_size_mb: Option<u32>,
    /// Only archive messages carrying this Gmail label
    #[arg(long)]
    label: Option<String>,
    /// Load every message before writing instead of fetching lazily
    #[arg(long)]
    batch: bool,
    /// Write threads in ascending id order instead of file order
    #[arg(long)]
    sort_threads: bool,
    /// Print the archive report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;

    let log_level = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    if let Err(e) = xz::initialize() {
        tracing::warn!(error = %e, "XZ codec unavailable");
    }

    match cli.command {
        Commands::Archive(args) => cmd_archive(&mut config, args),
        Commands::Threads { mbox, label, json } => {
            if label.is_some() {
                config.label = label;
            }
            cmd_threads(&config, &mbox, json)
        }
        Commands::Inspect { archive, json } => cmd_inspect(&archive, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Configure logging: stderr plus a log file in the cache directory.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "gmail-archiver.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "gmail-archiver", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Counts fetched messages on the progress bar.
struct ProgressFetcher<'a> {
    inner: MboxFetcher,
    progress: &'a ProgressBar,
}

impl MessageFetcher for ProgressFetcher<'_> {
    fn fetch(&mut self, summary: &MessageSummary) -> ArchiveResult<MessageBlob> {
        self.progress.inc(1);
        self.inner.fetch(summary)
    }
}

fn cmd_archive(config: &mut Config, args: ArchiveArgs) -> anyhow::Result<()> {
    if let Some(compression) = args.compression {
        config.compression = compression;
    }
    if let Some(size) = args.max_message_size_mb {
        config.max_message_size_mb = size;
    }
    if args.label.is_some() {
        config.label = args.label;
    }
    config.validate()?;

    let kind = config.compression_kind();
    let output = args
        .output
        .unwrap_or_else(|| default_output_path(config, kind, Utc::now()));

    let mut threads = index_with_progress(&args.mbox, &config.source_filter())?;
    if args.sort_threads {
        threads.sort_by_thread_id();
    }

    let compressor = compressor_for(kind, &config.compressor_options());
    let pb = ProgressBar::new(threads.message_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Archiving [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    let mut fetcher = ProgressFetcher {
        inner: MboxFetcher::new(&args.mbox, config.max_message_size_mb),
        progress: &pb,
    };

    let start = Instant::now();
    let report = if args.batch {
        let blobs = threads.try_map(|_, summary| fetcher.fetch(&summary))?;
        compressor.compress(&output, blobs)?
    } else {
        compressor.compress_streaming(&output, &threads, &mut fetcher, config.max_message_size_mb)?
    };
    pb.finish_and_clear();

    let archive_size = std::fs::metadata(&output)?.len();
    if args.json {
        let out = serde_json::json!({
            "output": output.display().to_string(),
            "compression": kind,
            "archiveSize": archive_size,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_archive_summary(&output, kind, archive_size, &report, start);
    }
    Ok(())
}

fn default_output_path(config: &Config, kind: CompressionKind, now: DateTime<Utc>) -> PathBuf {
    let name = format!(
        "gmail-archive-{}.{}",
        now.format("%Y%m%d-%H%M%S"),
        kind.extension()
    );
    match &config.output_directory {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn index_with_progress(path: &Path, filter: &SourceFilter) -> anyhow::Result<Threads<MessageSummary>> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let file_size = std::fs::metadata(path)?.len();
    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Scanning [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let threads = build_thread_index(
        path,
        filter,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();
    Ok(threads)
}

fn print_archive_summary(
    output: &Path,
    kind: CompressionKind,
    archive_size: u64,
    report: &ArchiveReport,
    start: Instant,
) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  Archive complete:");
    println!("  {:<25} {}", "Output file", output.display());
    println!("  {:<25} {}", "Compression", kind);
    println!("  {:<25} {}", "Threads", report.threads_written);
    if !report.empty_threads.is_empty() {
        println!("  {:<25} {}", "Empty threads skipped", report.empty_threads.len());
    }
    println!("  {:<25} {}", "Messages", report.written_count());
    println!(
        "  {:<25} {}",
        "Message data",
        format_size(report.written_bytes(), BINARY)
    );
    println!("  {:<25} {}", "Archive size", format_size(archive_size, BINARY));
    println!("  {:<25} {:.2?}", "Elapsed", start.elapsed());

    let failures: Vec<&MessageOutcome> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("  {} message(s) failed:", failures.len());
        for failure in failures {
            if let MessageOutcome::Failed {
                unique_id,
                stage,
                reason,
                ..
            } = failure
            {
                println!("    {unique_id}  [{stage:?}] {reason}");
            }
        }
    }
    println!();
}

fn cmd_threads(config: &Config, mbox: &Path, json: bool) -> anyhow::Result<()> {
    let threads = index_with_progress(mbox, &config.source_filter())?;

    if json {
        let groups: Vec<_> = threads.iter().collect();
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} thread(s), {} message(s)",
        threads.len(),
        threads.message_count()
    );
    println!();
    println!("  {:<20} {:>6}  {}", "Thread", "Msgs", "Subject");
    println!("  {}", "-".repeat(78));
    for group in &threads {
        let subject = group
            .messages
            .first()
            .and_then(|m| m.subject.as_deref())
            .unwrap_or("(no subject)");
        println!(
            "  {:<20} {:>6}  {}",
            group.thread_id,
            group.messages.len(),
            truncate_chars(subject, 50)
        );
    }
    println!();
    Ok(())
}

fn cmd_inspect(archive: &Path, json: bool) -> anyhow::Result<()> {
    let kind = CompressionKind::from_path(archive)?;
    let entries = list_entries(archive, kind)?;

    if json {
        let out = serde_json::json!({
            "archive": archive.display().to_string(),
            "compression": kind,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_entries_table(archive, kind, &entries)?;
    Ok(())
}

fn print_entries_table(archive: &Path, kind: CompressionKind, entries: &[ArchivedEntry]) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Archive", archive.display());
    println!("  {:<20} {}", "Compression", kind);
    if kind == CompressionKind::Lzma {
        let header = read_lzma_header(archive)?;
        println!(
            "  {:<20} {}",
            "Declared size",
            header
                .uncompressed_size
                .map(|s| format_size(s, BINARY))
                .unwrap_or_else(|| "unknown".to_string())
        );
        println!(
            "  {:<20} {}",
            "Dictionary",
            format_size(header.dictionary_size(), BINARY)
        );
    }
    println!();

    for entry in entries {
        let date = DateTime::from_timestamp(entry.mtime as i64, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let size = match entry.kind {
            EntryKind::Directory => "-".to_string(),
            _ => format_size(entry.size, BINARY),
        };
        println!("  {:<16}  {:>10}  {}", date, size, entry.path);
    }
    println!();
    Ok(())
}

/// Truncate to at most `max` characters, appending `…` when cut.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
