//! xfer - Command-line interface for the batch transfer engine.
//!
//! Uploads local files and folders into a storage directory, or downloads from
//! it, through the engine's resilient batch loop. Name collisions are asked
//! about on stdin unless a file-exists policy says otherwise.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use xfer_engine::{
    conflict_channel, BatchCallback, BatchEntry, BatchOrchestrator, BatchSummary, BreakerStatus,
    ConflictRequest, Direction, FileExistsPolicy, LocalExecutor, OverwriteAction,
    OverwriteDecision, TransferExecutor, TransferItem, TransferStatus,
};

use config::{load_config, ConfigOverrides};

/// xfer - Resilient batch file transfers
#[derive(Parser, Debug)]
#[command(name = "xfer")]
#[command(version = "0.1.0")]
#[command(about = "Upload or download batches of files with retries and conflict handling")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: xfer.toml in the user config directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// File exists policy: ask, overwrite, resume, skip, rename,
    /// overwrite-if-newer or overwrite-if-different
    #[arg(long, value_name = "POLICY", global = true)]
    overwrite: Option<String>,

    /// Attempts per file before giving up on it
    #[arg(long, value_name = "N", global = true)]
    max_retries: Option<u32>,

    /// Consecutive failures that halt the batch
    #[arg(long, value_name = "N", global = true)]
    max_errors: Option<u32>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload local files or folders into the storage directory
    Upload {
        /// Directory acting as the remote storage
        #[arg(long, value_name = "PATH")]
        remote_root: PathBuf,

        /// Remote directory to upload into
        #[arg(long, value_name = "REMOTE_DIR", default_value = "/")]
        to: PathBuf,

        /// Local files or folders
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,
    },
    /// Download files or folders from the storage directory
    Download {
        /// Directory acting as the remote storage
        #[arg(long, value_name = "PATH")]
        remote_root: PathBuf,

        /// Local directory to download into
        #[arg(long, value_name = "LOCAL_DIR")]
        to: PathBuf,

        /// Remote paths, relative to the storage root
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,
    },
}

impl Command {
    fn remote_root(&self) -> &Path {
        match self {
            Command::Upload { remote_root, .. } | Command::Download { remote_root, .. } => remote_root,
        }
    }
}

/// CLI implementation of BatchCallback: one line per finished item.
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl BatchCallback for CliProgress {
    fn on_batch_started(&self, batch_id: Uuid, total_items: usize) {
        eprintln!("Starting batch of {} items", total_items);
        if self.verbose {
            eprintln!("  Batch: {}", batch_id);
        }
    }

    fn on_item_started(&self, item: &TransferItem) {
        if self.verbose {
            eprintln!("[{:>3}] Starting: {} ({})", item.id.0, item.filename, item.direction);
        }
    }

    fn on_item_retry(&self, item_name: &str, attempt: u32, delay: Duration) {
        eprintln!(
            "      Retrying {} (attempt {}) in {:.1}s",
            item_name,
            attempt,
            delay.as_secs_f64()
        );
    }

    fn on_item_finished(&self, item: &TransferItem) {
        let folder = match (item.is_folder, item.completed_files, item.total_files) {
            (true, Some(done), Some(total)) => format!(" [{}/{} files]", done, total),
            _ => String::new(),
        };
        match item.status {
            TransferStatus::Completed => eprintln!(
                "[{:>3}] Done: {} ({}){}",
                item.id.0,
                item.filename,
                Self::format_bytes(item.size),
                folder
            ),
            TransferStatus::Error => eprintln!(
                "[{:>3}] Failed: {}: {}{}",
                item.id.0,
                item.filename,
                item.error.as_deref().unwrap_or("(unknown error)"),
                folder
            ),
            _ => {}
        }
    }

    fn on_breaker_tripped(&self, status: &BreakerStatus) {
        let kind = status
            .tripped_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!();
        eprintln!("Batch halted ({:?}, last error: {}).", status.pause_reason, kind);
        eprintln!("Remaining items were left pending.");
    }

    fn on_batch_completed(&self, summary: &BatchSummary) {
        eprintln!();
        eprintln!(
            "Summary: {} transferred, {} skipped, {} failed, {} cancelled",
            summary.succeeded,
            summary.skipped,
            summary.failed,
            summary.cancelled.len()
        );
        if summary.folder_files_skipped > 0 {
            eprintln!("Unchanged files inside folders: {}", summary.folder_files_skipped);
        }
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

/// Parse one answer to the conflict prompt.
///
/// Lowercase letters decide for this file, uppercase for the rest of the
/// batch. `r` may be followed by a new name.
fn parse_answer(line: &str) -> Option<OverwriteDecision> {
    let line = line.trim();
    let mut chars = line.chars();
    let first = chars.next()?;
    let rest = chars.as_str().trim();

    let decision = match first.to_ascii_lowercase() {
        'o' => OverwriteDecision::overwrite(),
        's' => OverwriteDecision::skip(),
        // no name: the engine picks "name (n).ext"
        'r' if rest.is_empty() => OverwriteDecision {
            action: OverwriteAction::Rename,
            new_name: None,
            apply_to_all: false,
        },
        'r' => OverwriteDecision::rename(rest),
        'c' => return Some(OverwriteDecision::cancel()),
        _ => return None,
    };

    if first.is_ascii_uppercase() {
        Some(decision.for_all())
    } else {
        Some(decision)
    }
}

fn describe_side(request: &ConflictRequest) -> (String, String) {
    let show = |size: u64, modified: Option<chrono::DateTime<chrono::Utc>>| {
        let when = modified
            .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        format!("{}, {}", CliProgress::format_bytes(size), when)
    };
    (
        show(request.source.size, request.source.modified),
        show(request.destination.size, request.destination.modified),
    )
}

/// Ask about one collision until a valid answer is given. End of input cancels.
fn ask_conflict<R: BufRead, W: Write>(
    request: &ConflictRequest,
    input: &mut R,
    output: &mut W,
) -> OverwriteDecision {
    let (source, destination) = describe_side(request);
    let _ = writeln!(output, "\"{}\" already exists at the destination.", request.destination.name);
    let _ = writeln!(output, "  source:      {}", source);
    let _ = writeln!(output, "  destination: {}", destination);
    if request.queue_count > 0 {
        let _ = writeln!(output, "  {} more items queued (uppercase applies to all)", request.queue_count);
    }

    loop {
        let _ = write!(output, "[o]verwrite / [s]kip / [r]ename / [c]ancel: ");
        let _ = output.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return OverwriteDecision::cancel(),
            Ok(_) => {}
        }
        if let Some(decision) = parse_answer(&line) {
            return decision;
        }
    }
}

/// Build batch entries for local sources.
fn upload_entries(sources: &[PathBuf], to: &Path) -> Result<Vec<BatchEntry>> {
    sources
        .iter()
        .map(|source| {
            let metadata = std::fs::metadata(source)
                .with_context(|| format!("Source does not exist: {}", source.display()))?;
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("Source has no file name: {}", source.display()))?;
            Ok(BatchEntry {
                name,
                source: source.clone(),
                destination_dir: to.to_path_buf(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: xfer_engine::fs_ops::modified_time(&metadata),
                direction: Direction::Upload,
                is_dir: metadata.is_dir(),
            })
        })
        .collect()
}

/// Build batch entries for remote sources by looking each one up in its
/// parent listing.
async fn download_entries(
    executor: &dyn TransferExecutor,
    sources: &[PathBuf],
    to: &Path,
) -> Result<Vec<BatchEntry>> {
    let mut entries = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Source has no file name: {}", source.display()))?;
        let parent = source.parent().unwrap_or_else(|| Path::new("/"));

        let listing = executor
            .list_directory(parent)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to list {}", parent.display()))?;
        let Some(found) = listing.into_iter().find(|e| e.name == name) else {
            bail!("Remote source does not exist: {}", source.display());
        };

        entries.push(BatchEntry {
            name,
            source: source.clone(),
            destination_dir: to.to_path_buf(),
            size: found.size,
            modified: found.modified,
            direction: Direction::Download,
            is_dir: found.is_dir,
        });
    }
    Ok(entries)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Ctrl-C cancels the batch between files
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_signal.cancel();
        }
    });

    let exit_code = match run_cli(&cli, cancel).await {
        Ok(summary) if summary.is_clean() => 0,
        Ok(_) => 1,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
async fn run_cli(cli: &Cli, cancel: CancellationToken) -> Result<BatchSummary> {
    let file_exists = cli
        .overwrite
        .as_deref()
        .map(str::parse::<FileExistsPolicy>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let overrides = ConfigOverrides {
        file_exists,
        max_retries_per_file: cli.max_retries,
        max_consecutive_errors: cli.max_errors,
    };
    let config = load_config(cli.config.as_deref(), &overrides)?;

    let remote_root = cli.command.remote_root();
    if !remote_root.is_dir() {
        bail!("Remote root is not a directory: {}", remote_root.display());
    }
    let executor = Arc::new(LocalExecutor::new(remote_root));

    let entries = match &cli.command {
        Command::Upload { to, sources, .. } => upload_entries(sources, to)?,
        Command::Download { to, sources, .. } => {
            std::fs::create_dir_all(to)
                .with_context(|| format!("Failed to create {}", to.display()))?;
            download_entries(executor.as_ref(), sources, to).await?
        }
    };

    let orchestrator = BatchOrchestrator::new(executor, config)?;
    let progress = CliProgress::new(cli.verbose);

    let summary =
        run_with_prompter(&orchestrator, entries, &progress, cancel, || io::stdin().lock()).await?;
    Ok(summary)
}

/// Run one batch, answering conflict questions from `open_input` one at a time.
///
/// A blocking read cannot be interrupted, so once the batch is over the
/// prompter is aborted instead of awaited. A question cancelled by Ctrl-C
/// must not keep the process waiting for a line of input.
async fn run_with_prompter<F, R>(
    orchestrator: &BatchOrchestrator,
    entries: Vec<BatchEntry>,
    progress: &CliProgress,
    cancel: CancellationToken,
    open_input: F,
) -> xfer_engine::Result<BatchSummary>
where
    F: Fn() -> R + Clone + Send + 'static,
    R: BufRead,
{
    let (prompt, mut requests) = conflict_channel();
    let prompter = tokio::spawn(async move {
        while let Some(pending) = requests.recv().await {
            let request = pending.request.clone();
            let open_input = open_input.clone();
            let decision = tokio::task::spawn_blocking(move || {
                ask_conflict(&request, &mut open_input(), &mut io::stderr())
            })
            .await
            .unwrap_or_else(|_| OverwriteDecision::cancel());
            pending.resolve(decision);
        }
    });

    let result = orchestrator
        .run_batch(entries, &prompt, Some(progress), cancel)
        .await;

    drop(prompt);
    prompter.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn upload_cli(remote: &Path, sources: Vec<PathBuf>, overwrite: Option<&str>) -> Cli {
        Cli {
            command: Command::Upload {
                remote_root: remote.to_path_buf(),
                to: PathBuf::from("/"),
                sources,
            },
            config: None,
            overwrite: overwrite.map(str::to_string),
            max_retries: None,
            max_errors: None,
            verbose: false,
        }
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("o"), Some(OverwriteDecision::overwrite()));
        assert_eq!(parse_answer("S\n"), Some(OverwriteDecision::skip().for_all()));
        assert_eq!(parse_answer("c"), Some(OverwriteDecision::cancel()));
        assert_eq!(parse_answer("x"), None);
        assert_eq!(parse_answer(""), None);

        let rename = parse_answer("r notes-v2.txt").unwrap();
        assert_eq!(rename.action, OverwriteAction::Rename);
        assert_eq!(rename.new_name.as_deref(), Some("notes-v2.txt"));

        let auto = parse_answer("R").unwrap();
        assert_eq!(auto.action, OverwriteAction::Rename);
        assert!(auto.new_name.is_none());
        assert!(auto.apply_to_all);
    }

    #[test]
    fn test_ask_conflict_reprompts_until_valid() {
        let request = ConflictRequest {
            source: xfer_engine::FileDescriptor {
                name: "a.txt".to_string(),
                size: 10,
                modified: None,
                is_remote: false,
            },
            destination: xfer_engine::FileDescriptor {
                name: "a.txt".to_string(),
                size: 12,
                modified: None,
                is_remote: true,
            },
            queue_count: 2,
        };
        let mut input = io::Cursor::new("what\ns\n");
        let mut output = Vec::new();

        let decision = ask_conflict(&request, &mut input, &mut output);
        assert_eq!(decision, OverwriteDecision::skip());
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("already exists"));
        assert!(shown.contains("2 more items"));
    }

    #[test]
    fn test_ask_conflict_eof_cancels() {
        let request = ConflictRequest {
            source: xfer_engine::FileDescriptor {
                name: "a.txt".to_string(),
                size: 1,
                modified: None,
                is_remote: false,
            },
            destination: xfer_engine::FileDescriptor {
                name: "a.txt".to_string(),
                size: 1,
                modified: None,
                is_remote: true,
            },
            queue_count: 0,
        };
        let decision = ask_conflict(&request, &mut io::Cursor::new(""), &mut Vec::new());
        assert_eq!(decision.action, OverwriteAction::Cancel);
    }

    #[tokio::test]
    async fn test_cli_uploads_files() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let remote_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        fs::write(&file, "hello").expect("Failed to write file");

        let cli = upload_cli(remote_dir.path(), vec![file], Some("overwrite"));
        let summary = run_cli(&cli, CancellationToken::new()).await.unwrap();

        assert!(summary.is_clean());
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs::read_to_string(remote_dir.path().join("test.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_cli_downloads_folder() {
        let remote_dir = TempDir::new().expect("Failed to create temp dir");
        let local_dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(remote_dir.path().join("docs/sub")).unwrap();
        fs::write(remote_dir.path().join("docs/a.txt"), "a").unwrap();
        fs::write(remote_dir.path().join("docs/sub/b.txt"), "b").unwrap();

        let cli = Cli {
            command: Command::Download {
                remote_root: remote_dir.path().to_path_buf(),
                to: local_dir.path().join("out"),
                sources: vec![PathBuf::from("/docs")],
            },
            config: None,
            overwrite: Some("skip".to_string()),
            max_retries: None,
            max_errors: None,
            verbose: false,
        };
        let summary = run_cli(&cli, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs::read_to_string(local_dir.path().join("out/docs/sub/b.txt")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_cli_rejects_missing_source() {
        let remote_dir = TempDir::new().expect("Failed to create temp dir");
        let cli = upload_cli(remote_dir.path(), vec![PathBuf::from("/nonexistent/path")], None);
        assert!(run_cli(&cli, CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_cli_rejects_invalid_policy() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let remote_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        fs::write(&file, "hello").unwrap();

        let cli = upload_cli(remote_dir.path(), vec![file], Some("sometimes"));
        assert!(run_cli(&cli, CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_cli_rejects_missing_remote_root() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let file = src_dir.path().join("test.txt");
        fs::write(&file, "hello").unwrap();

        let cli = upload_cli(&src_dir.path().join("no-such-root"), vec![file], None);
        assert!(run_cli(&cli, CancellationToken::new()).await.is_err());
    }

    /// Input whose reads block until the test releases them, then hit EOF.
    struct BlockedInput {
        reading: tokio::sync::mpsc::UnboundedSender<()>,
        release: Arc<std::sync::Mutex<std::sync::mpsc::Receiver<()>>>,
    }

    impl io::Read for BlockedInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.reading.send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_cancel_returns_while_prompt_reads_input() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let remote_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(src_dir.path().join("a.txt"), "new").expect("Failed to write file");
        fs::write(remote_dir.path().join("a.txt"), "old").expect("Failed to write file");

        let executor = Arc::new(LocalExecutor::new(remote_dir.path()));
        let orchestrator = BatchOrchestrator::new(executor, xfer_engine::EngineConfig::default())
            .expect("Failed to create orchestrator");
        let entries = vec![BatchEntry {
            name: "a.txt".to_string(),
            source: src_dir.path().join("a.txt"),
            destination_dir: PathBuf::from("/"),
            size: 3,
            modified: None,
            direction: Direction::Upload,
            is_dir: false,
        }];

        let (reading_tx, mut reading_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release = Arc::new(std::sync::Mutex::new(release_rx));
        let open_input = move || {
            io::BufReader::new(BlockedInput {
                reading: reading_tx.clone(),
                release: Arc::clone(&release),
            })
        };

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            reading_rx.recv().await;
            canceller.cancel();
        });

        let progress = CliProgress::new(false);
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_with_prompter(&orchestrator, entries, &progress, cancel, open_input),
        )
        .await;
        // let the blocked read finish so the runtime can shut down
        drop(release_tx);

        let summary = result.expect("batch should not wait for input").unwrap();
        assert!(summary.was_cancelled());
        assert_eq!(fs::read_to_string(remote_dir.path().join("a.txt")).unwrap(), "old");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(CliProgress::format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
