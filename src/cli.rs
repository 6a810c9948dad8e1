//! Command-line interface

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::index::{DomainEntry, IndexSnapshot};
use crate::models::{CleanupReport, RunOutcome, ScanReport};
use crate::progress::{ProgressEvent, Subscription};
use crate::protection::ProtectionPolicy;
use crate::session::{CleanerEngine, CleanupRequest, CollectRequest};

#[derive(Parser, Debug)]
#[command(name = "gmail-cleaner")]
#[command(version = "0.1.0")]
#[command(about = "Bulk-trash Gmail inbox threads by sender domain", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-cleaner/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Options shared by every command that scans the inbox
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Stop after this many threads
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip a domain entirely (repeatable)
    #[arg(long = "exclude", value_name = "DOMAIN")]
    pub excluded_domains: Vec<String>,

    /// Let user labels no longer protect threads
    #[arg(long)]
    pub no_label_protection: bool,

    /// Only these label ids protect threads (repeatable)
    #[arg(long = "protect-label", value_name = "LABEL_ID")]
    pub protected_labels: Vec<String>,
}

impl ScanArgs {
    /// Policy override from the flags, or None to use the configured one
    pub fn policy(&self) -> Option<ProtectionPolicy> {
        if !self.no_label_protection && self.protected_labels.is_empty() {
            return None;
        }
        Some(ProtectionPolicy::from_switches(
            !self.no_label_protection,
            Some(self.protected_labels.clone()),
        ))
    }

    pub fn collect_request(&self) -> CollectRequest {
        CollectRequest {
            limit: self.limit,
            excluded_domains: self.excluded_domains.clone(),
            policy: self.policy(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// List user labels and their ids
    Labels,

    /// Scan the inbox and list sender domains
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Show only the largest N domains
        #[arg(long, default_value_t = 50)]
        top: usize,

        /// Print the domain index as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan, then clean up the named domains
    Clean {
        /// Domains to clean up
        #[arg(required = true, value_name = "DOMAIN")]
        domains: Vec<String>,

        /// Actually move threads to trash (default is a dry run)
        #[arg(long)]
        live: bool,

        /// Process at most this many threads in the cleanup
        #[arg(long)]
        max_threads: Option<usize>,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Scan, pick domains interactively, preview, then trash
    Review {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    /// Render one run's events until its terminal event arrives
    pub fn follow(&self, mut events: Subscription) -> JoinHandle<()> {
        let reporter = Self::with_multi_progress(self.multi.clone());

        tokio::spawn(async move {
            let mut spinner: Option<ProgressBar> = None;
            let mut bar: Option<ProgressBar> = None;

            while let Some(envelope) = events.recv().await {
                let terminal = envelope.event.is_terminal();
                match envelope.event {
                    ProgressEvent::ListingProgress { listed_threads } => {
                        spinner
                            .get_or_insert_with(|| reporter.add_spinner("Listing inbox threads..."))
                            .set_message(format!("Listing inbox threads... {}", listed_threads));
                    }
                    ProgressEvent::CollectionStarted { total_threads } => {
                        if let Some(s) = spinner.take() {
                            reporter.finish_spinner(&s, &format!("Found {} inbox threads", total_threads));
                        }
                        bar = Some(reporter.add_progress_bar(total_threads as u64, "Collecting"));
                    }
                    ProgressEvent::ThreadProcessed {
                        processed_threads,
                        unique_domains,
                        ..
                    } => {
                        if let Some(b) = &bar {
                            b.set_position(processed_threads as u64);
                            b.set_message(format!("{} domains", unique_domains));
                        }
                    }
                    ProgressEvent::CleanupStarted {
                        threads_to_process,
                        dry_run,
                        ..
                    } => {
                        let label = if dry_run { "Previewing" } else { "Trashing" };
                        bar = Some(reporter.add_progress_bar(threads_to_process as u64, label));
                    }
                    ProgressEvent::ThreadKept { .. }
                    | ProgressEvent::WouldDelete { .. }
                    | ProgressEvent::Deleted { .. } => {
                        if let Some(b) = &bar {
                            b.inc(1);
                        }
                    }
                    ProgressEvent::Error {
                        message,
                        thread_id: Some(thread_id),
                        ..
                    } => {
                        let _ = reporter
                            .multi
                            .println(format!("  ! thread {}: {}", thread_id, message));
                    }
                    _ => {}
                }

                if terminal {
                    if let Some(s) = spinner.take() {
                        s.finish_and_clear();
                    }
                    if let Some(b) = bar.take() {
                        b.finish_and_clear();
                    }
                    break;
                }
            }
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// A domain offered in the review picker
#[derive(Debug, Clone)]
struct DomainChoice {
    domain: String,
    count: usize,
    messages: usize,
}

impl From<&DomainEntry> for DomainChoice {
    fn from(entry: &DomainEntry) -> Self {
        Self {
            domain: entry.domain.clone(),
            count: entry.count,
            messages: entry.threads.iter().map(|t| t.message_count).sum(),
        }
    }
}

impl fmt::Display for DomainChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40} {:>5} threads {:>6} messages",
            truncate_string(&self.domain, 40),
            self.count,
            self.messages
        )
    }
}

/// Run a scan with progress display
pub async fn scan_inbox(
    engine: &CleanerEngine,
    reporter: &ProgressReporter,
    args: &ScanArgs,
) -> anyhow::Result<ScanReport> {
    let renderer = reporter.follow(engine.subscribe());
    let report = match engine.collect(args.collect_request()).await {
        Ok(report) => report,
        Err(e) => {
            renderer.abort();
            return Err(e.into());
        }
    };
    let _ = renderer.await;

    match &report.outcome {
        RunOutcome::Completed => info!(
            "Scanned {} threads into {} domains",
            report.totals.processed_threads, report.totals.unique_domains
        ),
        RunOutcome::Cancelled => println!("Scan cancelled; showing partial results"),
        RunOutcome::Failed(reason) => println!("Scan stopped early: {}", reason),
    }
    Ok(report)
}

/// Run a cleanup with progress display
pub async fn clean_domains(
    engine: &CleanerEngine,
    reporter: &ProgressReporter,
    request: CleanupRequest,
) -> anyhow::Result<CleanupReport> {
    let renderer = reporter.follow(engine.subscribe());
    let report = match engine.cleanup(request).await {
        Ok(report) => report,
        Err(e) => {
            renderer.abort();
            return Err(e.into());
        }
    };
    let _ = renderer.await;
    Ok(report)
}

pub fn format_scan_summary(report: &ScanReport) -> String {
    let t = &report.totals;
    format!(
        "Threads: {} processed of {} listed\n\
         Domains: {}\n\
         Indexed: {}  Protected: {}  Excluded: {}  No sender: {}  Failed: {}",
        t.processed_threads,
        t.total_threads,
        t.unique_domains,
        t.indexed_threads,
        t.protected_threads,
        t.excluded_threads,
        t.unattributed_threads,
        t.failed_threads
    )
}

pub fn format_cleanup_summary(report: &CleanupReport) -> String {
    let t = &report.totals;
    let (verb, mode) = if report.dry_run {
        ("Would trash", "DRY RUN")
    } else {
        ("Trashed", "LIVE")
    };
    let mut summary = format!(
        "[{}] {} {} threads ({} messages); kept {} messages; {} of {} threads failed",
        mode, verb, t.threads_deleted, t.messages_deleted, t.messages_kept, t.threads_failed, t.threads_processed
    );
    match &report.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Cancelled => summary.push_str("\nCleanup was cancelled before finishing"),
        RunOutcome::Failed(reason) => {
            summary.push_str(&format!("\nCleanup stopped early: {}", reason))
        }
    }
    summary
}

pub fn print_domains(snapshot: &IndexSnapshot, top: usize) {
    println!("\n{:<40} {:>8} {:>9}", "DOMAIN", "THREADS", "MESSAGES");
    for entry in snapshot.domains.iter().take(top) {
        let messages: usize = entry.threads.iter().map(|t| t.message_count).sum();
        println!(
            "{:<40} {:>8} {:>9}",
            truncate_string(&entry.domain, 40),
            entry.count,
            messages
        );
    }
    if snapshot.total_domains > top {
        println!("... and {} more domains", snapshot.total_domains - top);
    }
}

/// Interactive flow: scan, pick domains, preview, confirm, trash
pub async fn run_review(
    engine: &CleanerEngine,
    reporter: &ProgressReporter,
    args: &ScanArgs,
) -> anyhow::Result<()> {
    let scan = scan_inbox(engine, reporter, args).await?;
    println!("{}", format_scan_summary(&scan));

    let snapshot = engine.get_domains().await;
    if snapshot.domains.is_empty() {
        println!("No unprotected threads found.");
        return Ok(());
    }

    let choices: Vec<DomainChoice> = snapshot.domains.iter().map(DomainChoice::from).collect();
    let selected = inquire::MultiSelect::new("Select domains to clean up:", choices)
        .with_page_size(20)
        .prompt()
        .context("domain selection aborted")?;

    if selected.is_empty() {
        println!("Nothing selected.");
        return Ok(());
    }

    let domains: Vec<String> = selected.into_iter().map(|c| c.domain).collect();
    let policy = args.policy();

    let preview = clean_domains(
        engine,
        reporter,
        CleanupRequest {
            domains: domains.clone(),
            dry_run: true,
            limit: None,
            policy: policy.clone(),
        },
    )
    .await?;
    println!("{}", format_cleanup_summary(&preview));

    if preview.totals.threads_deleted == 0 {
        return Ok(());
    }

    let confirmed = inquire::Confirm::new(&format!(
        "Move {} threads to trash?",
        preview.totals.threads_deleted
    ))
    .with_default(false)
    .prompt()
    .context("confirmation aborted")?;

    if !confirmed {
        println!("No changes made.");
        return Ok(());
    }

    let live = clean_domains(
        engine,
        reporter,
        CleanupRequest {
            domains,
            dry_run: false,
            limit: None,
            policy,
        },
    )
    .await?;
    println!("{}", format_cleanup_summary(&live));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CleanupTotals, ScanTotals};
    use crate::protection::LabelProtection;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a-very-long-domain.example.com", 10), "a-very-...");
    }

    #[test]
    fn test_scan_args_policy() {
        assert_eq!(ScanArgs::default().policy(), None);

        let args = ScanArgs {
            no_label_protection: true,
            ..Default::default()
        };
        assert_eq!(args.policy().unwrap().label_mode, LabelProtection::None);

        let args = ScanArgs {
            protected_labels: vec!["Label_7".to_string()],
            ..Default::default()
        };
        assert_eq!(
            args.policy().unwrap().label_mode,
            LabelProtection::Subset(["Label_7".to_string()].into_iter().collect())
        );
    }

    #[test]
    fn test_cli_parses_clean_command() {
        let cli = Cli::try_parse_from([
            "gmail-cleaner",
            "clean",
            "shop.com",
            "news.example.com",
            "--live",
            "--exclude",
            "bank.com",
        ])
        .unwrap();

        match cli.command {
            Commands::Clean {
                domains, live, scan, ..
            } => {
                assert_eq!(domains, vec!["shop.com", "news.example.com"]);
                assert!(live);
                assert_eq!(scan.excluded_domains, vec!["bank.com"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_clean_requires_domains() {
        assert!(Cli::try_parse_from(["gmail-cleaner", "clean"]).is_err());
    }

    #[test]
    fn test_format_cleanup_summary() {
        let report = CleanupReport {
            session_id: Uuid::new_v4(),
            dry_run: true,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            totals: CleanupTotals {
                threads_processed: 3,
                threads_deleted: 2,
                messages_deleted: 5,
                messages_kept: 1,
                threads_failed: 0,
            },
            deleted_thread_ids: vec![],
            kept_thread_ids: vec![],
            outcome: RunOutcome::Completed,
        };

        let summary = format_cleanup_summary(&report);
        assert!(summary.starts_with("[DRY RUN] Would trash 2 threads (5 messages)"));
    }

    #[test]
    fn test_format_scan_summary() {
        let report = ScanReport {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            totals: ScanTotals {
                total_threads: 10,
                processed_threads: 9,
                unique_domains: 4,
                failed_threads: 1,
                ..Default::default()
            },
            outcome: RunOutcome::Completed,
        };
        assert!(format_scan_summary(&report).contains("9 processed of 10 listed"));
    }
}
