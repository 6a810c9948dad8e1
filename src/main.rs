use anyhow::Result;
use clap::Parser;
use gmail_domain_cleaner::auth::{self, AuthPaths, MODIFY_SCOPE};
use gmail_domain_cleaner::cli::{self, Cli, Commands, LogFormat, ProgressReporter};
use gmail_domain_cleaner::client::GmailMailboxClient;
use gmail_domain_cleaner::config::Config;
use gmail_domain_cleaner::error::GmailError;
use gmail_domain_cleaner::session::{CleanerEngine, CleanupRequest};
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: MultiProgress,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(self.multi.clone())
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        eprintln!("\nFor help, run: gmail-cleaner --help");
        process::exit(1);
    }
}

fn init_tracing(cli: &Cli, multi: &MultiProgress) {
    let default_filter = if cli.verbose {
        "gmail_domain_cleaner=debug,info"
    } else {
        "gmail_domain_cleaner=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let make_writer = MultiProgressMakeWriter {
        multi: multi.clone(),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_engine(cli: &Cli, config: Config) -> Result<CleanerEngine> {
    let hub = auth::initialize_gmail_hub(&auth_paths(cli)).await?;
    let client = GmailMailboxClient::new(
        hub,
        config.retry.policy(),
        config.cleanup.max_concurrent_mutations,
    );
    let engine = CleanerEngine::new(Arc::new(client), config);

    // Ctrl-C stops the running scan or cleanup between items
    let cancel_handle = engine.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !cancel_handle.cancel() {
                process::exit(130);
            }
        }
    });

    Ok(engine)
}

fn auth_paths(cli: &Cli) -> AuthPaths {
    AuthPaths {
        credentials: cli.credentials.clone(),
        token_cache: cli.token_cache.clone(),
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let multi_progress = MultiProgress::new();
    init_tracing(&cli, &multi_progress);
    let reporter = ProgressReporter::with_multi_progress(multi_progress);

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = auth::initialize_gmail_hub(&auth_paths(&cli)).await?;
            if cli.token_cache.exists() {
                auth::secure_token_file(&cli.token_cache).await?;
            }

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await
                .map_err(GmailError::from)?;
            println!(
                "Connected to account: {} ({} threads)",
                profile.email_address.unwrap_or_default(),
                profile.threads_total.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Labels => {
            let config = Config::load(&cli.config).await?;
            let engine = build_engine(&cli, config).await?;
            let labels = engine.list_user_labels().await?;

            if labels.is_empty() {
                println!("No user labels found.");
            }
            for label in labels {
                println!("{:<24} {}", label.id, label.name);
            }
            Ok(())
        }

        Commands::Scan { scan, top, json } => {
            let config = Config::load(&cli.config).await?;
            let engine = build_engine(&cli, config).await?;

            let report = cli::scan_inbox(&engine, &reporter, scan).await?;
            let snapshot = engine.get_domains().await;

            if *json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", cli::format_scan_summary(&report));
                cli::print_domains(&snapshot, *top);
            }
            Ok(())
        }

        Commands::Clean {
            domains,
            live,
            max_threads,
            scan,
        } => {
            let config = Config::load(&cli.config).await?;
            let engine = build_engine(&cli, config).await?;

            if !live {
                println!("Running in DRY RUN mode - nothing will be trashed (pass --live to trash)");
            }

            let scan_report = cli::scan_inbox(&engine, &reporter, scan).await?;
            println!("{}", cli::format_scan_summary(&scan_report));

            let request = CleanupRequest {
                domains: domains.clone(),
                dry_run: !live,
                limit: *max_threads,
                policy: scan.policy(),
            };
            let report = cli::clean_domains(&engine, &reporter, request).await?;
            println!("{}", cli::format_cleanup_summary(&report));
            Ok(())
        }

        Commands::Review { scan } => {
            let config = Config::load(&cli.config).await?;
            let engine = build_engine(&cli, config).await?;
            cli::run_review(&engine, &reporter, scan).await
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - scan.excluded_domains: domains never offered for cleanup");
            println!("  - scan.max_concurrent_fetches: parallel thread fetches");
            println!("  - protection.label_mode: \"all\", \"none\" or {{ subset = [label ids] }}");
            println!("  - cleanup.trash_batch_size: threads re-checked per batch");

            Ok(())
        }
    }
}
