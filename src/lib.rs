//! Gmail Domain Cleaner
//!
//! Groups inbox threads by sender domain and moves whole domains to trash,
//! while never touching threads that are starred, marked important, or carry
//! a protecting label.
//!
//! # Overview
//!
//! - **Scanning**: pages the inbox and fetches thread detail concurrently,
//!   building a per-domain index of unprotected threads
//! - **Protection**: a pure policy check re-run before every deletion, so
//!   labels or stars added after the scan are honoured
//! - **Cleanup**: dry-run or live trash of selected domains with per-thread
//!   failure isolation
//! - **Progress**: ordered event fan-out to any number of observers that never
//!   blocks the pipeline
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_domain_cleaner::{auth, client::GmailMailboxClient, config::Config};
//! use gmail_domain_cleaner::session::{CleanerEngine, CleanupRequest, CollectRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let hub = auth::initialize_gmail_hub(&auth::AuthPaths::default()).await?;
//!     let client = GmailMailboxClient::new(
//!         hub,
//!         config.retry.policy(),
//!         config.cleanup.max_concurrent_mutations,
//!     );
//!
//!     let engine = CleanerEngine::new(Arc::new(client), config);
//!     engine.collect(CollectRequest::default()).await?;
//!
//!     let preview = engine
//!         .cleanup(CleanupRequest::new(["newsletters.example.com"], true))
//!         .await?;
//!     println!("would trash {} threads", preview.totals.threads_deleted);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 wiring for the Gmail API hub
//! - [`client`] - Mailbox client trait, Gmail implementation and retry
//! - [`protection`] - Thread protection policy
//! - [`sender`] - Sender address and domain extraction
//! - [`exclusions`] - Domains skipped by a scan
//! - [`index`] - Per-domain index of unprotected threads
//! - [`scanner`] - Inbox scanner
//! - [`cleanup`] - Cleanup orchestrator
//! - [`progress`] - Progress events and broadcaster
//! - [`session`] - Single-flight session state and engine facade
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod exclusions;
pub mod index;
pub mod models;
pub mod progress;
pub mod protection;
pub mod scanner;
pub mod sender;
pub mod session;

pub use error::{GmailError, Result};

pub use models::{
    CleanupReport, CleanupTotals, LabelInfo, MessageInfo, RunOutcome, ScanReport, ScanTotals,
    ThreadDetail, ThreadPage, ThreadSummary, TrashOutcome,
};

pub use config::{CleanupConfig, Config, ProgressConfig, RetryConfig, ScanConfig};

pub use client::{GmailMailboxClient, MailboxClient, RetryPolicy};

pub use protection::{is_protected, LabelProtection, ProtectionPolicy};

pub use index::{DomainEntry, DomainIndex, IndexSnapshot};

pub use progress::{Broadcaster, Disposition, Envelope, ProgressEvent, Subscription};

pub use session::{Activity, CleanerEngine, CleanupRequest, CollectRequest, EngineStatus};
