//! Session state and the engine facade
//!
//! [`CleanerEngine`] is what a transport layer talks to. It owns the current
//! scan session, the domain index and the progress broadcaster, and lets at
//! most one scan or cleanup run at a time. A request made while another run
//! is active is rejected immediately, never queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cleanup::{CleanupOptions, CleanupOrchestrator, CleanupPlan};
use crate::client::MailboxClient;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::exclusions::DomainExclusions;
use crate::index::{DomainIndex, IndexSnapshot};
use crate::models::{CleanupReport, LabelInfo, ScanReport};
use crate::progress::{Broadcaster, Subscription};
use crate::protection::ProtectionPolicy;
use crate::scanner::{ScanOptions, ThreadScanner};

/// What the engine is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Idle,
    Scanning,
    CleaningUp,
    Resetting,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Idle => write!(f, "idle"),
            Activity::Scanning => write!(f, "collection"),
            Activity::CleaningUp => write!(f, "cleanup"),
            Activity::Resetting => write!(f, "reset"),
        }
    }
}

struct SlotState {
    activity: Activity,
    /// Cancel flag of the running activity; `None` while idle
    cancel: Option<Arc<AtomicBool>>,
}

/// Single-flight slot; holds the running activity and its cancel flag
struct ActivitySlot(Mutex<SlotState>);

impl Default for ActivitySlot {
    fn default() -> Self {
        Self(Mutex::new(SlotState {
            activity: Activity::Idle,
            cancel: None,
        }))
    }
}

impl ActivitySlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Activity {
        self.state().activity
    }

    fn try_begin(self: &Arc<Self>, next: Activity) -> Result<ActivityGuard> {
        let mut state = self.state();
        if state.activity != Activity::Idle {
            return Err(GmailError::SessionConflict {
                running: state.activity,
            });
        }

        let cancel = Arc::new(AtomicBool::new(false));
        state.activity = next;
        state.cancel = Some(Arc::clone(&cancel));
        Ok(ActivityGuard {
            slot: Arc::clone(self),
            cancel,
        })
    }

    /// Flag the running activity as cancelled. Returns what was running.
    fn cancel(&self) -> Option<Activity> {
        let state = self.state();
        let flag = state.cancel.as_ref()?;
        flag.store(true, Ordering::SeqCst);
        Some(state.activity)
    }
}

/// Returns the slot to idle when the run ends, however it ends
struct ActivityGuard {
    slot: Arc<ActivitySlot>,
    cancel: Arc<AtomicBool>,
}

impl ActivityGuard {
    fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state();
        state.cancel = None;
        state.activity = Activity::Idle;
    }
}

/// Options for a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectRequest {
    pub limit: Option<usize>,
    /// Added to the configured `scan.excluded_domains`
    pub excluded_domains: Vec<String>,
    /// Defaults to the configured protection policy
    pub policy: Option<ProtectionPolicy>,
}

/// Options for a cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRequest {
    pub domains: Vec<String>,
    pub dry_run: bool,
    pub limit: Option<usize>,
    /// Policy re-evaluated against live thread state; defaults to the
    /// configured one
    pub policy: Option<ProtectionPolicy>,
}

impl CleanupRequest {
    pub fn new<I, S>(domains: I, dry_run: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            dry_run,
            ..Default::default()
        }
    }
}

/// State of the most recent scan
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub exclusions: DomainExclusions,
    pub policy: ProtectionPolicy,
    /// Set once the scan has ended
    pub report: Option<ScanReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub activity: Activity,
    pub session_id: Option<Uuid>,
    pub indexed_domains: usize,
    pub indexed_threads: usize,
    pub last_scan: Option<ScanReport>,
    pub last_cleanup: Option<CleanupReport>,
}

struct EngineInner {
    client: Arc<dyn MailboxClient>,
    config: Config,
    broadcaster: Broadcaster,
    activity: Arc<ActivitySlot>,
    index: RwLock<DomainIndex>,
    session: RwLock<Option<ScanSession>>,
    last_cleanup: RwLock<Option<CleanupReport>>,
}

/// Collection and cleanup engine shared by all callers
#[derive(Clone)]
pub struct CleanerEngine {
    inner: Arc<EngineInner>,
}

impl CleanerEngine {
    pub fn new(client: Arc<dyn MailboxClient>, config: Config) -> Self {
        let broadcaster = Broadcaster::new(config.progress.observer_buffer);
        Self {
            inner: Arc::new(EngineInner {
                client,
                config,
                broadcaster,
                activity: Arc::new(ActivitySlot::default()),
                index: RwLock::new(DomainIndex::new()),
                session: RwLock::new(None),
                last_cleanup: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    /// Register a new progress observer
    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcaster.subscribe()
    }

    pub fn activity(&self) -> Activity {
        self.inner.activity.current()
    }

    fn begin(&self, activity: Activity) -> Result<ActivityGuard> {
        self.inner.activity.try_begin(activity)
    }

    /// Run a scan to completion and return its report.
    ///
    /// The previous scan session and index are discarded when the scan starts.
    pub async fn collect(&self, request: CollectRequest) -> Result<ScanReport> {
        validate_limit(request.limit)?;
        let guard = self.begin(Activity::Scanning)?;
        Ok(self.run_collect(guard, request).await)
    }

    /// Accept a scan and run it in the background
    pub fn start_collect(&self, request: CollectRequest) -> Result<JoinHandle<ScanReport>> {
        validate_limit(request.limit)?;
        let guard = self.begin(Activity::Scanning)?;
        let engine = self.clone();
        Ok(tokio::spawn(async move { engine.run_collect(guard, request).await }))
    }

    async fn run_collect(&self, guard: ActivityGuard, request: CollectRequest) -> ScanReport {
        let inner = &self.inner;

        let mut exclusions: DomainExclusions =
            inner.config.scan.excluded_domains.iter().collect();
        exclusions.extend(&request.excluded_domains);
        let policy = request
            .policy
            .unwrap_or_else(|| inner.config.protection.clone());

        let session = ScanSession {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            exclusions,
            policy,
            report: None,
        };
        info!(
            "Starting collection session {} ({} excluded domains)",
            session.session_id,
            session.exclusions.len()
        );

        *inner.index.write().await = DomainIndex::new();
        *inner.session.write().await = Some(session.clone());

        let options = ScanOptions::from_config(&inner.config.scan, request.limit);
        let mut scanner = ThreadScanner::new(inner.client.as_ref(), &inner.broadcaster, options);
        let result = scanner
            .run(&session.policy, &session.exclusions, &inner.index, guard.cancel_flag())
            .await;

        let report = ScanReport {
            session_id: session.session_id,
            started_at: session.started_at,
            finished_at: Utc::now(),
            totals: result.totals,
            outcome: result.outcome,
        };

        if let Some(current) = inner.session.write().await.as_mut() {
            current.report = Some(report.clone());
        }
        report
    }

    /// Run a cleanup of the selected domains and return its report.
    ///
    /// Rejected without emitting any event when the selection is empty or
    /// another run is active.
    pub async fn cleanup(&self, request: CleanupRequest) -> Result<CleanupReport> {
        let plan = CleanupPlan::new(&request.domains, request.dry_run, request.limit)?;
        let guard = self.begin(Activity::CleaningUp)?;
        Ok(self.run_cleanup(guard, plan, request.policy).await)
    }

    /// Accept a cleanup and run it in the background
    pub fn start_cleanup(&self, request: CleanupRequest) -> Result<JoinHandle<CleanupReport>> {
        let plan = CleanupPlan::new(&request.domains, request.dry_run, request.limit)?;
        let guard = self.begin(Activity::CleaningUp)?;
        let engine = self.clone();
        Ok(tokio::spawn(async move {
            engine.run_cleanup(guard, plan, request.policy).await
        }))
    }

    async fn run_cleanup(
        &self,
        guard: ActivityGuard,
        plan: CleanupPlan,
        policy: Option<ProtectionPolicy>,
    ) -> CleanupReport {
        let inner = &self.inner;
        let policy = policy.unwrap_or_else(|| inner.config.protection.clone());
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();

        let selection = inner.index.read().await.select(&plan.domains);
        if !selection.missing_domains.is_empty() {
            debug!(
                "Skipping domains not in the index: {}",
                selection.missing_domains.join(", ")
            );
        }

        let orchestrator = CleanupOrchestrator::new(
            inner.client.as_ref(),
            &inner.broadcaster,
            CleanupOptions::from(&inner.config.cleanup),
        );
        let result = orchestrator
            .run(selection.threads, &plan, &policy, guard.cancel_flag())
            .await;

        if !plan.dry_run && !result.deleted_thread_ids.is_empty() {
            let removed = inner
                .index
                .write()
                .await
                .remove_threads(&result.deleted_thread_ids);
            debug!("Removed {} trashed threads from the index", removed);
        }

        let report = CleanupReport {
            session_id,
            dry_run: plan.dry_run,
            started_at,
            finished_at: Utc::now(),
            totals: result.totals,
            deleted_thread_ids: result.deleted_thread_ids,
            kept_thread_ids: result.kept_thread_ids,
            outcome: result.outcome,
        };
        *inner.last_cleanup.write().await = Some(report.clone());
        report
    }

    /// Snapshot of the domain index, largest domains first
    pub async fn get_domains(&self) -> IndexSnapshot {
        self.inner.index.read().await.snapshot()
    }

    /// Ask the running scan or cleanup to stop. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.inner.activity.cancel() {
            Some(activity) => {
                info!("Cancelling {}", activity);
                true
            }
            None => false,
        }
    }

    /// Discard the scan session and its index
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.begin(Activity::Resetting)?;
        *self.inner.index.write().await = DomainIndex::new();
        *self.inner.session.write().await = None;
        *self.inner.last_cleanup.write().await = None;
        info!("Session reset");
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let (indexed_domains, indexed_threads) = {
            let index = self.inner.index.read().await;
            (index.len(), index.total_threads())
        };
        let session = self.inner.session.read().await;

        EngineStatus {
            activity: self.activity(),
            session_id: session.as_ref().map(|s| s.session_id),
            indexed_domains,
            indexed_threads,
            last_scan: session.as_ref().and_then(|s| s.report.clone()),
            last_cleanup: self.inner.last_cleanup.read().await.clone(),
        }
    }

    /// The current scan session, if any
    pub async fn session(&self) -> Option<ScanSession> {
        self.inner.session.read().await.clone()
    }

    /// User labels, for building a subset protection policy
    pub async fn list_user_labels(&self) -> Result<Vec<LabelInfo>> {
        self.inner.client.list_user_labels().await
    }
}

fn validate_limit(limit: Option<usize>) -> Result<()> {
    if limit == Some(0) {
        return Err(GmailError::InvalidRequest(
            "limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}
