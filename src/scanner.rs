//! Inbox scanner that builds the domain index
//!
//! A scan pages through the inbox listing first, then fetches thread detail
//! with bounded concurrency. Every fetched thread ends up in exactly one of
//! four buckets: indexed under its sender domain, protected, excluded, or
//! unattributed (no usable sender).

use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::client::MailboxClient;
use crate::config::ScanConfig;
use crate::error::{GmailError, Result};
use crate::exclusions::DomainExclusions;
use crate::index::DomainIndex;
use crate::models::{preview, RunOutcome, ScanTotals, ThreadDetail, ThreadSummary, SUBJECT_PREVIEW_CHARS};
use crate::progress::{Broadcaster, Disposition, Operation, ProgressEvent};
use crate::protection::{is_protected, ProtectionPolicy};
use crate::sender::sender_and_domain;

/// Where a scan is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Paging,
    Draining,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub page_size: u32,
    pub max_concurrent_fetches: usize,
    /// Hard ceiling applied even when no limit is requested
    pub max_threads: usize,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig, limit: Option<usize>) -> Self {
        Self {
            page_size: config.page_size,
            max_concurrent_fetches: config.max_concurrent_fetches,
            max_threads: config.max_threads,
            limit,
        }
    }

    /// Most threads this scan may list
    pub fn thread_ceiling(&self) -> usize {
        match self.limit {
            Some(limit) => limit.min(self.max_threads),
            None => self.max_threads,
        }
    }
}

/// Final counters and how the scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub totals: ScanTotals,
    pub outcome: RunOutcome,
}

pub struct ThreadScanner<'a> {
    client: &'a dyn MailboxClient,
    broadcaster: &'a Broadcaster,
    options: ScanOptions,
    phase: ScanPhase,
    totals: ScanTotals,
}

impl<'a> ThreadScanner<'a> {
    pub fn new(client: &'a dyn MailboxClient, broadcaster: &'a Broadcaster, options: ScanOptions) -> Self {
        Self {
            client,
            broadcaster,
            options,
            phase: ScanPhase::Idle,
            totals: ScanTotals::default(),
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Scan the inbox into `index`.
    ///
    /// Entries already inserted stay in the index when the scan aborts.
    pub async fn run(
        &mut self,
        policy: &ProtectionPolicy,
        exclusions: &DomainExclusions,
        index: &RwLock<DomainIndex>,
        cancel: &AtomicBool,
    ) -> ScanResult {
        self.phase = ScanPhase::Paging;
        let thread_ids = match self.list_thread_ids(cancel).await {
            Ok(ids) => ids,
            Err(e) => return self.fail(e),
        };

        if cancel.load(Ordering::SeqCst) {
            return self.cancelled();
        }

        self.phase = ScanPhase::Draining;
        self.totals.total_threads = thread_ids.len();
        info!("Collecting details for {} threads", thread_ids.len());
        self.broadcaster.publish(ProgressEvent::CollectionStarted {
            total_threads: thread_ids.len(),
        });

        let client = self.client;
        let stop = AtomicBool::new(false);
        let mut fatal: Option<GmailError> = None;

        let mut fetches = stream::iter(thread_ids)
            .take_while(|_| {
                future::ready(!cancel.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst))
            })
            .map(|thread_id| async move {
                let result = client.get_thread(&thread_id).await;
                (thread_id, result)
            })
            .buffer_unordered(self.options.max_concurrent_fetches.max(1));

        while let Some((thread_id, result)) = fetches.next().await {
            match result {
                Ok(detail) => self.record(detail, policy, exclusions, index).await,
                Err(e) if e.is_fatal() => {
                    error!("Fetching thread {} failed fatally: {}", thread_id, e);
                    stop.store(true, Ordering::SeqCst);
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    warn!("Skipping thread {}: {}", thread_id, e);
                    self.totals.failed_threads += 1;
                    self.broadcaster
                        .publish(ProgressEvent::item_error(&thread_id, e.to_string()));
                }
            }
        }
        drop(fetches);

        if let Some(e) = fatal {
            return self.fail(e);
        }
        if cancel.load(Ordering::SeqCst) {
            return self.cancelled();
        }

        self.phase = ScanPhase::Done;
        info!(
            "Collection complete: {} threads processed, {} domains, {} protected, {} excluded",
            self.totals.processed_threads,
            self.totals.unique_domains,
            self.totals.protected_threads,
            self.totals.excluded_threads
        );
        self.broadcaster.publish(ProgressEvent::CollectionCompleted {
            processed_threads: self.totals.processed_threads,
            total_threads: self.totals.total_threads,
            unique_domains: self.totals.unique_domains,
        });

        ScanResult {
            totals: self.totals,
            outcome: RunOutcome::Completed,
        }
    }

    /// Page through the inbox until exhausted or the ceiling is reached
    async fn list_thread_ids(&mut self, cancel: &AtomicBool) -> Result<Vec<String>> {
        let ceiling = self.options.thread_ceiling();
        let mut thread_ids = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;

        while thread_ids.len() < ceiling {
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            let remaining = ceiling - thread_ids.len();
            let page_size = (self.options.page_size as usize).min(remaining).max(1) as u32;
            let page = self.client.list_thread_page(page_token.take(), page_size).await?;

            for id in page.thread_ids {
                if thread_ids.len() >= ceiling {
                    break;
                }
                // Listings can repeat ids across pages while the inbox changes
                if seen.insert(id.clone()) {
                    thread_ids.push(id);
                }
            }

            debug!("Listed {} threads so far", thread_ids.len());
            self.broadcaster.publish(ProgressEvent::ListingProgress {
                listed_threads: thread_ids.len(),
            });

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if thread_ids.len() >= ceiling && self.options.limit.is_none() {
            warn!("Stopped listing at the ceiling of {} threads", ceiling);
        }

        Ok(thread_ids)
    }

    async fn record(
        &mut self,
        detail: ThreadDetail,
        policy: &ProtectionPolicy,
        exclusions: &DomainExclusions,
        index: &RwLock<DomainIndex>,
    ) {
        let sender = detail
            .primary_from()
            .and_then(|from| sender_and_domain(from).map(|(_, domain)| (from.to_string(), domain)));

        let (disposition, domain) = if is_protected(&detail, policy) {
            self.totals.protected_threads += 1;
            (Disposition::Protected, sender.map(|(_, domain)| domain))
        } else {
            match sender {
                None => {
                    self.totals.unattributed_threads += 1;
                    (Disposition::Unattributed, None)
                }
                Some((_, domain)) if exclusions.is_excluded(&domain) => {
                    self.totals.excluded_threads += 1;
                    (Disposition::Excluded, Some(domain))
                }
                Some((from, domain)) => {
                    let mut index = index.write().await;
                    index.insert(ThreadSummary {
                        thread_id: detail.id.clone(),
                        domain: domain.clone(),
                        subject: detail.subject().to_string(),
                        sender: from,
                        message_count: detail.message_count(),
                        protected: false,
                    });
                    self.totals.indexed_threads += 1;
                    self.totals.unique_domains = index.len();
                    (Disposition::Indexed, Some(domain))
                }
            }
        };

        self.totals.processed_threads += 1;
        debug!("Thread {} -> {:?}", detail.id, disposition);

        self.broadcaster.publish(ProgressEvent::ThreadProcessed {
            thread_id: detail.id.clone(),
            domain,
            subject: preview(detail.subject(), SUBJECT_PREVIEW_CHARS),
            disposition,
            processed_threads: self.totals.processed_threads,
            total_threads: self.totals.total_threads,
            unique_domains: self.totals.unique_domains,
        });
    }

    fn fail(&mut self, e: GmailError) -> ScanResult {
        self.phase = ScanPhase::Aborted;
        error!("Collection aborted: {}", e);
        self.broadcaster.publish(ProgressEvent::Error {
            message: e.to_string(),
            thread_id: None,
            scan: Some(self.totals),
            cleanup: None,
        });
        ScanResult {
            totals: self.totals,
            outcome: RunOutcome::Failed(e.to_string()),
        }
    }

    fn cancelled(&mut self) -> ScanResult {
        self.phase = ScanPhase::Aborted;
        info!(
            "Collection cancelled after {} threads",
            self.totals.processed_threads
        );
        self.broadcaster.publish(ProgressEvent::Aborted {
            operation: Operation::Collection,
            scan: Some(self.totals),
            cleanup: None,
        });
        ScanResult {
            totals: self.totals,
            outcome: RunOutcome::Cancelled,
        }
    }
}
