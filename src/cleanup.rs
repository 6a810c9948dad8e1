//! Cleanup of selected domains
//!
//! Every thread recorded for a selected domain is fetched again and its
//! protection re-evaluated under the policy in force now, not the one the
//! scan used. Dry runs walk the same path and only skip the trash call.

use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::client::MailboxClient;
use crate::config::CleanupConfig;
use crate::error::{GmailError, Result};
use crate::models::{preview, CleanupTotals, RunOutcome, ThreadSummary, TrashOutcome, SUBJECT_PREVIEW_CHARS};
use crate::progress::{Broadcaster, Operation, ProgressEvent};
use crate::protection::{protection_reason, ProtectionPolicy};
use crate::sender::normalize_domain;

/// A validated cleanup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub domains: BTreeSet<String>,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

impl CleanupPlan {
    /// Normalize the requested domains and reject empty selections
    pub fn new<I, S>(domains: I, dry_run: bool, limit: Option<usize>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains: BTreeSet<String> = domains
            .into_iter()
            .map(|d| normalize_domain(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();

        if domains.is_empty() {
            return Err(GmailError::EmptyDomainSelection);
        }
        if limit == Some(0) {
            return Err(GmailError::InvalidRequest(
                "limit must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            domains,
            dry_run,
            limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    pub max_concurrent_fetches: usize,
    pub trash_batch_size: usize,
}

impl From<&CleanupConfig> for CleanupOptions {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            trash_batch_size: config.trash_batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupResult {
    pub totals: CleanupTotals,
    /// Trashed, or that would have been trashed in a dry run
    pub deleted_thread_ids: Vec<String>,
    pub kept_thread_ids: Vec<String>,
    pub outcome: RunOutcome,
}

/// A thread still unprotected after re-evaluation
struct Candidate {
    thread_id: String,
    subject: String,
    sender: String,
    message_count: usize,
}

pub struct CleanupOrchestrator<'a> {
    client: &'a dyn MailboxClient,
    broadcaster: &'a Broadcaster,
    options: CleanupOptions,
    totals: CleanupTotals,
    deleted: Vec<String>,
    kept: Vec<String>,
}

impl<'a> CleanupOrchestrator<'a> {
    pub fn new(client: &'a dyn MailboxClient, broadcaster: &'a Broadcaster, options: CleanupOptions) -> Self {
        Self {
            client,
            broadcaster,
            options,
            totals: CleanupTotals::default(),
            deleted: Vec::new(),
            kept: Vec::new(),
        }
    }

    /// Process `threads`, the index entries of the plan's domains
    pub async fn run(
        mut self,
        mut threads: Vec<ThreadSummary>,
        plan: &CleanupPlan,
        policy: &ProtectionPolicy,
        cancel: &AtomicBool,
    ) -> CleanupResult {
        if let Some(limit) = plan.limit {
            threads.truncate(limit);
        }

        info!(
            "Starting {} cleanup of {} threads across {} domains",
            if plan.dry_run { "dry-run" } else { "live" },
            threads.len(),
            plan.domains.len()
        );
        self.broadcaster.publish(ProgressEvent::CleanupStarted {
            domains_count: plan.domains.len(),
            dry_run: plan.dry_run,
            threads_to_process: threads.len(),
        });

        let batch_size = self.options.trash_batch_size.max(1);
        let mut fatal: Option<GmailError> = None;

        for batch in threads.chunks(batch_size) {
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            let candidates = match self.analyze(batch, policy, cancel).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            };

            // Threads analyzed but not yet mutated are left alone on cancel
            if cancel.load(Ordering::SeqCst) || candidates.is_empty() {
                continue;
            }

            if let Err(e) = self.trash(candidates, plan.dry_run).await {
                fatal = Some(e);
                break;
            }
        }

        if let Some(e) = fatal {
            error!("Cleanup aborted: {}", e);
            self.broadcaster.publish(ProgressEvent::Error {
                message: e.to_string(),
                thread_id: None,
                scan: None,
                cleanup: Some(self.totals),
            });
            return self.finish(RunOutcome::Failed(e.to_string()));
        }

        if cancel.load(Ordering::SeqCst) {
            info!("Cleanup cancelled after {} threads", self.totals.threads_processed);
            self.broadcaster.publish(ProgressEvent::Aborted {
                operation: Operation::Cleanup,
                scan: None,
                cleanup: Some(self.totals),
            });
            return self.finish(RunOutcome::Cancelled);
        }

        info!(
            "Cleanup complete: {} processed, {} deleted ({} messages), {} messages kept",
            self.totals.threads_processed,
            self.totals.threads_deleted,
            self.totals.messages_deleted,
            self.totals.messages_kept
        );
        self.broadcaster
            .publish(ProgressEvent::CleanupCompleted(self.totals));
        self.finish(RunOutcome::Completed)
    }

    /// Fetch live state for a batch and split off protected threads.
    ///
    /// Fails only on a fatal error; other fetch failures are per-thread.
    async fn analyze(
        &mut self,
        batch: &[ThreadSummary],
        policy: &ProtectionPolicy,
        cancel: &AtomicBool,
    ) -> Result<Vec<Candidate>> {
        let client = self.client;
        let stop = AtomicBool::new(false);

        let mut fetches = stream::iter(batch.to_vec())
            .take_while(|_| {
                future::ready(!cancel.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst))
            })
            .map(move |summary: ThreadSummary| async move {
                let result = client.get_thread(&summary.thread_id).await;
                (summary, result)
            })
            .buffered(self.options.max_concurrent_fetches.max(1));

        let mut candidates = Vec::new();
        let mut fatal = None;

        while let Some((summary, result)) = fetches.next().await {
            let detail = match result {
                Ok(detail) => detail,
                Err(e) if e.is_fatal() => {
                    stop.store(true, Ordering::SeqCst);
                    fatal.get_or_insert(e);
                    continue;
                }
                Err(e) => {
                    warn!("Could not re-check thread {}: {}", summary.thread_id, e);
                    self.fail_thread(&summary.thread_id, summary.message_count, &e);
                    continue;
                }
            };

            let subject = preview(detail.subject(), SUBJECT_PREVIEW_CHARS);
            let sender = detail
                .primary_from()
                .unwrap_or(&summary.sender)
                .to_string();

            self.broadcaster.publish(ProgressEvent::ThreadAnalyzed {
                thread_id: summary.thread_id.clone(),
                subject: subject.clone(),
                sender: sender.clone(),
            });

            if let Some(reason) = protection_reason(&detail, policy) {
                debug!("Keeping thread {}: {}", summary.thread_id, reason);
                self.totals.threads_processed += 1;
                self.totals.messages_kept += detail.message_count();
                self.kept.push(summary.thread_id.clone());
                self.broadcaster.publish(ProgressEvent::ThreadKept {
                    thread_id: summary.thread_id.clone(),
                    subject,
                    sender,
                    message_count: detail.message_count(),
                });
                continue;
            }

            candidates.push(Candidate {
                thread_id: summary.thread_id.clone(),
                subject,
                sender,
                message_count: detail.message_count(),
            });
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(candidates),
        }
    }

    /// Trash the candidates, or pretend to in a dry run
    async fn trash(&mut self, candidates: Vec<Candidate>, dry_run: bool) -> Result<()> {
        let outcomes: Vec<TrashOutcome> = if dry_run {
            candidates
                .iter()
                .map(|c| TrashOutcome {
                    thread_id: c.thread_id.clone(),
                    result: Ok(()),
                })
                .collect()
        } else {
            let ids: Vec<String> = candidates.iter().map(|c| c.thread_id.clone()).collect();
            match self.client.batch_trash(&ids).await {
                Ok(outcomes) => outcomes,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    ids.into_iter()
                        .map(|thread_id| TrashOutcome {
                            thread_id,
                            result: Err(GmailError::ApiError(message.clone())),
                        })
                        .collect()
                }
            }
        };

        let mut results: HashMap<String, Result<()>> = outcomes
            .into_iter()
            .map(|o| (o.thread_id, o.result))
            .collect();
        let mut fatal = None;

        for candidate in candidates {
            let result = results.remove(&candidate.thread_id).unwrap_or_else(|| {
                Err(GmailError::InvalidResponse(format!(
                    "no trash outcome for thread {}",
                    candidate.thread_id
                )))
            });

            match result {
                Ok(()) => {
                    self.totals.threads_processed += 1;
                    self.totals.threads_deleted += 1;
                    self.totals.messages_deleted += candidate.message_count;
                    self.deleted.push(candidate.thread_id.clone());

                    let event = if dry_run {
                        ProgressEvent::WouldDelete {
                            thread_id: candidate.thread_id,
                            subject: candidate.subject,
                            sender: candidate.sender,
                            message_count: candidate.message_count,
                        }
                    } else {
                        ProgressEvent::Deleted {
                            thread_id: candidate.thread_id,
                            subject: candidate.subject,
                            sender: candidate.sender,
                            message_count: candidate.message_count,
                        }
                    };
                    self.broadcaster.publish(event);
                }
                Err(e) => {
                    self.fail_thread(&candidate.thread_id, candidate.message_count, &e);
                    if e.is_fatal() {
                        fatal.get_or_insert(e);
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail_thread(&mut self, thread_id: &str, message_count: usize, e: &GmailError) {
        self.totals.threads_processed += 1;
        self.totals.threads_failed += 1;
        self.totals.messages_kept += message_count;
        self.broadcaster
            .publish(ProgressEvent::item_error(thread_id, e.to_string()));
    }

    fn finish(self, outcome: RunOutcome) -> CleanupResult {
        CleanupResult {
            totals: self.totals,
            deleted_thread_ids: self.deleted,
            kept_thread_ids: self.kept,
            outcome,
        }
    }
}
