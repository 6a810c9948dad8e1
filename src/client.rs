//! Mailbox client adapter with retry logic
//!
//! [`MailboxClient`] is the only seam that talks to the mail provider. The
//! scanner and cleanup orchestrator depend on the trait, so they are testable
//! against in-memory fakes and mocks.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{self, StreamExt};
use google_gmail1::api::{Message, Thread};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{GmailHub, MODIFY_SCOPE};
use crate::error::{GmailError, Result};
use crate::models::{LabelInfo, MessageInfo, ThreadDetail, ThreadPage, TrashOutcome};

/// Query selecting the threads a scan walks
pub const INBOX_QUERY: &str = "in:inbox";

/// Operations the engine needs from the mail provider
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// One page of inbox thread ids
    async fn list_thread_page(&self, page_token: Option<String>, page_size: u32) -> Result<ThreadPage>;

    /// Current labels and sender/subject headers of every message in a thread
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail>;

    /// Move threads to trash. A failure of one thread is reported in its
    /// outcome and does not fail the call.
    async fn batch_trash(&self, thread_ids: &[String]) -> Result<Vec<TrashOutcome>>;

    /// User-created labels sorted by name, case-insensitively
    async fn list_user_labels(&self) -> Result<Vec<LabelInfo>>;
}

#[async_trait]
impl<T: MailboxClient + ?Sized> MailboxClient for Arc<T> {
    async fn list_thread_page(&self, page_token: Option<String>, page_size: u32) -> Result<ThreadPage> {
        self.as_ref().list_thread_page(page_token, page_size).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        self.as_ref().get_thread(thread_id).await
    }

    async fn batch_trash(&self, thread_ids: &[String]) -> Result<Vec<TrashOutcome>> {
        self.as_ref().batch_trash(thread_ids).await
    }

    async fn list_user_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_user_labels().await
    }
}

/// Retry schedule for transient provider errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out. Only [`GmailError::is_transient`] errors are retried;
/// rate-limit errors wait at least their `Retry-After` (capped at the
/// policy's max interval).
pub async fn with_retry<T, F, Fut>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let max_interval = policy.max_interval;
    let attempts = AtomicU32::new(0);

    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_max_elapsed_time(None)
        .build();

    backoff::future::retry_notify(
        schedule,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let call = operation();
            async move {
                match call.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && attempt < max_attempts => match e {
                        GmailError::RateLimitExceeded { retry_after } => {
                            let wait = Duration::from_secs(retry_after).min(max_interval);
                            Err(backoff::Error::retry_after(e, wait))
                        }
                        other => Err(backoff::Error::transient(other)),
                    },
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |err: GmailError, wait: Duration| {
            warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                operation_name,
                attempts.load(Ordering::SeqCst),
                max_attempts,
                err,
                wait
            );
        },
    )
    .await
}

/// Production client backed by the Gmail API
pub struct GmailMailboxClient {
    hub: GmailHub,
    retry: RetryPolicy,
    mutation_permits: Arc<Semaphore>,
    max_concurrent_mutations: usize,
}

impl GmailMailboxClient {
    pub fn new(hub: GmailHub, retry: RetryPolicy, max_concurrent_mutations: usize) -> Self {
        let max_concurrent_mutations = max_concurrent_mutations.max(1);
        Self {
            hub,
            retry,
            mutation_permits: Arc::new(Semaphore::new(max_concurrent_mutations)),
            max_concurrent_mutations,
        }
    }

    async fn trash_one(&self, thread_id: &str) -> Result<()> {
        let _permit = self
            .mutation_permits
            .acquire()
            .await
            .map_err(|e| GmailError::ApiError(format!("Failed to acquire mutation permit: {}", e)))?;

        with_retry("trash_thread", &self.retry, || async {
            self.hub
                .users()
                .threads_trash("me", thread_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MailboxClient for GmailMailboxClient {
    async fn list_thread_page(&self, page_token: Option<String>, page_size: u32) -> Result<ThreadPage> {
        with_retry("list_threads", &self.retry, || async {
            let mut call = self
                .hub
                .users()
                .threads_list("me")
                .q(INBOX_QUERY)
                .max_results(page_size);

            if let Some(token) = page_token.as_deref() {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(MODIFY_SCOPE).doit().await?;

            let thread_ids = response
                .threads
                .unwrap_or_default()
                .into_iter()
                .filter_map(|t| t.id)
                .collect::<Vec<_>>();

            debug!("Listed page of {} threads", thread_ids.len());
            Ok(ThreadPage {
                thread_ids,
                next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
            })
        })
        .await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        with_retry("get_thread", &self.retry, || async {
            let (_, thread) = self
                .hub
                .users()
                .threads_get("me", thread_id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            Ok(parse_thread(thread_id, thread))
        })
        .await
    }

    async fn batch_trash(&self, thread_ids: &[String]) -> Result<Vec<TrashOutcome>> {
        // Gmail has no batch endpoint for threads; trash each one under the
        // shared mutation cap
        let outcomes = stream::iter(thread_ids.iter().cloned())
            .map(|thread_id| async move {
                let result = self.trash_one(&thread_id).await;
                if let Err(e) = &result {
                    warn!("Failed to trash thread {}: {}", thread_id, e);
                }
                TrashOutcome { thread_id, result }
            })
            .buffer_unordered(self.max_concurrent_mutations)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes)
    }

    async fn list_user_labels(&self) -> Result<Vec<LabelInfo>> {
        with_retry("list_labels", &self.retry, || async {
            let (_, response) = self
                .hub
                .users()
                .labels_list("me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            let labels = user_labels(response.labels.unwrap_or_default());
            debug!("Found {} user labels", labels.len());
            Ok(labels)
        })
        .await
    }
}

/// Keep user labels only, sorted by lower-cased name
fn user_labels(labels: Vec<google_gmail1::api::Label>) -> Vec<LabelInfo> {
    let mut labels: Vec<LabelInfo> = labels
        .into_iter()
        .filter(|l| l.type_.as_deref() == Some("user"))
        .filter_map(|l| match (l.id, l.name) {
            (Some(id), Some(name)) => Some(LabelInfo { id, name }),
            _ => None,
        })
        .collect();
    labels.sort_by_key(|l| l.name.to_lowercase());
    labels
}

fn parse_thread(requested_id: &str, thread: Thread) -> ThreadDetail {
    ThreadDetail {
        id: thread.id.unwrap_or_else(|| requested_id.to_string()),
        messages: thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(parse_message)
            .collect(),
    }
}

fn parse_message(msg: Message) -> MessageInfo {
    let mut from = None;
    let mut subject = None;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" if from.is_none() => from = Some(value),
                "subject" if subject.is_none() => subject = Some(value),
                _ => {}
            }
        }
    }

    MessageInfo {
        id: msg.id.unwrap_or_default(),
        label_ids: msg.label_ids.unwrap_or_default(),
        from,
        subject,
    }
}
