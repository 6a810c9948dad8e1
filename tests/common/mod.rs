//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_domain_cleaner::client::MailboxClient;
use gmail_domain_cleaner::config::Config;
use gmail_domain_cleaner::error::{GmailError, Result};
use gmail_domain_cleaner::models::{
    LabelInfo, MessageInfo, ThreadDetail, ThreadPage, TrashOutcome, STARRED_LABEL,
};
use gmail_domain_cleaner::progress::{Envelope, Subscription};
use gmail_domain_cleaner::session::CleanerEngine;
use mockall::mock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A thread held by [`FakeMailbox`]
#[derive(Debug, Clone)]
pub struct FakeThread {
    pub id: String,
    pub from: Option<String>,
    pub subject: String,
    pub messages: usize,
    pub labels: Vec<String>,
}

impl FakeThread {
    pub fn new(id: &str, from: &str) -> Self {
        Self {
            id: id.to_string(),
            from: Some(from.to_string()),
            subject: format!("Subject of {}", id),
            messages: 1,
            labels: Vec::new(),
        }
    }

    /// A thread whose first message has no From header
    pub fn anonymous(id: &str) -> Self {
        Self {
            from: None,
            ..Self::new(id, "")
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn messages(mut self, count: usize) -> Self {
        self.messages = count;
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    fn detail(&self) -> ThreadDetail {
        let mut label_ids = vec!["INBOX".to_string()];
        label_ids.extend(self.labels.iter().cloned());

        let messages = (0..self.messages.max(1))
            .map(|n| MessageInfo {
                id: format!("{}-m{}", self.id, n),
                label_ids: label_ids.clone(),
                from: self.from.clone(),
                subject: Some(self.subject.clone()),
            })
            .collect();

        ThreadDetail {
            id: self.id.clone(),
            messages,
        }
    }
}

/// How an injected failure behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Affects only the thread it was raised for
    Transient,
    /// Aborts the whole run
    Fatal,
}

impl Failure {
    fn error(self, thread_id: &str) -> GmailError {
        match self {
            Failure::Transient => GmailError::ServerError {
                status: 500,
                message: format!("backend error for {}", thread_id),
            },
            Failure::Fatal => GmailError::AuthError("token revoked".to_string()),
        }
    }
}

#[derive(Default)]
struct FakeState {
    inbox: Vec<String>,
    threads: HashMap<String, FakeThread>,
    fetch_failures: HashMap<String, Failure>,
    trash_failures: HashSet<String>,
    trashed: Vec<String>,
    user_labels: Vec<LabelInfo>,
    fetches: usize,
}

/// In-memory mailbox with live, mutable thread state
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<FakeState>,
    fetch_delay: Option<Duration>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(threads: impl IntoIterator<Item = FakeThread>) -> Self {
        let mailbox = Self::new();
        for thread in threads {
            mailbox.add_thread(thread);
        }
        mailbox
    }

    /// Slow down every thread fetch
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn add_thread(&self, thread: FakeThread) {
        let mut state = self.state.lock().unwrap();
        state.inbox.push(thread.id.clone());
        state.threads.insert(thread.id.clone(), thread);
    }

    pub fn set_labels(&self, thread_id: &str, labels: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let thread = state.threads.get_mut(thread_id).unwrap();
        thread.labels = labels.iter().map(|l| l.to_string()).collect();
    }

    pub fn star(&self, thread_id: &str) {
        let mut state = self.state.lock().unwrap();
        let thread = state.threads.get_mut(thread_id).unwrap();
        thread.labels.push(STARRED_LABEL.to_string());
    }

    pub fn fail_fetch(&self, thread_id: &str, failure: Failure) {
        let mut state = self.state.lock().unwrap();
        state.fetch_failures.insert(thread_id.to_string(), failure);
    }

    pub fn fail_trash(&self, thread_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.trash_failures.insert(thread_id.to_string());
    }

    pub fn set_user_labels(&self, labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.user_labels = labels
            .iter()
            .map(|(id, name)| LabelInfo {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
    }

    /// Thread ids trashed so far, in call order
    pub fn trashed(&self) -> Vec<String> {
        self.state.lock().unwrap().trashed.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn inbox_len(&self) -> usize {
        self.state.lock().unwrap().inbox.len()
    }
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    async fn list_thread_page(&self, page_token: Option<String>, page_size: u32) -> Result<ThreadPage> {
        let state = self.state.lock().unwrap();
        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| GmailError::BadRequest(format!("bad page token {}", token)))?,
            None => 0,
        };
        let end = (offset + page_size as usize).min(state.inbox.len());
        let thread_ids = state.inbox.get(offset..end).unwrap_or_default().to_vec();

        Ok(ThreadPage {
            thread_ids,
            next_page_token: (end < state.inbox.len()).then(|| end.to_string()),
        })
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if let Some(failure) = state.fetch_failures.get(thread_id) {
            return Err(failure.error(thread_id));
        }
        state
            .threads
            .get(thread_id)
            .map(FakeThread::detail)
            .ok_or_else(|| GmailError::NotFound(thread_id.to_string()))
    }

    async fn batch_trash(&self, thread_ids: &[String]) -> Result<Vec<TrashOutcome>> {
        let mut state = self.state.lock().unwrap();
        let mut outcomes = Vec::with_capacity(thread_ids.len());

        for thread_id in thread_ids {
            let result = if state.trash_failures.contains(thread_id) {
                Err(Failure::Transient.error(thread_id))
            } else {
                state.inbox.retain(|id| id != thread_id);
                state.trashed.push(thread_id.clone());
                Ok(())
            };
            outcomes.push(TrashOutcome {
                thread_id: thread_id.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    async fn list_user_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.state.lock().unwrap().user_labels.clone())
    }
}

mock! {
    pub Mailbox {}

    #[async_trait]
    impl MailboxClient for Mailbox {
        async fn list_thread_page(&self, page_token: Option<String>, page_size: u32) -> Result<ThreadPage>;
        async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail>;
        async fn batch_trash(&self, thread_ids: &[String]) -> Result<Vec<TrashOutcome>>;
        async fn list_user_labels(&self) -> Result<Vec<LabelInfo>>;
    }
}

/// Config with small pages and batches so tests cross page and batch boundaries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scan.page_size = 2;
    config.scan.max_concurrent_fetches = 3;
    config.cleanup.max_concurrent_fetches = 2;
    config.cleanup.trash_batch_size = 2;
    config.retry.max_attempts = 1;
    config.retry.initial_interval_ms = 1;
    config.retry.max_interval_ms = 1;
    config.progress.observer_buffer = 1024;
    config
}

pub fn engine_for(mailbox: &Arc<FakeMailbox>) -> CleanerEngine {
    CleanerEngine::new(mailbox.clone(), test_config())
}

/// A small inbox with two cleanable domains, one protected thread and one
/// thread without a sender
pub fn sample_inbox() -> FakeMailbox {
    FakeMailbox::with_threads([
        FakeThread::new("t1", "Deals <deals@promo.example.com>").messages(3),
        FakeThread::new("t2", "news@newsletter.io").messages(1),
        FakeThread::new("t3", "Deals <offers@promo.example.com>").messages(2),
        FakeThread::new("t4", "boss@work.example.org").labels(&["IMPORTANT"]),
        FakeThread::new("t5", "digest@newsletter.io").messages(4),
        FakeThread::anonymous("t6"),
    ])
}

/// Events already delivered to `subscription`
pub fn drain(subscription: &mut Subscription) -> Vec<Envelope> {
    subscription.drain()
}

/// Wire names of `events`, in delivery order
pub fn kinds(events: &[Envelope]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.kind()).collect()
}
