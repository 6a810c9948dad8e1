use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gmail system label carried by starred messages
pub const STARRED_LABEL: &str = "STARRED";
/// Gmail system label carried by messages marked important
pub const IMPORTANT_LABEL: &str = "IMPORTANT";
/// Prefix Gmail uses for the ids of user-created labels
pub const USER_LABEL_PREFIX: &str = "Label_";

/// Subjects in progress events are cut to this many characters
pub const SUBJECT_PREVIEW_CHARS: usize = 60;

/// One page of thread ids from the inbox listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPage {
    pub thread_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Header and label data of a single message inside a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub label_ids: Vec<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
}

/// Live state of a thread as returned by the mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDetail {
    pub id: String,
    pub messages: Vec<MessageInfo>,
}

impl ThreadDetail {
    /// Whether any message in the thread carries `label_id`
    pub fn has_label(&self, label_id: &str) -> bool {
        self.labels().any(|l| l == label_id)
    }

    /// Labels of every message, possibly with repeats
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .flat_map(|m| m.label_ids.iter().map(String::as_str))
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The From header of the first message, which is the thread's primary sender
    pub fn primary_from(&self) -> Option<&str> {
        self.messages.first().and_then(|m| m.from.as_deref())
    }

    pub fn subject(&self) -> &str {
        self.messages
            .first()
            .and_then(|m| m.subject.as_deref())
            .unwrap_or("(No Subject)")
    }
}

/// What the scanner recorded about an unprotected thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub domain: String,
    pub subject: String,
    pub sender: String,
    pub message_count: usize,
    /// Verdict at observation time; always false for indexed threads
    pub protected: bool,
}

/// Per-thread result of a trash call
#[derive(Debug)]
pub struct TrashOutcome {
    pub thread_id: String,
    pub result: crate::error::Result<()>,
}

impl TrashOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// A user-created label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Running scan counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTotals {
    pub total_threads: usize,
    pub processed_threads: usize,
    pub unique_domains: usize,
    pub indexed_threads: usize,
    pub protected_threads: usize,
    pub excluded_threads: usize,
    pub unattributed_threads: usize,
    pub failed_threads: usize,
}

/// Running cleanup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTotals {
    pub threads_processed: usize,
    pub threads_deleted: usize,
    pub messages_deleted: usize,
    pub messages_kept: usize,
    pub threads_failed: usize,
}

/// Summary of one scan pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: ScanTotals,
    pub outcome: RunOutcome,
}

/// Summary of one cleanup invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub session_id: uuid::Uuid,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: CleanupTotals,
    /// Threads trashed (live) or that would have been trashed (dry run)
    pub deleted_thread_ids: Vec<String>,
    /// Threads skipped because they are protected at cleanup time
    pub kept_thread_ids: Vec<String>,
    pub outcome: RunOutcome,
}

/// Truncate a subject to `max_chars` characters, adding "..." if cut
pub fn preview(subject: &str, max_chars: usize) -> String {
    if subject.chars().count() <= max_chars {
        subject.to_string()
    } else {
        format!("{}...", subject.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, labels: &[&str]) -> MessageInfo {
        MessageInfo {
            id: id.to_string(),
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            from: Some("Promo <deals@promo.example.com>".to_string()),
            subject: Some(format!("Subject {}", id)),
        }
    }

    #[test]
    fn test_thread_detail_labels_span_messages() {
        let thread = ThreadDetail {
            id: "t1".to_string(),
            messages: vec![message("m1", &["INBOX"]), message("m2", &["STARRED"])],
        };

        assert!(thread.has_label(STARRED_LABEL));
        assert!(!thread.has_label(IMPORTANT_LABEL));
        assert_eq!(thread.message_count(), 2);
        assert_eq!(thread.subject(), "Subject m1");
        assert_eq!(thread.primary_from(), Some("Promo <deals@promo.example.com>"));
    }

    #[test]
    fn test_empty_thread_defaults() {
        let thread = ThreadDetail {
            id: "t1".to_string(),
            messages: vec![],
        };
        assert_eq!(thread.subject(), "(No Subject)");
        assert_eq!(thread.primary_from(), None);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 60), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_run_outcome_serialization() {
        let json = serde_json::to_string(&RunOutcome::Failed("boom".to_string())).unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"boom"}"#);
        let json = serde_json::to_string(&RunOutcome::Completed).unwrap();
        assert_eq!(json, r#"{"status":"completed"}"#);
    }
}
