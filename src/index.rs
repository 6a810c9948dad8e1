//! Per-domain aggregate of unprotected threads built by a scan

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::models::ThreadSummary;

/// Threads recorded for one sender domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRecord {
    threads: Vec<ThreadSummary>,
}

impl DomainRecord {
    pub fn count(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> &[ThreadSummary] {
        &self.threads
    }

    pub fn message_count(&self) -> usize {
        self.threads.iter().map(|t| t.message_count).sum()
    }
}

/// A domain entry in an index snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub domain: String,
    pub count: usize,
    pub threads: Vec<ThreadSummary>,
}

/// Point-in-time copy of the index, largest domains first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub domains: Vec<DomainEntry>,
    pub total_domains: usize,
}

impl IndexSnapshot {
    pub fn get(&self, domain: &str) -> Option<&DomainEntry> {
        self.domains.iter().find(|e| e.domain == domain)
    }

    pub fn total_threads(&self) -> usize {
        self.domains.iter().map(|e| e.count).sum()
    }
}

/// Threads selected for a cleanup, in domain then insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub threads: Vec<ThreadSummary>,
    /// Requested domains with no record in the index
    pub missing_domains: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainIndex {
    records: HashMap<String, DomainRecord>,
    /// thread id -> domain, so a thread lands in exactly one record
    locations: HashMap<String, String>,
}

impl DomainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unprotected thread under its domain.
    ///
    /// Returns false if the thread was already indexed.
    pub fn insert(&mut self, summary: ThreadSummary) -> bool {
        if self.locations.contains_key(&summary.thread_id) {
            return false;
        }
        self.locations
            .insert(summary.thread_id.clone(), summary.domain.clone());
        self.records
            .entry(summary.domain.clone())
            .or_default()
            .threads
            .push(summary);
        true
    }

    pub fn get(&self, domain: &str) -> Option<&DomainRecord> {
        self.records.get(domain)
    }

    pub fn contains_thread(&self, thread_id: &str) -> bool {
        self.locations.contains_key(thread_id)
    }

    /// Number of domains
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_threads(&self) -> usize {
        self.locations.len()
    }

    /// Collect the threads of the requested domains. Unknown domains are
    /// reported, not treated as errors.
    pub fn select(&self, domains: &BTreeSet<String>) -> Selection {
        let mut selection = Selection::default();
        for domain in domains {
            match self.records.get(domain) {
                Some(record) => selection.threads.extend(record.threads.iter().cloned()),
                None => selection.missing_domains.push(domain.clone()),
            }
        }
        selection
    }

    /// Drop trashed threads; records left empty are removed
    pub fn remove_threads<'a, I>(&mut self, thread_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut removed = 0;
        for thread_id in thread_ids {
            let Some(domain) = self.locations.remove(thread_id) else {
                continue;
            };
            if let Some(record) = self.records.get_mut(&domain) {
                record.threads.retain(|t| &t.thread_id != thread_id);
                removed += 1;
                if record.threads.is_empty() {
                    self.records.remove(&domain);
                }
            }
        }
        removed
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let mut domains: Vec<DomainEntry> = self
            .records
            .iter()
            .map(|(domain, record)| DomainEntry {
                domain: domain.clone(),
                count: record.count(),
                threads: record.threads.clone(),
            })
            .collect();
        domains.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));

        IndexSnapshot {
            total_domains: domains.len(),
            domains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, domain: &str, messages: usize) -> ThreadSummary {
        ThreadSummary {
            thread_id: id.to_string(),
            domain: domain.to_string(),
            subject: format!("Subject {}", id),
            sender: format!("news@{}", domain),
            message_count: messages,
            protected: false,
        }
    }

    fn domains(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_insert_groups_by_domain() {
        let mut index = DomainIndex::new();
        assert!(index.insert(summary("t1", "spam.com", 2)));
        assert!(index.insert(summary("t2", "spam.com", 1)));
        assert!(index.insert(summary("t3", "junk.com", 3)));

        assert_eq!(index.len(), 2);
        assert_eq!(index.total_threads(), 3);
        assert_eq!(index.get("spam.com").unwrap().count(), 2);
        assert_eq!(index.get("spam.com").unwrap().message_count(), 3);
    }

    #[test]
    fn test_thread_is_indexed_once() {
        let mut index = DomainIndex::new();
        assert!(index.insert(summary("t1", "spam.com", 1)));
        assert!(!index.insert(summary("t1", "other.com", 1)));

        assert_eq!(index.total_threads(), 1);
        assert!(index.get("other.com").is_none());
    }

    #[test]
    fn test_select_skips_unknown_domains() {
        let mut index = DomainIndex::new();
        index.insert(summary("t1", "spam.com", 1));
        index.insert(summary("t2", "junk.com", 1));

        let selection = index.select(&domains(&["spam.com", "gone.com"]));
        assert_eq!(selection.threads.len(), 1);
        assert_eq!(selection.threads[0].thread_id, "t1");
        assert_eq!(selection.missing_domains, vec!["gone.com".to_string()]);
    }

    #[test]
    fn test_remove_threads_drops_empty_records() {
        let mut index = DomainIndex::new();
        index.insert(summary("t1", "spam.com", 1));
        index.insert(summary("t2", "spam.com", 1));
        index.insert(summary("t3", "junk.com", 1));

        let removed = index.remove_threads(&["t1".to_string(), "t3".to_string(), "nope".to_string()]);
        assert_eq!(removed, 2);
        assert_eq!(index.get("spam.com").unwrap().count(), 1);
        assert!(index.get("junk.com").is_none());
        assert!(!index.contains_thread("t3"));
    }

    #[test]
    fn test_snapshot_orders_by_count_then_name() {
        let mut index = DomainIndex::new();
        index.insert(summary("t1", "b.com", 1));
        index.insert(summary("t2", "a.com", 1));
        index.insert(summary("t3", "c.com", 1));
        index.insert(summary("t4", "c.com", 1));

        let snapshot = index.snapshot();
        let order: Vec<&str> = snapshot.domains.iter().map(|e| e.domain.as_str()).collect();
        assert_eq!(order, vec!["c.com", "a.com", "b.com"]);
        assert_eq!(snapshot.total_domains, 3);
        assert_eq!(snapshot.total_threads(), 4);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut index = DomainIndex::new();
        index.insert(summary("t1", "a.com", 1));
        let snapshot = index.snapshot();

        index.insert(summary("t2", "a.com", 1));
        assert_eq!(snapshot.get("a.com").unwrap().count, 1);
    }
}
