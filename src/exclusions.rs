//! Domains skipped by a scan regardless of protection
//!
//! The list is assembled per scan from the configured
//! `scan.excluded_domains` and the request's own exclusions. Matching is on
//! the normalized full host; a subdomain of an excluded domain is not
//! excluded unless listed itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::sender::normalize_domain;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainExclusions {
    domains: BTreeSet<String>,
}

impl DomainExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain; returns false if it was already present or blank
    pub fn add(&mut self, domain: &str) -> bool {
        let normalized = normalize_domain(domain);
        if normalized.is_empty() {
            return false;
        }
        self.domains.insert(normalized)
    }

    /// Merge another list into this one
    pub fn extend<I, S>(&mut self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for domain in domains {
            self.add(domain.as_ref());
        }
    }

    pub fn is_excluded(&self, domain: &str) -> bool {
        self.domains.contains(&normalize_domain(domain))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainExclusions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut exclusions = Self::new();
        exclusions.extend(iter);
        exclusions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusions_new() {
        let exclusions = DomainExclusions::new();
        assert!(exclusions.is_empty());
        assert!(!exclusions.is_excluded("example.com"));
    }

    #[test]
    fn test_exclusions_normalize() {
        let mut exclusions = DomainExclusions::new();
        assert!(exclusions.add(" Bank.Example.COM "));

        assert!(exclusions.is_excluded("bank.example.com"));
        assert!(exclusions.is_excluded("BANK.example.com."));
        assert!(!exclusions.is_excluded("example.com"));
        assert!(!exclusions.is_excluded("mail.bank.example.com"));
    }

    #[test]
    fn test_exclusions_ignore_duplicates_and_blanks() {
        let mut exclusions = DomainExclusions::new();
        assert!(exclusions.add("example.com"));
        assert!(!exclusions.add("EXAMPLE.com"));
        assert!(!exclusions.add("   "));
        assert_eq!(exclusions.len(), 1);
    }

    #[test]
    fn test_exclusions_from_iter() {
        let exclusions: DomainExclusions = ["a.com", "b.com", "A.com"].into_iter().collect();
        assert_eq!(exclusions.len(), 2);
        assert_eq!(exclusions.iter().collect::<Vec<_>>(), vec!["a.com", "b.com"]);
    }
}
