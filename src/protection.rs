//! Thread protection policy
//!
//! A protected thread is never a deletion candidate. Starred and important
//! threads are always protected; user labels protect according to the
//! configured [`LabelProtection`] mode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::models::{ThreadDetail, IMPORTANT_LABEL, STARRED_LABEL, USER_LABEL_PREFIX};

/// Which user labels protect a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelProtection {
    /// Any user label protects
    #[default]
    All,
    /// Labels never protect
    None,
    /// Only the listed label ids protect
    Subset(BTreeSet<String>),
}

/// Protection policy in force for one scan or cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    #[serde(default)]
    pub label_mode: LabelProtection,
}

impl ProtectionPolicy {
    pub fn new(label_mode: LabelProtection) -> Self {
        Self { label_mode }
    }

    /// Build a policy from the UI's pair of switches: label protection on/off
    /// and an optional explicit label selection
    pub fn from_switches(use_label_protection: bool, protected_label_ids: Option<Vec<String>>) -> Self {
        let label_mode = match (use_label_protection, protected_label_ids) {
            (false, _) => LabelProtection::None,
            (true, Some(ids)) if !ids.is_empty() => {
                LabelProtection::Subset(ids.into_iter().collect())
            }
            (true, _) => LabelProtection::All,
        };
        Self { label_mode }
    }

    /// Starred threads are always protected
    pub fn protects_starred(&self) -> bool {
        true
    }

    /// Important threads are always protected
    pub fn protects_important(&self) -> bool {
        true
    }
}

/// Why a thread is protected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionReason {
    Starred,
    Important,
    UserLabel(String),
}

impl fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionReason::Starred => write!(f, "starred"),
            ProtectionReason::Important => write!(f, "important"),
            ProtectionReason::UserLabel(id) => write!(f, "label {}", id),
        }
    }
}

/// Whether a label id names a user-created (non-system) label
pub fn is_user_label(label_id: &str) -> bool {
    label_id.starts_with(USER_LABEL_PREFIX)
}

/// Evaluate the rules in order and return the first that protects the thread
pub fn protection_reason(thread: &ThreadDetail, policy: &ProtectionPolicy) -> Option<ProtectionReason> {
    if policy.protects_starred() && thread.has_label(STARRED_LABEL) {
        return Some(ProtectionReason::Starred);
    }
    if policy.protects_important() && thread.has_label(IMPORTANT_LABEL) {
        return Some(ProtectionReason::Important);
    }

    match &policy.label_mode {
        LabelProtection::None => None,
        LabelProtection::All => thread
            .labels()
            .find(|l| is_user_label(l))
            .map(|l| ProtectionReason::UserLabel(l.to_string())),
        LabelProtection::Subset(selected) => thread
            .labels()
            .find(|l| selected.contains(*l))
            .map(|l| ProtectionReason::UserLabel(l.to_string())),
    }
}

/// Whether the thread is protected under `policy`
pub fn is_protected(thread: &ThreadDetail, policy: &ProtectionPolicy) -> bool {
    protection_reason(thread, policy).is_some()
}
