//! Sender address and grouping-domain extraction
//!
//! The grouping key is the full host of the sender address, lower-cased.
//! Subdomains are kept, so `news.shop.com` and `shop.com` are separate
//! domains.

use once_cell::sync::Lazy;
use regex::Regex;

static ANGLE_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]+)>").unwrap());

static BARE_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+'-]+@[A-Za-z0-9.-]+").unwrap());

/// Extract the address from a From header ("Name <user@host>" or "user@host"),
/// lower-cased
pub fn extract_sender_email(from_header: &str) -> Option<String> {
    if let Some(caps) = ANGLE_ADDRESS.captures(from_header) {
        let inner = caps[1].trim();
        if inner.contains('@') {
            return Some(inner.to_lowercase());
        }
    }

    BARE_ADDRESS
        .find(from_header)
        .map(|m| m.as_str().to_lowercase())
}

/// Extract the grouping domain from an address
pub fn extract_domain(email: &str) -> Option<String> {
    let (_, host) = email.rsplit_once('@')?;
    let host = host.trim().trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Normalize a domain typed by a user or read from config
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches('@')
        .trim_end_matches('.')
        .to_lowercase()
}

/// Resolve sender address and domain from a From header in one step
pub fn sender_and_domain(from_header: &str) -> Option<(String, String)> {
    let email = extract_sender_email(from_header)?;
    let domain = extract_domain(&email)?;
    Some((email, domain))
}
