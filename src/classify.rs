use std::collections::HashSet;

use crate::gmail::parse::parse_from_header;
use crate::gmail::Message;

const SENT_LABEL: &str = "SENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// The configured set of "our" addresses, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct OwnAddresses(HashSet<String>);

impl OwnAddresses {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_ascii_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, email: &str) -> bool {
        !self.0.is_empty() && self.0.contains(&email.trim().to_ascii_lowercase())
    }
}

/// A message is outbound iff it carries the provider's sent marker or its
/// From address is one of ours. Pure and deterministic.
pub fn classify_direction(message: &Message, own: &OwnAddresses) -> Direction {
    if message.has_label(SENT_LABEL) {
        return Direction::Outbound;
    }

    let (_name, email) = parse_from_header(message.from.as_deref());
    match email {
        Some(email) if own.contains(&email) => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_direction, Direction, OwnAddresses};
    use crate::gmail::Message;

    fn message(from: Option<&str>, labels: &[&str]) -> Message {
        Message {
            id: "msg-1".to_string(),
            from: from.map(str::to_string),
            subject: None,
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            timestamp: None,
            snippet: None,
            body_excerpt: None,
        }
    }

    #[test]
    fn sent_label_is_outbound() {
        let own = OwnAddresses::default();
        let msg = message(Some("someone@example.com"), &["SENT"]);
        assert_eq!(classify_direction(&msg, &own), Direction::Outbound);
    }

    #[test]
    fn own_address_is_outbound_case_insensitive() {
        let own = OwnAddresses::new(["Agent@Office.com"]);
        let msg = message(Some("Agent Name <AGENT@office.com>"), &["INBOX"]);
        assert_eq!(classify_direction(&msg, &own), Direction::Outbound);
    }

    #[test]
    fn external_sender_is_inbound() {
        let own = OwnAddresses::new(["agent@office.com"]);
        let msg = message(Some("Jane Tenant <jane@example.com>"), &["INBOX", "UNREAD"]);
        assert_eq!(classify_direction(&msg, &own), Direction::Inbound);
    }

    #[test]
    fn missing_from_header_is_inbound() {
        let own = OwnAddresses::new(["agent@office.com"]);
        let msg = message(None, &["INBOX"]);
        assert_eq!(classify_direction(&msg, &own), Direction::Inbound);
    }

    #[test]
    fn empty_own_set_never_matches() {
        let own = OwnAddresses::new(Vec::<String>::new());
        let msg = message(Some("agent@office.com"), &["INBOX"]);
        assert_eq!(classify_direction(&msg, &own), Direction::Inbound);
    }
}
