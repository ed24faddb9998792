use anyhow::Result;

use crate::db::models::{BlacklistedSender, Ticket};
use crate::db::StoreStats;

pub fn format_tickets(tickets: &[Ticket]) -> Result<String> {
    Ok(serde_json::to_string_pretty(tickets)?)
}

pub fn format_ticket(ticket: &Ticket) -> Result<String> {
    Ok(serde_json::to_string_pretty(ticket)?)
}

pub fn format_blacklist(senders: &[BlacklistedSender]) -> Result<String> {
    Ok(serde_json::to_string_pretty(senders)?)
}

pub fn format_stats(stats: &StoreStats) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}
