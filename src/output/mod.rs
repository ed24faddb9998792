pub mod json;
pub mod table;

use anyhow::Result;

use crate::db::models::{BlacklistedSender, Ticket};
use crate::db::StoreStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_tickets(format: OutputFormat, tickets: &[Ticket]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_tickets(tickets)),
        OutputFormat::Json => json::format_tickets(tickets),
    }
}

pub fn format_ticket(format: OutputFormat, ticket: &Ticket) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_ticket(ticket)),
        OutputFormat::Json => json::format_ticket(ticket),
    }
}

pub fn format_blacklist(format: OutputFormat, senders: &[BlacklistedSender]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_blacklist(senders)),
        OutputFormat::Json => json::format_blacklist(senders),
    }
}

pub fn format_stats(format: OutputFormat, stats: &StoreStats) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_stats(stats)),
        OutputFormat::Json => json::format_stats(stats),
    }
}
