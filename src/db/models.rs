use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Pending,
    InProgress,
    Responded,
    NoReplyNeeded,
}

impl TicketStatus {
    /// Statuses a sync run must never override with the automatic
    /// status-reconciliation step.
    pub fn is_final_override(self) -> bool {
        matches!(self, Self::NoReplyNeeded)
    }
}

impl Display for TicketStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Responded => write!(f, "RESPONDED"),
            Self::NoReplyNeeded => write!(f, "NO_REPLY_NEEDED"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RESPONDED" => Ok(Self::Responded),
            "NO_REPLY_NEEDED" => Ok(Self::NoReplyNeeded),
            other => Err(format!("invalid ticket status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// SLA policy: days added to the last message timestamp to get due_at.
    pub fn due_offset(self) -> Duration {
        match self {
            Self::High => Duration::days(0),
            Self::Medium => Duration::days(2),
            Self::Low => Duration::days(3),
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

/// One row per Gmail thread. The awaiting-reply flag and due date are derived
/// by the reconciler; priority, category and NO_REPLY_NEEDED status are owned
/// by humans (or triage) and survive syncs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub thread_id: String,
    pub last_message_id: Option<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_from_me: bool,
    pub is_unread: bool,
    pub is_not_replied: bool,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TicketStatus,
    pub category: Option<String>,
    pub ai_category: Option<String>,
    pub ai_urgency: Option<i64>,
    pub ai_confidence: Option<i64>,
    pub ai_reasons: Vec<String>,
    pub ai_summary: Option<String>,
    pub ai_source_hash: Option<String>,
    pub ai_last_scored_at: Option<DateTime<Utc>>,
    pub ai_draft_subject: Option<String>,
    pub ai_draft_body: Option<String>,
    pub ai_draft_updated_at: Option<DateTime<Utc>>,
    pub reminder_count: i64,
    pub last_reminded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(thread_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            last_message_id: None,
            subject: None,
            snippet: None,
            from_name: None,
            from_email: None,
            last_message_at: None,
            last_from_me: false,
            is_unread: false,
            is_not_replied: false,
            priority: Priority::Medium,
            due_at: None,
            status: TicketStatus::Pending,
            category: None,
            ai_category: None,
            ai_urgency: None,
            ai_confidence: None,
            ai_reasons: Vec::new(),
            ai_summary: None,
            ai_source_hash: None,
            ai_last_scored_at: None,
            ai_draft_subject: None,
            ai_draft_body: None,
            ai_draft_updated_at: None,
            reminder_count: 0,
            last_reminded_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlacklistedSender {
    pub email: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: Option<String>,
}

fn parse_json_array(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn column_enum<T: FromStr<Err = String>>(row: &Row<'_>, name: &'static str) -> SqlResult<T> {
    let raw: String = row.get(name)?;
    T::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            raw.len(),
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

impl Ticket {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            thread_id: row.get("thread_id")?,
            last_message_id: row.get("last_message_id")?,
            subject: row.get("subject")?,
            snippet: row.get("snippet")?,
            from_name: row.get("from_name")?,
            from_email: row.get("from_email")?,
            last_message_at: parse_timestamp(row.get("last_message_at")?),
            last_from_me: row.get("last_from_me")?,
            is_unread: row.get("is_unread")?,
            is_not_replied: row.get("is_not_replied")?,
            priority: column_enum(row, "priority")?,
            due_at: parse_timestamp(row.get("due_at")?),
            status: column_enum(row, "status")?,
            category: row.get("category")?,
            ai_category: row.get("ai_category")?,
            ai_urgency: row.get("ai_urgency")?,
            ai_confidence: row.get("ai_confidence")?,
            ai_reasons: parse_json_array(row.get("ai_reasons")?),
            ai_summary: row.get("ai_summary")?,
            ai_source_hash: row.get("ai_source_hash")?,
            ai_last_scored_at: parse_timestamp(row.get("ai_last_scored_at")?),
            ai_draft_subject: row.get("ai_draft_subject")?,
            ai_draft_body: row.get("ai_draft_body")?,
            ai_draft_updated_at: parse_timestamp(row.get("ai_draft_updated_at")?),
            reminder_count: row.get("reminder_count")?,
            last_reminded_at: parse_timestamp(row.get("last_reminded_at")?),
            created_at: parse_timestamp(row.get("created_at")?).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(row.get("updated_at")?).unwrap_or_else(Utc::now),
        })
    }
}

impl BlacklistedSender {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            email: row.get("email")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{parse_timestamp, Priority, Ticket, TicketStatus};

    #[test]
    fn status_display_and_parse() {
        assert_eq!(TicketStatus::NoReplyNeeded.to_string(), "NO_REPLY_NEEDED");
        assert_eq!(
            "responded".parse::<TicketStatus>().expect("parse status"),
            TicketStatus::Responded
        );
        assert!("DONE".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn priority_due_offsets_follow_sla_policy() {
        assert_eq!(Priority::High.due_offset(), Duration::days(0));
        assert_eq!(Priority::Medium.due_offset(), Duration::days(2));
        assert_eq!(Priority::Low.due_offset(), Duration::days(3));
        assert_eq!("HIGH".parse::<Priority>().expect("parse"), Priority::High);
    }

    #[test]
    fn new_ticket_defaults() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let ticket = Ticket::new("thread-1", now);
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.priority, Priority::Medium);
        assert!(!ticket.is_not_replied);
        assert_eq!(ticket.created_at, now);
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let parsed = parse_timestamp(Some(ts.to_rfc3339()));
        assert_eq!(parsed, Some(ts));
        assert_eq!(parse_timestamp(Some("garbage".to_string())), None);
        assert_eq!(parse_timestamp(None), None);
    }
}
