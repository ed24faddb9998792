use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::classify::{classify_direction, Direction, OwnAddresses};
use crate::db::models::{Ticket, TicketStatus};
use crate::db::Database;
use crate::gmail::parse::parse_from_header;
use crate::gmail::ThreadDetail;
use crate::triage::{source_hash, TriageClassifier, TriageInput};

const UNREAD_LABEL: &str = "UNREAD";
const NO_SUBJECT: &str = "(no subject)";

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Do not create tickets for threads that are not awaiting a reply.
    pub awaiting_only: bool,
    /// Invoke the triage classifier for awaiting threads with changed content.
    pub auto_classify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMessages,
    Blacklisted,
    NotAwaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Upserted,
    Skipped(SkipReason),
}

/// Convert one thread's full message list into authoritative ticket state and
/// stage the upsert on the caller's open transaction.
///
/// Awaiting-reply is computed from the whole thread history, not just the
/// last message: a trailing outbound to one participant does not clear an
/// inbound that arrived later from another.
pub async fn reconcile_thread(
    db: &Database,
    triage: &dyn TriageClassifier,
    own: &OwnAddresses,
    detail: &ThreadDetail,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome> {
    let Some(last_msg) = detail.messages.last() else {
        return Ok(ReconcileOutcome::Skipped(SkipReason::NoMessages));
    };

    let mut last_inbound: Option<DateTime<Utc>> = None;
    let mut last_outbound: Option<DateTime<Utc>> = None;
    for message in &detail.messages {
        let Some(ts) = message.timestamp else {
            continue;
        };
        let tracker = match classify_direction(message, own) {
            Direction::Inbound => &mut last_inbound,
            Direction::Outbound => &mut last_outbound,
        };
        if tracker.map_or(true, |current| ts > current) {
            *tracker = Some(ts);
        }
    }

    let awaiting = match (last_inbound, last_outbound) {
        (Some(inbound), Some(outbound)) => inbound > outbound,
        (Some(_), None) => true,
        _ => false,
    };

    let (from_name, from_email) = parse_from_header(last_msg.from.as_deref());

    if let Some(email) = &from_email {
        if db
            .is_blacklisted(email)
            .with_context(|| format!("blacklist lookup for {email}"))?
        {
            debug!(thread_id = %detail.id, %email, "skipping blacklisted sender");
            return Ok(ReconcileOutcome::Skipped(SkipReason::Blacklisted));
        }
    }

    let now = Utc::now();
    let existing = db
        .get_ticket(&detail.id)
        .with_context(|| format!("load ticket for thread {}", detail.id))?;

    if existing.is_none() && options.awaiting_only && !awaiting {
        return Ok(ReconcileOutcome::Skipped(SkipReason::NotAwaiting));
    }

    let mut ticket = existing.unwrap_or_else(|| Ticket::new(detail.id.clone(), now));

    ticket.last_message_id = Some(last_msg.id.clone());
    ticket.subject = Some(
        last_msg
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string()),
    );
    ticket.snippet = last_msg.snippet.clone();
    ticket.last_message_at = last_msg.timestamp;
    ticket.is_unread = detail.messages.iter().any(|m| m.has_label(UNREAD_LABEL));
    ticket.last_from_me = classify_direction(last_msg, own) == Direction::Outbound;
    ticket.from_name = from_name;
    ticket.from_email = from_email;

    ticket.due_at = ticket
        .last_message_at
        .map(|ts| ts + ticket.priority.due_offset());

    // A new inbound message reopens a responded thread; a caught-up thread is
    // marked responded. NO_REPLY_NEEDED is a human override and stays put.
    if awaiting {
        if ticket.status == TicketStatus::Responded {
            ticket.status = TicketStatus::Pending;
        }
    } else if !ticket.status.is_final_override() {
        ticket.status = TicketStatus::Responded;
    }

    ticket.is_not_replied = awaiting && !ticket.status.is_final_override();

    if options.auto_classify && awaiting {
        score_if_changed(triage, &mut ticket, last_msg.body_excerpt.as_deref(), now).await;
    }

    ticket.updated_at = now;

    db.upsert_ticket(&ticket)
        .with_context(|| format!("upsert ticket for thread {}", detail.id))?;

    Ok(ReconcileOutcome::Upserted)
}

/// Re-score only when the content hash moved; a classifier failure keeps the
/// previous values and never fails the reconciliation.
async fn score_if_changed(
    triage: &dyn TriageClassifier,
    ticket: &mut Ticket,
    body_excerpt: Option<&str>,
    now: DateTime<Utc>,
) {
    let input = TriageInput {
        subject: ticket.subject.clone().unwrap_or_default(),
        snippet: ticket.snippet.clone().unwrap_or_default(),
        body_excerpt: body_excerpt.unwrap_or_default().to_string(),
    };

    let hash = source_hash(&input);
    if ticket.ai_source_hash.as_deref() == Some(hash.as_str()) {
        return;
    }

    match triage.score(&input).await {
        Ok(score) => {
            ticket.ai_category = Some(score.category);
            ticket.ai_urgency = Some(score.urgency);
            ticket.ai_confidence = Some(score.confidence);
            ticket.ai_reasons = score.reasons;
            ticket.ai_summary = Some(score.summary);
            ticket.ai_source_hash = Some(hash);
            ticket.ai_last_scored_at = Some(now);
        }
        Err(error) => {
            warn!(thread_id = %ticket.thread_id, %error, "triage scoring failed, keeping previous classification");
        }
    }
}
