use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::{BlacklistedSender, Ticket};
use crate::db::StoreStats;

const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 44;
const STATUS_WIDTH: usize = 15;
const PRIORITY_WIDTH: usize = 8;
const DUE_WIDTH: usize = 12;

pub fn format_tickets(tickets: &[Ticket]) -> String {
    if tickets.is_empty() {
        return "No tickets found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<from$}  {:<subject$}  {:<status$}  {:<priority$}  {:<due$}\n",
        "From",
        "Subject",
        "Status",
        "Priority",
        "Due",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        status = STATUS_WIDTH,
        priority = PRIORITY_WIDTH,
        due = DUE_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}  {}\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(STATUS_WIDTH),
        "-".repeat(PRIORITY_WIDTH),
        "-".repeat(DUE_WIDTH)
    ));

    for ticket in tickets {
        let from = truncate_for_width(
            ticket
                .from_name
                .as_deref()
                .or(ticket.from_email.as_deref())
                .unwrap_or("(unknown)"),
            FROM_WIDTH,
        );
        let mut subject = ticket.subject.clone().unwrap_or_else(|| "(no subject)".to_string());
        if ticket.is_not_replied {
            subject = format!("! {subject}");
        }
        let subject = truncate_for_width(&subject, SUBJECT_WIDTH);
        let status = truncate_for_width(&ticket.status.to_string(), STATUS_WIDTH);
        let priority = truncate_for_width(&ticket.priority.to_string(), PRIORITY_WIDTH);
        let due = truncate_for_width(&relative_date(ticket.due_at.as_ref()), DUE_WIDTH);

        out.push_str(&format!(
            "{:<from$}  {:<subject$}  {:<status$}  {:<priority$}  {:<due$}\n",
            from,
            subject,
            status,
            priority,
            due,
            from = FROM_WIDTH,
            subject = SUBJECT_WIDTH,
            status = STATUS_WIDTH,
            priority = PRIORITY_WIDTH,
            due = DUE_WIDTH
        ));
    }

    out
}

pub fn format_ticket(ticket: &Ticket) -> String {
    let mut out = String::new();
    out.push_str(&format!("Thread: {}\n", ticket.thread_id));
    out.push_str(&format!(
        "Subject: {}\n",
        ticket.subject.as_deref().unwrap_or("(no subject)")
    ));
    out.push_str(&format!(
        "From: {} <{}>\n",
        ticket.from_name.as_deref().unwrap_or("(unknown)"),
        ticket.from_email.as_deref().unwrap_or("(unknown)")
    ));
    out.push_str(&format!("Status: {}\n", ticket.status));
    out.push_str(&format!("Priority: {}\n", ticket.priority));
    out.push_str(&format!(
        "Awaiting reply: {}\n",
        if ticket.is_not_replied { "yes" } else { "no" }
    ));
    out.push_str(&format!(
        "Unread: {}\n",
        if ticket.is_unread { "yes" } else { "no" }
    ));
    if let Some(last) = &ticket.last_message_at {
        out.push_str(&format!(
            "Last message: {} ({})\n",
            last.to_rfc3339(),
            relative_date(Some(last))
        ));
    }
    if let Some(due) = &ticket.due_at {
        out.push_str(&format!(
            "Due: {} ({})\n",
            due.to_rfc3339(),
            relative_date(Some(due))
        ));
    }
    if let Some(category) = ticket.ai_category.as_deref().or(ticket.category.as_deref()) {
        out.push_str(&format!("Category: {category}\n"));
    }
    if let Some(urgency) = ticket.ai_urgency {
        out.push_str(&format!("Triage urgency: {urgency}/5\n"));
    }
    if let Some(summary) = &ticket.ai_summary {
        out.push_str(&format!("Summary: {summary}\n"));
    }

    if let Some(snippet) = &ticket.snippet {
        out.push('\n');
        out.push_str(snippet);
        out.push('\n');
    }
    out
}

pub fn format_blacklist(senders: &[BlacklistedSender]) -> String {
    if senders.is_empty() {
        return "No blacklisted senders.".to_string();
    }

    let mut out = String::from("Blacklisted senders\n===================\n");
    for sender in senders {
        out.push_str(&format!(
            "{}  {}\n",
            sender.email,
            sender.created_at.as_deref().unwrap_or("-")
        ));
    }
    out
}

pub fn format_stats(stats: &StoreStats) -> String {
    let mut out = String::from("Ticket Store\n============\n");
    out.push_str(&format!("Tickets: {}\n", stats.total_tickets));
    out.push_str(&format!("Awaiting reply: {}\n", stats.awaiting_reply));
    out.push_str(&format!("Unread: {}\n", stats.unread));
    out.push_str(&format!(
        "Blacklisted senders: {}\n",
        stats.blacklisted_senders
    ));
    out
}

fn relative_date(ts: Option<&DateTime<Utc>>) -> String {
    let Some(ts) = ts else {
        return "-".to_string();
    };

    let delta = Utc::now().signed_duration_since(*ts);
    let (delta, suffix) = if delta.num_seconds() >= 0 {
        (delta, "ago")
    } else {
        (-delta, "left")
    };

    if delta.num_days() >= 365 {
        format!("{}y {suffix}", delta.num_days() / 365)
    } else if delta.num_days() >= 30 {
        format!("{}mo {suffix}", delta.num_days() / 30)
    } else if delta.num_days() >= 1 {
        format!("{}d {suffix}", delta.num_days())
    } else if delta.num_hours() >= 1 {
        format!("{}h {suffix}", delta.num_hours())
    } else {
        format!("{}m {suffix}", delta.num_minutes().max(0))
    }
}

fn truncate_for_width(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        out.push(ch);
        width += ch_width;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_ticket, format_tickets, truncate_for_width};
    use crate::db::models::Ticket;

    fn ticket() -> Ticket {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let mut ticket = Ticket::new("thread-1", now);
        ticket.subject = Some("Leaking tap in unit 4".to_string());
        ticket.from_name = Some("Jane Tenant".to_string());
        ticket.from_email = Some("jane@example.com".to_string());
        ticket.is_not_replied = true;
        ticket
    }

    #[test]
    fn ticket_table_contains_columns_and_awaiting_marker() {
        let rendered = format_tickets(&[ticket()]);
        assert!(rendered.contains("Jane Tenant"));
        assert!(rendered.contains("! Leaking tap in unit 4"));
        assert!(rendered.contains("PENDING"));
    }

    #[test]
    fn empty_ticket_list_message() {
        assert_eq!(format_tickets(&[]), "No tickets found.");
    }

    #[test]
    fn ticket_detail_lists_state() {
        let rendered = format_ticket(&ticket());
        assert!(rendered.contains("Thread: thread-1"));
        assert!(rendered.contains("Awaiting reply: yes"));
        assert!(rendered.contains("Priority: medium"));
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_for_width("short", 10), "short");
        let truncated = truncate_for_width("a very long subject line indeed", 10);
        assert!(truncated.ends_with('…'));
    }
}
