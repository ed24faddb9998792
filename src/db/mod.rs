use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;

use self::models::{format_timestamp, BlacklistedSender, SyncState, Ticket, TicketStatus};

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;

/// Predicate set for ticket listing. Serves the UI tabs and the read contract
/// of the reminder/escalation jobs (awaiting + due-before).
#[derive(Debug, Clone, Default)]
pub struct TicketFilters {
    pub status: Option<TicketStatus>,
    pub not_replied: Option<bool>,
    pub unread: Option<bool>,
    pub due_before: Option<DateTime<Utc>>,
    pub from_email: Option<String>,
    pub query: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_tickets: i64,
    pub awaiting_reply: i64,
    pub unread: i64,
    pub blacklisted_senders: i64,
}

const TICKET_COLUMNS: &str = r#"
    thread_id, last_message_id, subject, snippet, from_name, from_email,
    last_message_at, last_from_me, is_unread, is_not_replied, priority, due_at,
    status, category, ai_category, ai_urgency, ai_confidence, ai_reasons,
    ai_summary, ai_source_hash, ai_last_scored_at, ai_draft_subject,
    ai_draft_body, ai_draft_updated_at, reminder_count, last_reminded_at,
    created_at, updated_at
"#;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let mut db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&mut self) -> Result<(), DbError> {
        migrations::migrate(&self.conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e}")))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert_ticket(&self, ticket: &Ticket) -> Result<(), DbError> {
        let ai_reasons = serde_json::to_string(&ticket.ai_reasons)?;

        self.conn.execute(
            r#"
            INSERT INTO tickets (
                thread_id, last_message_id, subject, snippet, from_name, from_email,
                last_message_at, last_from_me, is_unread, is_not_replied, priority, due_at,
                status, category, ai_category, ai_urgency, ai_confidence, ai_reasons,
                ai_summary, ai_source_hash, ai_last_scored_at, ai_draft_subject,
                ai_draft_body, ai_draft_updated_at, reminder_count, last_reminded_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET
                last_message_id = excluded.last_message_id,
                subject = excluded.subject,
                snippet = excluded.snippet,
                from_name = excluded.from_name,
                from_email = excluded.from_email,
                last_message_at = excluded.last_message_at,
                last_from_me = excluded.last_from_me,
                is_unread = excluded.is_unread,
                is_not_replied = excluded.is_not_replied,
                priority = excluded.priority,
                due_at = excluded.due_at,
                status = excluded.status,
                category = excluded.category,
                ai_category = excluded.ai_category,
                ai_urgency = excluded.ai_urgency,
                ai_confidence = excluded.ai_confidence,
                ai_reasons = excluded.ai_reasons,
                ai_summary = excluded.ai_summary,
                ai_source_hash = excluded.ai_source_hash,
                ai_last_scored_at = excluded.ai_last_scored_at,
                ai_draft_subject = excluded.ai_draft_subject,
                ai_draft_body = excluded.ai_draft_body,
                ai_draft_updated_at = excluded.ai_draft_updated_at,
                reminder_count = excluded.reminder_count,
                last_reminded_at = excluded.last_reminded_at,
                updated_at = excluded.updated_at
            "#,
            params![
                ticket.thread_id,
                ticket.last_message_id,
                ticket.subject,
                ticket.snippet,
                ticket.from_name,
                ticket.from_email,
                ticket.last_message_at.as_ref().map(format_timestamp),
                ticket.last_from_me,
                ticket.is_unread,
                ticket.is_not_replied,
                ticket.priority.to_string(),
                ticket.due_at.as_ref().map(format_timestamp),
                ticket.status.to_string(),
                ticket.category,
                ticket.ai_category,
                ticket.ai_urgency,
                ticket.ai_confidence,
                ai_reasons,
                ticket.ai_summary,
                ticket.ai_source_hash,
                ticket.ai_last_scored_at.as_ref().map(format_timestamp),
                ticket.ai_draft_subject,
                ticket.ai_draft_body,
                ticket.ai_draft_updated_at.as_ref().map(format_timestamp),
                ticket.reminder_count,
                ticket.last_reminded_at.as_ref().map(format_timestamp),
                format_timestamp(&ticket.created_at),
                format_timestamp(&ticket.updated_at),
            ],
        )?;

        Ok(())
    }

    pub fn get_ticket(&self, thread_id: &str) -> Result<Option<Ticket>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE thread_id = ? LIMIT 1"
        ))?;

        let mut rows = stmt.query([thread_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Ticket::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_tickets(&self, mut filters: TicketFilters) -> Result<Vec<Ticket>, DbError> {
        if filters.limit == 0 {
            filters.limit = 50;
        }

        let mut sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.to_string()));
        }

        if let Some(not_replied) = filters.not_replied {
            sql.push_str(" AND is_not_replied = ?");
            params_vec.push(Box::new(not_replied));
        }

        if let Some(unread) = filters.unread {
            sql.push_str(" AND is_unread = ?");
            params_vec.push(Box::new(unread));
        }

        if let Some(due_before) = filters.due_before {
            sql.push_str(" AND due_at IS NOT NULL AND due_at <= ?");
            params_vec.push(Box::new(format_timestamp(&due_before)));
        }

        if let Some(from_email) = filters.from_email {
            sql.push_str(" AND from_email = ?");
            params_vec.push(Box::new(from_email.to_ascii_lowercase()));
        }

        if let Some(query) = filters.query.filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND (subject LIKE ? OR snippet LIKE ? OR from_name LIKE ? OR from_email LIKE ?)");
            let pattern = format!("%{query}%");
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern));
        }

        sql.push_str(" ORDER BY last_message_at DESC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(filters.limit as i64));
        params_vec.push(Box::new(filters.offset as i64));

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_refs.as_slice(), Ticket::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(results)
    }

    /// Administrative bulk-clear. Returns the number of deleted rows.
    pub fn clear_tickets(&self) -> Result<usize, DbError> {
        let deleted = self.conn.execute("DELETE FROM tickets", [])?;
        Ok(deleted)
    }

    pub fn is_blacklisted(&self, email: &str) -> Result<bool, DbError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM blacklisted_senders WHERE email = ? LIMIT 1",
                [email.trim().to_ascii_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_blacklisted(&self, email: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO blacklisted_senders (email, created_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(email) DO NOTHING
            "#,
            [email.trim().to_ascii_lowercase()],
        )?;
        Ok(())
    }

    pub fn remove_blacklisted(&self, email: &str) -> Result<usize, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM blacklisted_senders WHERE email = ?",
            [email.trim().to_ascii_lowercase()],
        )?;
        Ok(removed)
    }

    pub fn list_blacklisted(&self) -> Result<Vec<BlacklistedSender>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT email, created_at FROM blacklisted_senders ORDER BY email ASC")?;
        let senders = stmt
            .query_map([], BlacklistedSender::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(senders)
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM sync_state WHERE key = ? LIMIT 1")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SyncState::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_sync_state(&self, key: &str) -> Result<usize, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_state WHERE key = ?", [key])?;
        Ok(removed)
    }

    pub fn get_stats(&self) -> Result<StoreStats, DbError> {
        let total_tickets: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?;
        let awaiting_reply: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tickets WHERE is_not_replied = true",
            [],
            |row| row.get(0),
        )?;
        let unread: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tickets WHERE is_unread = true",
            [],
            |row| row.get(0),
        )?;
        let blacklisted_senders: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM blacklisted_senders", [], |row| {
                    row.get(0)
                })?;

        Ok(StoreStats {
            total_tickets,
            awaiting_reply,
            unread,
            blacklisted_senders,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{Database, TicketFilters};
    use crate::db::models::{Priority, Ticket, TicketStatus};

    fn temp_db_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("maildesk-test-{}.db", Uuid::new_v4()));
        path
    }

    fn sample_ticket(thread_id: &str) -> Ticket {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let mut ticket = Ticket::new(thread_id, now);
        ticket.subject = Some("Leaking tap in unit 4".to_string());
        ticket.snippet = Some("The kitchen tap has been dripping".to_string());
        ticket.from_name = Some("Jane Tenant".to_string());
        ticket.from_email = Some("jane@example.com".to_string());
        ticket.last_message_at = Some(now);
        ticket.is_not_replied = true;
        ticket.due_at = Some(now + Priority::Medium.due_offset());
        ticket
    }

    #[test]
    fn upsert_is_idempotent_per_thread() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        let ticket = sample_ticket("thread-1");
        db.upsert_ticket(&ticket).expect("first upsert");
        db.upsert_ticket(&ticket).expect("second upsert");

        let stats = db.get_stats().expect("stats");
        assert_eq!(stats.total_tickets, 1);

        let loaded = db
            .get_ticket("thread-1")
            .expect("get ticket")
            .expect("ticket exists");
        assert_eq!(loaded.subject.as_deref(), Some("Leaking tap in unit 4"));
        assert_eq!(loaded.status, TicketStatus::Pending);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn upsert_preserves_created_at_on_update() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        let ticket = sample_ticket("thread-1");
        db.upsert_ticket(&ticket).expect("insert");

        let mut updated = ticket.clone();
        updated.created_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        updated.subject = Some("Re: Leaking tap".to_string());
        db.upsert_ticket(&updated).expect("update");

        let loaded = db
            .get_ticket("thread-1")
            .expect("get ticket")
            .expect("ticket exists");
        assert_eq!(loaded.created_at, ticket.created_at);
        assert_eq!(loaded.subject.as_deref(), Some("Re: Leaking tap"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn list_tickets_filters_awaiting_and_due() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        let awaiting = sample_ticket("thread-awaiting");
        db.upsert_ticket(&awaiting).expect("upsert awaiting");

        let mut responded = sample_ticket("thread-responded");
        responded.is_not_replied = false;
        responded.status = TicketStatus::Responded;
        db.upsert_ticket(&responded).expect("upsert responded");

        let results = db
            .list_tickets(TicketFilters {
                not_replied: Some(true),
                ..TicketFilters::default()
            })
            .expect("list awaiting");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].thread_id, "thread-awaiting");

        let due = db
            .list_tickets(TicketFilters {
                due_before: Some(Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()),
                ..TicketFilters::default()
            })
            .expect("list due");
        assert_eq!(due.len(), 2);

        let none_due = db
            .list_tickets(TicketFilters {
                due_before: Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
                ..TicketFilters::default()
            })
            .expect("list due early");
        assert!(none_due.is_empty());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn blacklist_round_trip_is_case_insensitive() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        db.add_blacklisted("Spam@Example.com").expect("add");
        assert!(db.is_blacklisted("spam@example.com").expect("check lower"));
        assert!(db.is_blacklisted("SPAM@EXAMPLE.COM").expect("check upper"));

        assert_eq!(db.remove_blacklisted("spam@example.com").expect("remove"), 1);
        assert!(!db.is_blacklisted("spam@example.com").expect("check gone"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn sync_state_last_write_wins() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        db.set_sync_state("gmail_history_id", "100").expect("set");
        db.set_sync_state("gmail_history_id", "200").expect("overwrite");

        let state = db
            .get_sync_state("gmail_history_id")
            .expect("get")
            .expect("state exists");
        assert_eq!(state.value.as_deref(), Some("200"));

        assert_eq!(db.clear_sync_state("gmail_history_id").expect("clear"), 1);
        assert!(db
            .get_sync_state("gmail_history_id")
            .expect("get cleared")
            .is_none());
        let _ = std::fs::remove_file(path);
    }
}
