use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            thread_id TEXT PRIMARY KEY,
            last_message_id TEXT,
            subject TEXT,
            snippet TEXT,
            from_name TEXT,
            from_email TEXT,
            last_message_at TEXT,
            last_from_me BOOLEAN NOT NULL DEFAULT false,
            is_unread BOOLEAN NOT NULL DEFAULT false,
            is_not_replied BOOLEAN NOT NULL DEFAULT false,
            priority TEXT NOT NULL DEFAULT 'medium' CHECK(priority IN ('low', 'medium', 'high')),
            due_at TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(status IN ('PENDING', 'IN_PROGRESS', 'RESPONDED', 'NO_REPLY_NEEDED')),
            category TEXT,
            ai_category TEXT,
            ai_urgency INTEGER,
            ai_confidence INTEGER,
            ai_reasons TEXT,
            ai_summary TEXT,
            ai_source_hash TEXT,
            ai_last_scored_at TEXT,
            ai_draft_subject TEXT,
            ai_draft_body TEXT,
            ai_draft_updated_at TEXT,
            reminder_count INTEGER NOT NULL DEFAULT 0,
            last_reminded_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blacklisted_senders (
            email TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
        CREATE INDEX IF NOT EXISTS idx_tickets_is_not_replied ON tickets(is_not_replied);
        CREATE INDEX IF NOT EXISTS idx_tickets_is_unread ON tickets(is_unread);
        CREATE INDEX IF NOT EXISTS idx_tickets_due_at ON tickets(due_at);
        CREATE INDEX IF NOT EXISTS idx_tickets_last_message_at ON tickets(last_message_at);
        CREATE INDEX IF NOT EXISTS idx_tickets_from_email ON tickets(from_email);
        "#,
    )?;

    Ok(())
}
