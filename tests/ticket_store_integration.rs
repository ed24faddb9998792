use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use maildesk::classify::OwnAddresses;
use maildesk::db::models::TicketStatus;
use maildesk::db::{Database, TicketFilters};
use maildesk::gmail::{Message, ThreadDetail};
use maildesk::sync::reconcile::{reconcile_thread, ReconcileOptions};
use maildesk::triage::RuleClassifier;

fn temp_db() -> (Database, PathBuf) {
    let mut path = std::env::temp_dir();
    path.push(format!("maildesk-store-it-{}.db", Uuid::new_v4()));
    (Database::open(&path).expect("open db"), path)
}

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn message(id: &str, from: &str, labels: &[&str], at: DateTime<Utc>, snippet: &str) -> Message {
    Message {
        id: id.to_string(),
        from: Some(from.to_string()),
        subject: Some(format!("Subject for {id}")),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        timestamp: Some(at),
        snippet: Some(snippet.to_string()),
        body_excerpt: Some(snippet.to_string()),
    }
}

fn thread(id: &str, messages: Vec<Message>) -> ThreadDetail {
    ThreadDetail {
        id: id.to_string(),
        messages,
    }
}

#[tokio::test]
async fn reconciled_tickets_flow_through_filters_stats_and_clear() {
    let (db, path) = temp_db();
    let own = OwnAddresses::new(["agent@office.com"]);
    let options = ReconcileOptions {
        awaiting_only: false,
        auto_classify: true,
    };

    // An awaiting maintenance thread and a caught-up one.
    let awaiting = thread(
        "t-awaiting",
        vec![message(
            "m1",
            "Jane Tenant <jane@example.com>",
            &["INBOX", "UNREAD"],
            ts(1, 9),
            "There is a leak under the sink, please arrange a repair",
        )],
    );
    let caught_up = thread(
        "t-caught-up",
        vec![
            message(
                "m2",
                "Bob Owner <bob@example.com>",
                &["INBOX"],
                ts(1, 8),
                "Question about the lease renewal",
            ),
            message(
                "m3",
                "Agent <agent@office.com>",
                &["SENT"],
                ts(1, 10),
                "Renewal papers attached",
            ),
        ],
    );

    reconcile_thread(&db, &RuleClassifier, &own, &awaiting, &options)
        .await
        .expect("reconcile awaiting");
    reconcile_thread(&db, &RuleClassifier, &own, &caught_up, &options)
        .await
        .expect("reconcile caught up");

    let stats = db.get_stats().expect("stats");
    assert_eq!(stats.total_tickets, 2);
    assert_eq!(stats.awaiting_reply, 1);
    assert_eq!(stats.unread, 1);

    let awaiting_rows = db
        .list_tickets(TicketFilters {
            not_replied: Some(true),
            ..TicketFilters::default()
        })
        .expect("list awaiting");
    assert_eq!(awaiting_rows.len(), 1);
    assert_eq!(awaiting_rows[0].thread_id, "t-awaiting");
    assert_eq!(awaiting_rows[0].ai_category.as_deref(), Some("MAINTENANCE"));

    let responded_rows = db
        .list_tickets(TicketFilters {
            status: Some(TicketStatus::Responded),
            ..TicketFilters::default()
        })
        .expect("list responded");
    assert_eq!(responded_rows.len(), 1);
    assert_eq!(responded_rows[0].thread_id, "t-caught-up");
    // The classifier only runs for awaiting threads.
    assert!(responded_rows[0].ai_category.is_none());

    let due_rows = db
        .list_tickets(TicketFilters {
            due_before: Some(ts(3, 12)),
            ..TicketFilters::default()
        })
        .expect("list due");
    assert_eq!(due_rows.len(), 2);

    let by_sender = db
        .list_tickets(TicketFilters {
            query: Some("Jane".to_string()),
            ..TicketFilters::default()
        })
        .expect("list by sender");
    assert_eq!(by_sender.len(), 1);

    assert_eq!(db.clear_tickets().expect("clear"), 2);
    assert_eq!(db.get_stats().expect("stats after clear").total_tickets, 0);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn resync_after_reply_updates_existing_ticket_in_place() {
    let (db, path) = temp_db();
    let own = OwnAddresses::new(["agent@office.com"]);
    let options = ReconcileOptions::default();

    let first = thread(
        "t1",
        vec![message(
            "m1",
            "Jane Tenant <jane@example.com>",
            &["INBOX", "UNREAD"],
            ts(1, 9),
            "Heating is broken",
        )],
    );
    reconcile_thread(&db, &RuleClassifier, &own, &first, &options)
        .await
        .expect("initial reconcile");

    let ticket = db.get_ticket("t1").expect("get").expect("exists");
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert!(ticket.is_not_replied);

    let replied = thread(
        "t1",
        vec![
            message(
                "m1",
                "Jane Tenant <jane@example.com>",
                &["INBOX"],
                ts(1, 9),
                "Heating is broken",
            ),
            message(
                "m2",
                "Agent <agent@office.com>",
                &["SENT"],
                ts(1, 11),
                "Technician booked for tomorrow",
            ),
        ],
    );
    reconcile_thread(&db, &RuleClassifier, &own, &replied, &options)
        .await
        .expect("resync after reply");

    let updated = db.get_ticket("t1").expect("get").expect("exists");
    assert_eq!(updated.status, TicketStatus::Responded);
    assert!(!updated.is_not_replied);
    assert!(updated.last_from_me);
    assert!(!updated.is_unread);
    assert_eq!(updated.last_message_id.as_deref(), Some("m2"));
    assert_eq!(updated.created_at, ticket.created_at);
    assert_eq!(db.get_stats().expect("stats").total_tickets, 1);
    let _ = std::fs::remove_file(path);
}
